//! ManageSieve command building and serialization.
//!
//! Commands are plain values serialized into framed bytes. Outbound
//! strings are quoted unless they contain CR, LF or NUL or exceed a
//! kilobyte, in which case they travel as non-synchronizing literals
//! (`{n+}`); script bodies always use the literal form.

/// Strings longer than this are framed as literals.
const MAX_QUOTED_LENGTH: usize = 1024;

/// A ManageSieve command (RFC 5804 section 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request the capability listing.
    Capability,
    /// Begin the TLS upgrade.
    StartTls,
    /// Begin a SASL exchange. The initial response, when present, is
    /// already base64-encoded.
    Authenticate {
        /// SASL mechanism name.
        mechanism: String,
        /// Optional initial client response (base64).
        initial_response: Option<String>,
    },
    /// End the session.
    Logout,
    /// Keep-alive.
    Noop,
    /// Drop back to the unauthenticated state.
    Unauthenticate,
    /// Ask whether a script of the given size would fit.
    HaveSpace {
        /// Script name.
        name: String,
        /// Script size in octets.
        size: u64,
    },
    /// Upload a script.
    PutScript {
        /// Script name.
        name: String,
        /// Script content.
        body: String,
    },
    /// List stored scripts.
    ListScripts,
    /// Mark a script active; an empty name deactivates all.
    SetActive {
        /// Script name, possibly empty.
        name: String,
    },
    /// Download a script.
    GetScript {
        /// Script name.
        name: String,
    },
    /// Delete a script.
    DeleteScript {
        /// Script name.
        name: String,
    },
    /// Rename a script (only on servers advertising RENAME).
    RenameScript {
        /// Current name.
        old_name: String,
        /// New name.
        new_name: String,
    },
    /// Ask the server to validate a script without storing it.
    CheckScript {
        /// Script content.
        body: String,
    },
}

impl Command {
    /// The protocol verb, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::StartTls => "STARTTLS",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::Logout => "LOGOUT",
            Self::Noop => "NOOP",
            Self::Unauthenticate => "UNAUTHENTICATE",
            Self::HaveSpace { .. } => "HAVESPACE",
            Self::PutScript { .. } => "PUTSCRIPT",
            Self::ListScripts => "LISTSCRIPTS",
            Self::SetActive { .. } => "SETACTIVE",
            Self::GetScript { .. } => "GETSCRIPT",
            Self::DeleteScript { .. } => "DELETESCRIPT",
            Self::RenameScript { .. } => "RENAMESCRIPT",
            Self::CheckScript { .. } => "CHECKSCRIPT",
        }
    }

    /// Serializes the command, trailing CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.name().as_bytes());
        match self {
            Self::Capability
            | Self::StartTls
            | Self::Logout
            | Self::Noop
            | Self::Unauthenticate
            | Self::ListScripts => {}
            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                buf.push(b' ');
                write_string(&mut buf, mechanism);
                if let Some(initial) = initial_response {
                    buf.push(b' ');
                    write_literal(&mut buf, initial.as_bytes());
                }
            }
            Self::HaveSpace { name, size } => {
                buf.push(b' ');
                write_string(&mut buf, name);
                buf.push(b' ');
                buf.extend_from_slice(size.to_string().as_bytes());
            }
            Self::PutScript { name, body } => {
                buf.push(b' ');
                write_string(&mut buf, name);
                buf.push(b' ');
                write_literal(&mut buf, body.as_bytes());
            }
            Self::SetActive { name } | Self::GetScript { name } | Self::DeleteScript { name } => {
                buf.push(b' ');
                write_string(&mut buf, name);
            }
            Self::RenameScript { old_name, new_name } => {
                buf.push(b' ');
                write_string(&mut buf, old_name);
                buf.push(b' ');
                write_string(&mut buf, new_name);
            }
            Self::CheckScript { body } => {
                buf.push(b' ');
                write_literal(&mut buf, body.as_bytes());
            }
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Writes a string argument, quoted or literal-framed as needed.
pub(crate) fn write_string(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    let needs_literal = bytes.len() > MAX_QUOTED_LENGTH
        || bytes.iter().any(|b| matches!(b, b'\r' | b'\n' | 0));
    if needs_literal {
        write_literal(buf, bytes);
    } else {
        buf.push(b'"');
        for &b in bytes {
            if b == b'"' || b == b'\\' {
                buf.push(b'\\');
            }
            buf.push(b);
        }
        buf.push(b'"');
    }
}

/// Writes a non-synchronizing literal: `{n+}` CRLF payload.
pub(crate) fn write_literal(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(format!("{{{}+}}\r\n", bytes.len()).as_bytes());
    buf.extend_from_slice(bytes);
}
