//! Error types for the ManageSieve client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during ManageSieve operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Malformed server response, unexpected data or framing violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// SASL mechanism failure or unsupported mechanism.
    ///
    /// Authentication errors leave the session usable: the caller may retry
    /// with other credentials or another mechanism.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server answered `NO`. Non-fatal: the session stays usable.
    #[error("Server returned NO: {text}")]
    ServerNo {
        /// Response code from the completion line, e.g. `QUOTA/MAXSIZE`.
        code: Option<String>,
        /// Human-readable diagnostic from the server.
        text: String,
    },

    /// Server sent `BYE` (disconnecting).
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation not valid in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The server does not support the requested command or capability.
    #[error("Unsupported by server: {0}")]
    Unsupported(String),
}

impl Error {
    /// Builds a `NO`-completion error from a completion line.
    #[must_use]
    pub fn server_no(code: Option<String>, text: impl Into<String>) -> Self {
        Self::ServerNo {
            code,
            text: text.into(),
        }
    }

    /// Returns true if this error poisons the session.
    ///
    /// `NO` completions, authentication failures and state misuse leave the
    /// connection healthy; everything else means the transport can no
    /// longer be trusted.
    #[must_use]
    pub const fn is_connection_dead(&self) -> bool {
        !matches!(
            self,
            Self::ServerNo { .. } | Self::Auth(_) | Self::InvalidState(_) | Self::Unsupported(_)
        )
    }

    /// Returns true if this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_no_is_not_fatal() {
        let err = Error::server_no(Some("QUOTA".into()), "over quota");
        assert!(!err.is_connection_dead());
        assert!(err.to_string().contains("over quota"));
    }

    #[test]
    fn test_transport_errors_are_fatal() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "closed",
        ));
        assert!(err.is_connection_dead());
        assert!(Error::Protocol("bad literal".into()).is_connection_dead());
        assert!(Error::Timeout(Duration::from_secs(5)).is_connection_dead());
        assert!(Error::Bye("maintenance".into()).is_connection_dead());
    }

    #[test]
    fn test_auth_error_is_recoverable() {
        let err = Error::Auth("bad credentials".into());
        assert!(err.is_auth_error());
        assert!(!err.is_connection_dead());
    }
}
