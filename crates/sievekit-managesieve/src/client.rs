//! The ManageSieve client session.
//!
//! A [`Client`] owns the connection and a [`SessionState`]; every command
//! is synchronous from the caller's point of view and blocks until the
//! server's completion line. Transport, protocol and timeout errors poison
//! the session; `NO` completions and authentication failures do not.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use crate::command::{Command, write_string};
use crate::connection::{Config, FramedStream, Security, SieveStream, connect_plain};
use crate::protocol::{
    Capabilities, Completion, ResponseCode, ResponseStatus, ScriptEntry, SessionState,
    literal_marker, parse_completion, unquote,
};
use crate::sasl::{SUPPORTED_MECHANISMS, create_mechanism};
use crate::{Error, Result};

/// A complete server response: data lines plus the completion line.
#[derive(Debug)]
struct ServerResponse {
    lines: Vec<Vec<u8>>,
    completion: Completion,
}

/// ManageSieve client (RFC 5804).
///
/// The stream parameter defaults to [`SieveStream`]; tests substitute
/// in-memory mocks.
///
/// ```ignore
/// use sievekit_managesieve::{Client, Config};
///
/// let mut client = Client::new(Config::new("sieve.example.com"));
/// client.connect().await?;
/// client.authenticate("user", "password", None).await?;
/// let (active, scripts) = client.listscripts().await?;
/// client.logout().await?;
/// ```
pub struct Client<S = SieveStream> {
    config: Config,
    stream: Option<FramedStream<S>>,
    state: SessionState,
    capabilities: Capabilities,
}

impl Client {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stream: None,
            state: SessionState::Disconnected,
            capabilities: Capabilities::default(),
        }
    }

    /// Connects, reads the greeting and (per configuration) performs the
    /// opportunistic STARTTLS upgrade.
    ///
    /// # Errors
    ///
    /// Any failure here leaves the session in the failed state.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state.is_connected() {
            return Err(Error::InvalidState("already connected".into()));
        }
        let connect_timeout = self.config.connect_timeout;
        tracing::debug!(host = %self.config.host, port = self.config.port, "connecting");
        let stream = match timeout(
            connect_timeout,
            connect_plain(&self.config.host, self.config.port),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.state = SessionState::Failed;
                return Err(err);
            }
            Err(_) => {
                self.state = SessionState::Failed;
                return Err(Error::Timeout(connect_timeout));
            }
        };
        self.stream = Some(FramedStream::new(stream));
        self.read_greeting().await?;

        // opportunistic upgrade: only when the server offers it
        if self.config.security == Security::StartTls && self.capabilities.has_starttls() {
            self.starttls().await?;
        }
        Ok(())
    }

    /// Upgrades the connection to TLS and re-reads the capability
    /// announcement (RFC 5804 section 2.2).
    pub async fn starttls(&mut self) -> Result<()> {
        if self.state != SessionState::Greeted {
            return Err(Error::InvalidState(
                "STARTTLS is only valid before authentication".into(),
            ));
        }
        if !self.capabilities.has_starttls() {
            return Err(Error::Unsupported("server does not offer STARTTLS".into()));
        }
        let response = self.exchange(&Command::StartTls).await?;
        Self::check_ok(&response)?;

        let framed = self
            .stream
            .take()
            .ok_or_else(|| Error::InvalidState("not connected".into()))?;
        let tls = match framed.into_inner().upgrade_to_tls(&self.config.host).await {
            Ok(tls) => tls,
            Err(err) => {
                self.state = SessionState::Failed;
                return Err(err);
            }
        };
        self.stream = Some(FramedStream::new(tls));

        // the server re-announces its capabilities over the fresh channel
        let response = match self.read_response().await {
            Ok(response) => response,
            Err(err) => return Err(self.poison(err)),
        };
        Self::check_ok(&response)?;
        self.capabilities = Capabilities::parse(&response.lines);
        Ok(())
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Builds a client around an already-connected stream and reads the
    /// greeting. This is how tests drive the protocol against in-memory
    /// streams; real connections go through [`connect`](Client::connect).
    pub async fn from_stream(stream: S, config: Config) -> Result<Self> {
        let mut client = Self {
            config,
            stream: Some(FramedStream::new(stream)),
            state: SessionState::Disconnected,
            capabilities: Capabilities::default(),
        };
        client.read_greeting().await?;
        Ok(client)
    }

    /// Current session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Capabilities announced by the server (greeting or post-STARTTLS).
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn read_greeting(&mut self) -> Result<()> {
        let response = match self.read_response().await {
            Ok(response) => response,
            Err(err) => return Err(self.poison(err)),
        };
        match response.completion.status {
            ResponseStatus::Ok => {
                self.capabilities = Capabilities::parse(&response.lines);
                self.state = SessionState::Greeted;
                tracing::debug!(
                    implementation = ?self.capabilities.implementation(),
                    "greeting received"
                );
                Ok(())
            }
            ResponseStatus::No => {
                self.state = SessionState::Failed;
                Err(Error::Protocol("server refused the connection".into()))
            }
            ResponseStatus::Bye => {
                self.stream = None;
                self.state = SessionState::Disconnected;
                Err(Error::Bye(response.completion.text().to_string()))
            }
        }
    }

    /// Authenticates with the given credentials.
    ///
    /// When `mechanism` is `None` the strongest supported mechanism the
    /// server offers is used. On authentication failure the session stays
    /// in the greeted state so another attempt can be made.
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        mechanism: Option<&str>,
    ) -> Result<()> {
        self.authenticate_as(username, password, "", mechanism).await
    }

    /// [`authenticate`](Self::authenticate) with an explicit authorization
    /// identity.
    pub async fn authenticate_as(
        &mut self,
        username: &str,
        password: &str,
        authz_id: &str,
        mechanism: Option<&str>,
    ) -> Result<()> {
        if self.state != SessionState::Greeted {
            return Err(Error::InvalidState(
                "authentication is only valid after the greeting".into(),
            ));
        }
        let offered = self.capabilities.sasl_mechanisms();
        if offered.is_empty() {
            return Err(Error::Auth("server offers no SASL mechanisms".into()));
        }
        let chosen = match mechanism {
            Some(name) => {
                let name = name.to_ascii_uppercase();
                if !SUPPORTED_MECHANISMS.contains(&name.as_str()) {
                    return Err(Error::Auth(format!("unsupported mechanism {name}")));
                }
                if !offered.contains(&name) {
                    return Err(Error::Auth(format!("server does not offer {name}")));
                }
                name
            }
            None => SUPPORTED_MECHANISMS
                .iter()
                .find(|name| offered.iter().any(|o| o == *name))
                .map(|name| (*name).to_string())
                .ok_or_else(|| Error::Auth("no suitable mechanism found".into()))?,
        };

        let digest_uri = format!("sieve/{}", self.config.host);
        let mut mech = create_mechanism(&chosen, username, password, authz_id, &digest_uri)
            .ok_or_else(|| Error::Auth(format!("unsupported mechanism {chosen}")))?;

        tracing::debug!(mechanism = %chosen, "starting SASL exchange");
        let initial = mech.initial_response().map(|raw| STANDARD.encode(raw));
        let command = Command::Authenticate {
            mechanism: chosen,
            initial_response: initial,
        };
        if let Err(err) = self.write_timed(&command.serialize()).await {
            return Err(self.poison(err));
        }

        loop {
            let line = match self.read_line_timed().await {
                Ok(line) => line,
                Err(err) => return Err(self.poison(err)),
            };
            if line.is_empty() {
                continue;
            }

            let completion = match parse_completion(&line) {
                Ok(completion) => completion,
                Err(err) => return Err(self.poison(err)),
            };
            if let Some(mut completion) = completion {
                if let Some(size) = completion.pending_literal.take() {
                    let text = match self.read_text_literal(size).await {
                        Ok(text) => text,
                        Err(err) => return Err(self.poison(err)),
                    };
                    completion.text = Some(text);
                }
                match completion.status {
                    ResponseStatus::Ok => {
                        if let Some(ResponseCode::Sasl(data)) = &completion.code {
                            let decoded = STANDARD
                                .decode(data.as_bytes())
                                .map_err(|_| Error::Auth("invalid final SASL data".into()))?;
                            mech.verify_completion(&decoded)?;
                        }
                        self.state = SessionState::Authenticated;
                        return Ok(());
                    }
                    ResponseStatus::No => {
                        return Err(Error::Auth(completion.text().to_string()));
                    }
                    ResponseStatus::Bye => {
                        self.stream = None;
                        self.state = SessionState::Disconnected;
                        return Err(Error::Bye(completion.text().to_string()));
                    }
                }
            }

            // an untagged challenge line: base64, quoted or literal-framed
            let challenge_b64 = if let Some(size) = literal_marker(&line) {
                match self.read_text_literal(size).await {
                    Ok(text) => text,
                    Err(err) => return Err(self.poison(err)),
                }
            } else if let Some((text, _)) = unquote(&line) {
                text
            } else {
                String::from_utf8_lossy(&line).into_owned()
            };
            let challenge = STANDARD
                .decode(challenge_b64.trim().as_bytes())
                .map_err(|_| Error::Auth("challenge is not valid base64".into()))?;

            let reply = mech.step(&challenge)?;
            let mut out = Vec::new();
            write_string(&mut out, &STANDARD.encode(&reply));
            out.extend_from_slice(b"\r\n");
            if let Err(err) = self.write_timed(&out).await {
                return Err(self.poison(err));
            }
        }
    }

    /// Sends CAPABILITY and returns the parsed listing. Does not replace
    /// the capabilities stored on the session.
    pub async fn capability(&mut self) -> Result<Capabilities> {
        self.require_connected()?;
        let response = self.exchange(&Command::Capability).await?;
        Self::check_ok(&response)?;
        Ok(Capabilities::parse(&response.lines))
    }

    /// Keep-alive.
    pub async fn noop(&mut self) -> Result<()> {
        self.require_connected()?;
        let response = self.exchange(&Command::Noop).await?;
        Self::check_ok(&response)
    }

    /// Asks whether a script named `name` of `size` octets would fit
    /// within the user's quota.
    pub async fn havespace(&mut self, name: &str, size: u64) -> Result<bool> {
        self.require_authenticated()?;
        let response = self
            .exchange(&Command::HaveSpace {
                name: name.to_string(),
                size,
            })
            .await?;
        Ok(response.completion.status == ResponseStatus::Ok)
    }

    /// Uploads a script.
    pub async fn putscript(&mut self, name: &str, body: &str) -> Result<()> {
        self.require_authenticated()?;
        let response = self
            .exchange(&Command::PutScript {
                name: name.to_string(),
                body: body.to_string(),
            })
            .await?;
        Self::check_ok(&response)
    }

    /// Lists stored scripts: the active one (if any) and every name, in
    /// server order.
    pub async fn listscripts(&mut self) -> Result<(Option<String>, Vec<String>)> {
        self.require_authenticated()?;
        let response = self.exchange(&Command::ListScripts).await?;
        Self::check_ok(&response)?;

        let mut active = None;
        let mut names = Vec::new();
        for line in &response.lines {
            let entry = ScriptEntry::parse(line);
            if entry.active {
                active = Some(entry.name.clone());
            }
            names.push(entry.name);
        }
        Ok((active, names))
    }

    /// Downloads a script body, byte-exact.
    pub async fn getscript(&mut self, name: &str) -> Result<String> {
        self.require_authenticated()?;
        let response = self
            .exchange(&Command::GetScript {
                name: name.to_string(),
            })
            .await?;
        Self::check_ok(&response)?;
        let body = response
            .lines
            .iter()
            .map(|line| String::from_utf8_lossy(line))
            .collect::<Vec<_>>()
            .join("\r\n");
        Ok(body)
    }

    /// Deletes a script.
    pub async fn deletescript(&mut self, name: &str) -> Result<()> {
        self.require_authenticated()?;
        let response = self
            .exchange(&Command::DeleteScript {
                name: name.to_string(),
            })
            .await?;
        Self::check_ok(&response)
    }

    /// Marks `name` active; an empty name deactivates all scripts.
    pub async fn setactive(&mut self, name: &str) -> Result<()> {
        self.require_authenticated()?;
        let response = self
            .exchange(&Command::SetActive {
                name: name.to_string(),
            })
            .await?;
        Self::check_ok(&response)
    }

    /// Asks the server to validate a script without storing it (RFC 5804
    /// section 2.12; requires a VERSION-announcing server).
    pub async fn checkscript(&mut self, body: &str) -> Result<()> {
        self.require_authenticated()?;
        if self.capabilities.version().is_none() {
            return Err(Error::Unsupported(
                "server does not support CHECKSCRIPT".into(),
            ));
        }
        let response = self
            .exchange(&Command::CheckScript {
                body: body.to_string(),
            })
            .await?;
        Self::check_ok(&response)
    }

    /// Renames a script.
    ///
    /// Servers advertising `RENAME` get the native RENAMESCRIPT command.
    /// Elsewhere the rename is simulated with GETSCRIPT/PUTSCRIPT/
    /// SETACTIVE/DELETESCRIPT; a failure after the new script was uploaded
    /// rolls the upload back.
    pub async fn renamescript(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        self.require_authenticated()?;
        if self.capabilities.has_rename() {
            let response = self
                .exchange(&Command::RenameScript {
                    old_name: old_name.to_string(),
                    new_name: new_name.to_string(),
                })
                .await?;
            return Self::check_ok(&response);
        }

        tracing::debug!(old_name, new_name, "server lacks RENAME, simulating");
        let (active, scripts) = self.listscripts().await?;
        if !scripts.iter().any(|name| name == old_name) {
            return Err(Error::server_no(None, "old script does not exist"));
        }
        if scripts.iter().any(|name| name == new_name) {
            return Err(Error::server_no(None, "new script already exists"));
        }

        let body = self.getscript(old_name).await?;
        // a PUTSCRIPT failure needs no rollback: nothing was created
        self.putscript(new_name, &body).await?;

        if active.as_deref() == Some(old_name)
            && let Err(err) = self.setactive(new_name).await
        {
            return Err(self.rollback_rename(new_name, err).await);
        }
        if let Err(err) = self.deletescript(old_name).await {
            return Err(self.rollback_rename(new_name, err).await);
        }
        Ok(())
    }

    /// Removes the partially-created target script, then reports the
    /// original error.
    async fn rollback_rename(&mut self, new_name: &str, err: Error) -> Error {
        if err.is_connection_dead() {
            return err;
        }
        if let Err(rollback_err) = self.deletescript(new_name).await {
            tracing::warn!(%rollback_err, "rename rollback failed");
        }
        err
    }

    /// Returns to the unauthenticated state (RFC 5804 section 2.14.1).
    pub async fn unauthenticate(&mut self) -> Result<()> {
        self.require_authenticated()?;
        if !self.capabilities.has_unauthenticate() {
            return Err(Error::Unsupported(
                "server does not support UNAUTHENTICATE".into(),
            ));
        }
        let response = self.exchange(&Command::Unauthenticate).await?;
        Self::check_ok(&response)?;
        self.state = SessionState::Greeted;
        Ok(())
    }

    /// Ends the session. Best effort: the connection is released whatever
    /// the server answers.
    pub async fn logout(&mut self) -> Result<()> {
        if !self.state.is_connected() {
            return Err(Error::InvalidState("not connected".into()));
        }
        let _ = self.exchange(&Command::Logout).await;
        self.stream = None;
        self.state = SessionState::LoggedOut;
        Ok(())
    }

    // -- internals -------------------------------------------------------

    fn require_connected(&self) -> Result<()> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(Error::InvalidState("not connected".into()))
        }
    }

    fn require_authenticated(&self) -> Result<()> {
        if self.state.is_authenticated() {
            Ok(())
        } else {
            Err(Error::InvalidState("authentication required".into()))
        }
    }

    /// Marks the session failed when the error kills the connection.
    fn poison(&mut self, err: Error) -> Error {
        if err.is_connection_dead() {
            self.stream = None;
            self.state = SessionState::Failed;
        }
        err
    }

    fn check_ok(response: &ServerResponse) -> Result<()> {
        match response.completion.status {
            ResponseStatus::Ok => Ok(()),
            ResponseStatus::No => Err(Error::server_no(
                response
                    .completion
                    .code
                    .as_ref()
                    .map(|code| code.as_str().to_string()),
                response.completion.text(),
            )),
            ResponseStatus::Bye => Err(Error::Bye(response.completion.text().to_string())),
        }
    }

    /// Sends a command and reads its full response. `BYE` drops the
    /// session back to disconnected; transport errors poison it.
    async fn exchange(&mut self, command: &Command) -> Result<ServerResponse> {
        tracing::debug!(command = command.name(), "sending command");
        if let Err(err) = self.write_timed(&command.serialize()).await {
            return Err(self.poison(err));
        }
        let response = match self.read_response().await {
            Ok(response) => response,
            Err(err) => return Err(self.poison(err)),
        };
        if response.completion.status == ResponseStatus::Bye {
            self.stream = None;
            self.state = SessionState::Disconnected;
            return Err(Error::Bye(response.completion.text().to_string()));
        }
        Ok(response)
    }

    /// Reads data lines (resolving full-line literals) until a completion
    /// line arrives.
    async fn read_response(&mut self) -> Result<ServerResponse> {
        let mut lines: Vec<Vec<u8>> = Vec::new();
        loop {
            let line = self.read_line_timed().await?;
            if line.is_empty() {
                continue;
            }
            if let Some(size) = literal_marker(&line) {
                let mut payload = self.read_block_timed(size).await?;
                // the literal's octets are followed by the remainder of the
                // logical line (usually empty)
                let rest = self.read_line_timed().await?;
                if !rest.is_empty() {
                    payload.extend_from_slice(&rest);
                }
                lines.push(payload);
                continue;
            }
            if let Some(mut completion) = parse_completion(&line)? {
                if let Some(size) = completion.pending_literal.take() {
                    completion.text = Some(self.read_text_literal(size).await?);
                }
                return Ok(ServerResponse { lines, completion });
            }
            lines.push(line);
        }
    }

    /// Reads a literal that carries text (error message, SASL data) and
    /// consumes the line remainder after it.
    async fn read_text_literal(&mut self, size: usize) -> Result<String> {
        let payload = self.read_block_timed(size).await?;
        let _ = self.read_line_timed().await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    async fn read_line_timed(&mut self) -> Result<Vec<u8>> {
        let io_timeout = self.config.io_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("not connected".into()))?;
        match timeout(io_timeout, stream.read_line()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(io_timeout)),
        }
    }

    async fn read_block_timed(&mut self, size: usize) -> Result<Vec<u8>> {
        let io_timeout = self.config.io_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("not connected".into()))?;
        match timeout(io_timeout, stream.read_block(size)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(io_timeout)),
        }
    }

    async fn write_timed(&mut self, bytes: &[u8]) -> Result<()> {
        let io_timeout = self.config.io_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::InvalidState("not connected".into()))?;
        match timeout(io_timeout, stream.write_command(bytes)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(io_timeout)),
        }
    }
}

impl<S> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
