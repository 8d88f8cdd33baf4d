//! SASL authentication mechanisms.
//!
//! Implements the mechanisms a ManageSieve server commonly offers:
//!
//! - PLAIN (RFC 4616)
//! - LOGIN (legacy two-step exchange)
//! - DIGEST-MD5 (RFC 2831), including the `rspauth` verification round
//! - OAUTHBEARER (RFC 7628)
//!
//! A mechanism is a small state machine: an optional initial response,
//! then one reply per server challenge. Payloads here are raw bytes; the
//! client layer handles base64 framing on the wire.

use md5::{Digest, Md5};
use rand::RngCore;

use crate::{Error, Result};

/// Supported mechanisms, strongest first. Used to pick one automatically
/// from the server's advertised list.
pub const SUPPORTED_MECHANISMS: &[&str] = &["DIGEST-MD5", "PLAIN", "LOGIN", "OAUTHBEARER"];

/// A SASL client mechanism.
pub trait Mechanism: Send {
    /// Mechanism name as it appears in the SASL capability.
    fn name(&self) -> &'static str;

    /// Initial client response, if the mechanism sends one with
    /// `AUTHENTICATE`.
    fn initial_response(&mut self) -> Option<Vec<u8>>;

    /// Produces the reply to a decoded server challenge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when the challenge is malformed or the
    /// exchange is already complete.
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Verifies final server data attached to the `OK` completion
    /// (`(SASL "...")`), when the mechanism authenticates the server too.
    fn verify_completion(&mut self, data: &[u8]) -> Result<()> {
        let _ = data;
        Ok(())
    }
}

/// Instantiates a mechanism by name.
///
/// `password` doubles as the bearer token for OAUTHBEARER. Returns `None`
/// for unsupported mechanism names.
#[must_use]
pub fn create_mechanism(
    name: &str,
    username: &str,
    password: &str,
    authz_id: &str,
    digest_uri: &str,
) -> Option<Box<dyn Mechanism>> {
    match name.to_ascii_uppercase().as_str() {
        "PLAIN" => Some(Box::new(Plain::new(username, password, authz_id))),
        "LOGIN" => Some(Box::new(Login::new(username, password))),
        "DIGEST-MD5" => Some(Box::new(DigestMd5::new(
            username, password, authz_id, digest_uri,
        ))),
        "OAUTHBEARER" => Some(Box::new(OauthBearer::new(username, password))),
        _ => None,
    }
}

/// PLAIN (RFC 4616): single response `authzid NUL authcid NUL password`.
pub struct Plain {
    username: String,
    password: String,
    authz_id: String,
}

impl Plain {
    /// Creates a PLAIN mechanism.
    #[must_use]
    pub fn new(username: &str, password: &str, authz_id: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            authz_id: authz_id.to_string(),
        }
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(self.authz_id.as_bytes());
        out.push(0);
        out.extend_from_slice(self.username.as_bytes());
        out.push(0);
        out.extend_from_slice(self.password.as_bytes());
        Some(out)
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Error::Auth("PLAIN expects no challenge".into()))
    }
}

enum LoginStep {
    Username,
    Password,
    Done,
}

/// LOGIN: the server prompts for username, then password.
pub struct Login {
    username: String,
    password: String,
    step: LoginStep,
}

impl Login {
    /// Creates a LOGIN mechanism.
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            step: LoginStep::Username,
        }
    }
}

impl Mechanism for Login {
    fn name(&self) -> &'static str {
        "LOGIN"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        // prompts are advisory ("Username:", "Password:"); order is fixed
        match self.step {
            LoginStep::Username => {
                self.step = LoginStep::Password;
                Ok(self.username.clone().into_bytes())
            }
            LoginStep::Password => {
                self.step = LoginStep::Done;
                Ok(self.password.clone().into_bytes())
            }
            LoginStep::Done => Err(Error::Auth("LOGIN exchange already complete".into())),
        }
    }
}

/// OAUTHBEARER (RFC 7628): initial response carries the bearer token; an
/// error challenge is acknowledged with a single `0x01` to terminate.
pub struct OauthBearer {
    user: String,
    token: String,
}

impl OauthBearer {
    /// Creates an OAUTHBEARER mechanism. `token` is the OAuth2 access
    /// token.
    #[must_use]
    pub fn new(user: &str, token: &str) -> Self {
        Self {
            user: user.to_string(),
            token: token.to_string(),
        }
    }
}

impl Mechanism for OauthBearer {
    fn name(&self) -> &'static str {
        "OAUTHBEARER"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        Some(
            format!(
                "n,a={},\x01auth=Bearer {}\x01\x01",
                self.user, self.token
            )
            .into_bytes(),
        )
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        // the challenge is a JSON error description; terminate the exchange
        Ok(vec![0x01])
    }
}

enum DigestStep {
    Initial,
    AwaitRspauth,
    Done,
}

/// DIGEST-MD5 (RFC 2831).
///
/// First challenge carries `realm`/`nonce`; the reply is the key/value
/// digest response. The second challenge is the server's `rspauth`, which
/// is verified against a digest computed with an empty `AUTHENTICATE`
/// prefix, and acknowledged with an empty response.
pub struct DigestMd5 {
    username: String,
    password: String,
    authz_id: String,
    digest_uri: String,
    cnonce: String,
    realm: String,
    nonce: String,
    step: DigestStep,
}

impl DigestMd5 {
    /// Creates a DIGEST-MD5 mechanism. `digest_uri` is conventionally
    /// `sieve/<host>`.
    #[must_use]
    pub fn new(username: &str, password: &str, authz_id: &str, digest_uri: &str) -> Self {
        let mut raw = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut raw);
        Self::with_cnonce(username, password, authz_id, digest_uri, &encode_b64(&raw))
    }

    /// Test hook: fixed client nonce for deterministic exchanges.
    #[must_use]
    pub(crate) fn with_cnonce(
        username: &str,
        password: &str,
        authz_id: &str,
        digest_uri: &str,
        cnonce: &str,
    ) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            authz_id: authz_id.to_string(),
            digest_uri: digest_uri.to_string(),
            cnonce: cnonce.to_string(),
            realm: String::new(),
            nonce: String::new(),
            step: DigestStep::Initial,
        }
    }

    /// `response` / `rspauth` value per RFC 2831 section 2.1.2.1.
    fn compute_response(&self, for_rspauth: bool) -> String {
        let mut a1 = Vec::new();
        a1.extend_from_slice(&md5_raw(
            format!("{}:{}:{}", self.username, self.realm, self.password).as_bytes(),
        ));
        a1.extend_from_slice(format!(":{}:{}", self.nonce, self.cnonce).as_bytes());
        let ha1 = hex(&md5_raw(&a1));

        let a2 = if for_rspauth {
            format!(":{}", self.digest_uri)
        } else {
            format!("AUTHENTICATE:{}", self.digest_uri)
        };
        let ha2 = hex(&md5_raw(a2.as_bytes()));

        hex(&md5_raw(
            format!(
                "{ha1}:{}:00000001:{}:auth:{ha2}",
                self.nonce, self.cnonce
            )
            .as_bytes(),
        ))
    }

    fn digest_response(&self) -> String {
        let mut out = format!("username=\"{}\",", self.username);
        if !self.realm.is_empty() {
            out.push_str(&format!("realm=\"{}\",", self.realm));
        }
        out.push_str(&format!(
            "nonce=\"{}\",cnonce=\"{}\",nc=00000001,qop=auth,digest-uri=\"{}\",response={}",
            self.nonce,
            self.cnonce,
            self.digest_uri,
            self.compute_response(false)
        ));
        if !self.authz_id.is_empty() {
            out.push_str(&format!(",authzid=\"{}\"", self.authz_id));
        }
        out
    }

    fn check_rspauth(&self, challenge: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(challenge);
        let text = text.trim().trim_matches('"');
        let expected = format!("rspauth={}", self.compute_response(true));
        if text == expected {
            Ok(())
        } else {
            Err(Error::Auth("bad rspauth challenge from server".into()))
        }
    }
}

impl Mechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        match self.step {
            DigestStep::Initial => {
                let params = parse_challenge(challenge);
                self.nonce = params
                    .iter()
                    .find(|(k, _)| k == "nonce")
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| Error::Auth("DIGEST-MD5 challenge without nonce".into()))?;
                self.realm = params
                    .iter()
                    .find(|(k, _)| k == "realm")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                self.step = DigestStep::AwaitRspauth;
                Ok(self.digest_response().into_bytes())
            }
            DigestStep::AwaitRspauth => {
                self.check_rspauth(challenge)?;
                self.step = DigestStep::Done;
                Ok(Vec::new())
            }
            DigestStep::Done => Err(Error::Auth("DIGEST-MD5 exchange already complete".into())),
        }
    }

    fn verify_completion(&mut self, data: &[u8]) -> Result<()> {
        // some servers deliver rspauth in the OK completion instead of a
        // separate challenge
        if matches!(self.step, DigestStep::AwaitRspauth) {
            self.check_rspauth(data)?;
            self.step = DigestStep::Done;
        }
        Ok(())
    }
}

/// Splits an RFC 2831 challenge into key/value pairs, honoring quotes.
fn parse_challenge(challenge: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(challenge);
    let mut params = Vec::new();
    let mut rest = text.as_ref();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];
        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let Some(close) = stripped.find('"') else { break };
            value = stripped[..close].to_string();
            rest = stripped[close + 1..].trim_start_matches(',');
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = rest.get(end + 1..).unwrap_or("");
        }
        params.push((key, value));
    }
    params
}

fn md5_raw(data: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn encode_b64(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
