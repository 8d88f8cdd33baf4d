//! # sievekit-managesieve
//!
//! A ManageSieve (RFC 5804) client for managing Sieve scripts on a remote
//! server.
//!
//! ## Features
//!
//! - **Full mandatory command set**: CAPABILITY, STARTTLS, AUTHENTICATE,
//!   HAVESPACE, PUTSCRIPT, LISTSCRIPTS, SETACTIVE, GETSCRIPT,
//!   DELETESCRIPT, RENAMESCRIPT, plus CHECKSCRIPT, NOOP and
//!   UNAUTHENTICATE where the server supports them
//! - **Simulated rename**: servers without `RENAME` get a
//!   get/put/setactive/delete sequence with rollback
//! - **SASL**: DIGEST-MD5, PLAIN, LOGIN and OAUTHBEARER
//! - **TLS via rustls**: opportunistic STARTTLS upgrade
//! - **Deadline per operation**: every socket interaction is bounded by
//!   the configured I/O timeout
//!
//! ## Quick start
//!
//! ```ignore
//! use sievekit_managesieve::{Client, Config};
//!
//! #[tokio::main]
//! async fn main() -> sievekit_managesieve::Result<()> {
//!     let mut client = Client::new(Config::new("sieve.example.com"));
//!     client.connect().await?;
//!     client.authenticate("user", "password", None).await?;
//!
//!     client.putscript("vacation", "require \"vacation\";\n").await?;
//!     client.setactive("vacation").await?;
//!     let (active, scripts) = client.listscripts().await?;
//!     println!("active: {active:?}, all: {scripts:?}");
//!
//!     client.logout().await
//! }
//! ```
//!
//! ## Session lifecycle
//!
//! ```text
//! Disconnected ── connect() ──→ Greeted ── authenticate() ──→ Authenticated
//!       ↑                          │ starttls() (loops back)       │
//!       └────── BYE ───────────────┴──────── logout() ──→ LoggedOut
//! ```
//!
//! Transport, protocol and timeout errors poison the session (state
//! `Failed`); `NO` completions surface as [`Error::ServerNo`] and leave it
//! usable; a failed AUTHENTICATE leaves it in `Greeted` for a retry.
//!
//! ## Modules
//!
//! - [`command`]: command serialization
//! - [`connection`]: streams, framing, configuration
//! - [`protocol`]: response parsing, capabilities, session state
//! - [`sasl`]: authentication mechanisms

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
pub mod command;
pub mod connection;
mod error;
pub mod protocol;
pub mod sasl;

pub use client::Client;
pub use command::Command;
pub use connection::{Config, ConfigBuilder, DEFAULT_PORT, FramedStream, Security, SieveStream};
pub use error::{Error, Result};
pub use protocol::{
    Capabilities, Completion, ResponseCode, ResponseStatus, ScriptEntry, SessionState,
};
pub use sasl::{Mechanism, SUPPORTED_MECHANISMS};
