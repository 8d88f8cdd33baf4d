//! Connection management: TCP/TLS streams, framing, configuration.

mod config;
mod framed;
mod stream;

pub use config::{Config, ConfigBuilder, DEFAULT_PORT, Security};
pub use framed::FramedStream;
pub use stream::{SieveStream, connect_plain, create_tls_connector};
