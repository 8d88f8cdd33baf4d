//! Framed I/O for the ManageSieve protocol.
//!
//! ManageSieve is CRLF line oriented; `{n}`/`{n+}` markers introduce
//! exactly `n` octets of opaque payload. This module provides buffered
//! line reading, exact-size block reading and buffered writing on top of
//! any async stream.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::Result;

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
pub(crate) const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Framed connection for the ManageSieve protocol.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads a single line, stripping the CRLF terminator.
    ///
    /// A lone LF terminator is tolerated; some servers are sloppy about it
    /// in capability listings.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(crate::Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                line.extend_from_slice(&buf[..pos]);
                self.reader.consume(pos + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > MAX_LINE_LENGTH {
                return Err(crate::Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Reads exactly `size` octets of literal payload.
    pub async fn read_block(&mut self, size: usize) -> Result<Vec<u8>> {
        if size > MAX_LITERAL_SIZE {
            return Err(crate::Error::Protocol(format!(
                "literal too large: {size} bytes (max {MAX_LITERAL_SIZE})"
            )));
        }
        let mut block = vec![0u8; size];
        self.reader.read_exact(&mut block).await?;
        Ok(block)
    }

    /// Writes a complete command (caller includes the trailing CRLF) and
    /// flushes.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;

        Ok(())
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Used for the STARTTLS upgrade; the server must not pipeline data
    /// after its `OK`, so the read buffer is expected to be empty.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_line_strips_crlf() {
        let mock = Builder::new().read(b"OK \"done\"\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_line().await.unwrap(), b"OK \"done\"");
    }

    #[tokio::test]
    async fn test_read_line_tolerates_bare_lf() {
        let mock = Builder::new().read(b"\"SASL\" \"PLAIN\"\nOK\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_line().await.unwrap(), b"\"SASL\" \"PLAIN\"");
        assert_eq!(framed.read_line().await.unwrap(), b"OK");
    }

    #[tokio::test]
    async fn test_read_line_across_chunks() {
        let mock = Builder::new().read(b"OK \"spl").read(b"it\"\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_line().await.unwrap(), b"OK \"split\"");
    }

    #[tokio::test]
    async fn test_read_block_exact() {
        let mock = Builder::new().read(b"hello\r\nOK\r\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_block(5).await.unwrap(), b"hello");
        assert_eq!(framed.read_line().await.unwrap(), b"");
        assert_eq!(framed.read_line().await.unwrap(), b"OK");
    }

    #[tokio::test]
    async fn test_read_block_rejects_oversize() {
        let mock = Builder::new().build();
        let mut framed = FramedStream::new(mock);
        let result = framed.read_block(MAX_LITERAL_SIZE + 1).await;
        assert!(result.unwrap_err().to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_eof_is_an_error() {
        let mock = Builder::new().build();
        let mut framed = FramedStream::new(mock);
        assert!(framed.read_line().await.is_err());
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"LISTSCRIPTS\r\n").build();
        let mut framed = FramedStream::new(mock);
        framed.write_command(b"LISTSCRIPTS\r\n").await.unwrap();
    }
}
