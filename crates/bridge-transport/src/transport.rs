use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::error::TransportError;
use crate::line_reader::BufferedLineReader;

/// Default cap on a single framed line, matching the contract that the
/// reader must tolerate lines up to at least 16 MiB (program bundles travel
/// out-of-band, so the wire itself never needs to carry one).
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Newline-delimited JSON framing over a pair of byte streams.
///
/// Owns both halves exclusively: callers route every read/write through
/// [`FramedTransport::get`]/[`FramedTransport::put`] so that two JSON
/// values can never interleave on one line.
pub struct FramedTransport<R, W> {
    reader: BufferedLineReader<R>,
    writer: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> FramedTransport<R, W> {
    pub fn new(read_half: R, write_half: W) -> Self {
        Self::with_max_line_bytes(read_half, write_half, MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(read_half: R, write_half: W, max_line_bytes: usize) -> Self {
        Self {
            reader: BufferedLineReader::new(read_half, max_line_bytes),
            writer: write_half,
        }
    }

    /// Serializes `value` as one JSON line and writes it.
    ///
    /// `blocking = true` awaits up to `timeout` (if given) for the write to
    /// complete; `blocking = false` performs one write attempt and fails
    /// with [`TransportError::WouldBlock`] if it cannot finish immediately
    /// (approximated here as a zero-duration timeout, since a buffered pipe
    /// write rarely partially blocks in practice).
    pub async fn put<T: Serialize>(
        &mut self,
        value: &T,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let write_all = self.writer.write_all(&line);
        if blocking {
            match timeout {
                Some(duration) => time::timeout(duration, write_all)
                    .await
                    .map_err(|_| TransportError::Timeout(duration))??,
                None => write_all.await?,
            }
        } else {
            match time::timeout(Duration::ZERO, write_all).await {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::WouldBlock),
            }
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads the next JSON line and deserializes it as `T`.
    ///
    /// An empty read (end-of-stream) fails with [`TransportError::Closed`].
    pub async fn get<T: DeserializeOwned>(
        &mut self,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<T, TransportError> {
        let bytes = if blocking {
            match timeout {
                Some(duration) => time::timeout(duration, self.reader.read_line())
                    .await
                    .map_err(|_| TransportError::Timeout(duration))??,
                None => self.reader.read_line().await?,
            }
        } else {
            match time::timeout(Duration::ZERO, self.reader.read_line()).await {
                Ok(result) => result?,
                Err(_) => return Err(TransportError::WouldBlock),
            }
        };

        let bytes = bytes.ok_or(TransportError::Closed)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Closes the write half. The read half is dropped with `self`.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trips_a_value_over_a_loopback_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut a = FramedTransport::new(client_read, client_write);
        let mut b = FramedTransport::new(server_read, server_write);

        let value = json!({"command": "greet", "data": {"name": "Ada"}});
        a.put(&value, true, None).await.unwrap();
        let received: serde_json::Value = b.get(true, None).await.unwrap();
        assert_eq!(received, value);
    }

    #[tokio::test]
    async fn preserves_order_across_multiple_puts() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut a = FramedTransport::new(client_read, client_write);
        let mut b = FramedTransport::new(server_read, server_write);

        for i in 0..5 {
            a.put(&json!({"i": i}), true, None).await.unwrap();
        }
        for i in 0..5 {
            let v: serde_json::Value = b.get(true, None).await.unwrap();
            assert_eq!(v, json!({"i": i}));
        }
    }

    #[tokio::test]
    async fn closed_stream_surfaces_closed_error() {
        let (client, server) = tokio::io::duplex(4096);
        let (_client_read, client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        drop(client_write);
        let mut b = FramedTransport::new(server_read, tokio::io::sink());
        let err = b.get::<serde_json::Value>(true, None).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn get_times_out_when_nothing_arrives() {
        let (_client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let mut b = FramedTransport::new(server_read, tokio::io::sink());

        let err = b
            .get::<serde_json::Value>(true, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
