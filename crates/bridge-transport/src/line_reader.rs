use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::TransportError;

const CHUNK_SIZE_BYTES: usize = 8192;

/// Accumulates bytes from an [`AsyncRead`] into newline-delimited lines,
/// carrying any bytes read past a trailing newline over to the next call.
///
/// Mirrors the chunked accumulation state machine used elsewhere in this
/// codebase for bounded line ingestion, generalized from a synchronous
/// diagnostics reader to the async wire transport itself. Lines longer
/// than `max_line_bytes` are discarded byte-for-byte until their trailing
/// newline is found, then surfaced as [`TransportError::LineTooLong`];
/// iteration resumes cleanly with the next line.
pub struct BufferedLineReader<R> {
    reader: R,
    max_line_bytes: usize,
    chunk: [u8; CHUNK_SIZE_BYTES],
    current: Vec<u8>,
    carry: Vec<u8>,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> BufferedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            chunk: [0u8; CHUNK_SIZE_BYTES],
            current: Vec::new(),
            carry: Vec::new(),
            discarding: false,
        }
    }

    /// Reads up to and including the next newline, returning the line with
    /// the newline stripped. Returns `Ok(None)` on a clean end-of-stream
    /// with no partial line buffered.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            if !self.carry.is_empty() {
                if let Some(result) = self.consume_carry() {
                    return result;
                }
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if self.discarding {
                    self.discarding = false;
                    self.current.clear();
                    return Err(TransportError::LineTooLong {
                        max_bytes: self.max_line_bytes,
                    });
                }
                if self.current.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.current)));
            }
            self.carry.extend_from_slice(&self.chunk[..n]);
        }
    }

    /// Consumes as much of `self.carry` as yields complete lines, returning
    /// `Some(result)` the first time a line (or an oversized-line error) is
    /// ready, or `None` once `carry` is drained with only a partial line
    /// left in `current`.
    fn consume_carry(&mut self) -> Option<Result<Option<Vec<u8>>, TransportError>> {
        while let Some(idx) = self.carry.iter().position(|b| *b == b'\n') {
            let mut segment: Vec<u8> = self.carry.drain(..=idx).collect();
            segment.pop(); // drop the newline

            if self.discarding {
                self.discarding = false;
                self.current.clear();
                return Some(Err(TransportError::LineTooLong {
                    max_bytes: self.max_line_bytes,
                }));
            }

            self.current.extend_from_slice(&segment);
            if self.current.len() > self.max_line_bytes {
                self.current.clear();
                return Some(Err(TransportError::LineTooLong {
                    max_bytes: self.max_line_bytes,
                }));
            }

            let mut line = std::mem::take(&mut self.current);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Some(Ok(Some(line)));
        }

        // No newline left in carry: fold it into current, discarding once
        // oversized so memory stays bounded while we wait for the newline.
        if self.discarding {
            self.carry.clear();
        } else {
            self.current.extend_from_slice(&self.carry);
            self.carry.clear();
            if self.current.len() > self.max_line_bytes {
                self.discarding = true;
                self.current.clear();
            }
        }
        None
    }
}
