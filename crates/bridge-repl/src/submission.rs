use tokio::io::AsyncRead;

use bridge_transport::BufferedLineReader;

use crate::error::ReplError;

/// The three-byte tail that, appended to the end of a line (whose own
/// trailing newline `BufferedLineReader` has already stripped), marks the
/// end of one REPL submission.
pub const DELIMITER_TAIL: [u8; 3] = [0x01, 0x02, 0x03];

/// The literal four-byte delimiter as written back on the output pipe.
pub const DELIMITER: [u8; 4] = [0x01, 0x02, 0x03, 0x0A];

pub struct Submission {
    pub text: String,
    pub line_count: usize,
}

/// Accumulates lines until one ends with [`DELIMITER_TAIL`], stripping it
/// and returning everything read as one submission. Returns `Ok(None)` on a
/// clean end-of-stream with nothing buffered.
pub async fn read_submission<R: AsyncRead + Unpin>(
    reader: &mut BufferedLineReader<R>,
) -> Result<Option<Submission>, ReplError> {
    let mut buffer = String::new();
    let mut line_count = 0usize;

    loop {
        let line = match reader.read_line().await? {
            Some(line) => line,
            None => {
                if line_count == 0 {
                    return Ok(None);
                }
                return Ok(Some(Submission {
                    text: buffer,
                    line_count,
                }));
            }
        };
        line_count += 1;

        if let Some(stripped) = strip_delimiter_tail(&line) {
            buffer.push_str(&String::from_utf8_lossy(stripped));
            return Ok(Some(Submission {
                text: buffer,
                line_count,
            }));
        }

        buffer.push_str(&String::from_utf8_lossy(&line));
        buffer.push('\n');
    }
}

fn strip_delimiter_tail(line: &[u8]) -> Option<&[u8]> {
    if line.ends_with(&DELIMITER_TAIL) {
        Some(&line[..line.len() - DELIMITER_TAIL.len()])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_line_submission_strips_delimiter() {
        let mut data = b"__CAPTURE_COMBINED__ = false".to_vec();
        data.extend_from_slice(&DELIMITER_TAIL);
        data.push(b'\n');
        let mut reader = BufferedLineReader::new(std::io::Cursor::new(data), 4096);

        let submission = read_submission(&mut reader).await.unwrap().unwrap();
        assert_eq!(submission.text, "__CAPTURE_COMBINED__ = false");
        assert_eq!(submission.line_count, 1);
    }

    #[tokio::test]
    async fn multi_line_submission_is_accumulated() {
        let mut data = b"let x = 1;\nlet y = 2;\nx + y".to_vec();
        data.extend_from_slice(&DELIMITER_TAIL);
        data.push(b'\n');
        let mut reader = BufferedLineReader::new(std::io::Cursor::new(data), 4096);

        let submission = read_submission(&mut reader).await.unwrap().unwrap();
        assert_eq!(submission.text, "let x = 1;\nlet y = 2;\nx + y");
        assert_eq!(submission.line_count, 3);
    }

    #[tokio::test]
    async fn clean_eof_with_nothing_buffered_is_none() {
        let mut reader = BufferedLineReader::new(std::io::Cursor::new(Vec::new()), 4096);
        assert!(read_submission(&mut reader).await.unwrap().is_none());
    }
}
