use std::sync::{Arc, Mutex};

use rhai::{Engine, EvalAltResult, Scope};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use bridge_transport::{BufferedLineReader, StatusRecord, MAX_LINE_BYTES};

use crate::error::ReplError;
use crate::submission::{read_submission, DELIMITER};

/// Persistent interactive evaluator: one `Engine` + `Scope` survive across
/// submissions so globals declared in one block are visible in the next.
pub struct ReplBridge {
    engine: Engine,
    scope: Scope<'static>,
    capture_combined: bool,
    captured: Arc<Mutex<String>>,
}

impl Default for ReplBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplBridge {
    pub fn new() -> Self {
        let captured = Arc::new(Mutex::new(String::new()));

        let mut engine = Engine::new();
        let print_sink = captured.clone();
        engine.on_print(move |text| {
            let mut buf = print_sink.lock().unwrap();
            buf.push_str(text);
            buf.push('\n');
        });
        let debug_sink = captured.clone();
        engine.on_debug(move |text, _source, _pos| {
            let mut buf = debug_sink.lock().unwrap();
            buf.push_str(text);
            buf.push('\n');
        });

        Self {
            engine,
            scope: Scope::new(),
            capture_combined: true,
            captured,
        }
    }

    /// Drives the REPL loop: read a delimited submission, execute it (or
    /// toggle combined capture), write captured output plus the delimiter,
    /// and emit one status record per submission, until the input pipe
    /// closes cleanly.
    pub async fn run<R, W, S>(&mut self, input: R, mut output: W, mut status: S) -> Result<(), ReplError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        S: AsyncWrite + Unpin,
    {
        let mut reader = BufferedLineReader::new(input, MAX_LINE_BYTES);

        loop {
            let submission = match read_submission(&mut reader).await? {
                Some(submission) => submission,
                None => break,
            };

            if submission.line_count == 1 {
                if let Some(rest) = submission.text.strip_prefix("__CAPTURE_COMBINED__ =") {
                    self.capture_combined = rest.trim() == "true";
                    continue;
                }
            }

            let record = self.execute(&submission.text);

            if self.capture_combined {
                let mut buf = self.captured.lock().unwrap();
                if !buf.is_empty() {
                    output.write_all(buf.as_bytes()).await?;
                }
                buf.clear();
            } else {
                self.captured.lock().unwrap().clear();
            }
            output.write_all(&DELIMITER).await?;
            output.flush().await?;

            let mut line = serde_json::to_vec(&record).expect("StatusRecord always serializes");
            line.push(b'\n');
            status.write_all(&line).await?;
            status.flush().await?;
        }

        Ok(())
    }

    fn execute(&mut self, source: &str) -> StatusRecord {
        match self.engine.eval_with_scope::<rhai::Dynamic>(&mut self.scope, source) {
            Ok(_) => StatusRecord::ok(),
            Err(err) => {
                debug!(error = %err, "repl submission failed");
                let (exception, message) = classify(&err);
                StatusRecord::Exception {
                    exception,
                    message,
                    traceback: err.to_string(),
                }
            }
        }
    }
}

fn classify(err: &EvalAltResult) -> (String, String) {
    let exception = match err {
        EvalAltResult::ErrorParsing(..) => "ParseError",
        EvalAltResult::ErrorRuntime(..) => "RuntimeError",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorVariableNotFound(..) => "VariableNotFound",
        EvalAltResult::ErrorMismatchDataType(..) => "TypeMismatch",
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => {
            "IndexOutOfBounds"
        }
        _ => "ScriptError",
    };
    (exception.to_string(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_submissions_each_emit_one_ok_status() {
        let mut input = b"let x = 1;".to_vec();
        input.extend_from_slice(&[0x01, 0x02, 0x03, b'\n']);
        input.extend_from_slice(b"x + 1");
        input.extend_from_slice(&[0x01, 0x02, 0x03, b'\n']);

        let mut bridge = ReplBridge::new();
        let mut output = Vec::new();
        let mut status = Vec::new();

        bridge
            .run(std::io::Cursor::new(input), &mut output, &mut status)
            .await
            .unwrap();

        let status_text = String::from_utf8(status).unwrap();
        let records: Vec<&str> = status_text.lines().collect();
        assert_eq!(records.len(), 2);
        for record in records {
            let parsed: StatusRecord = serde_json::from_str(record).unwrap();
            assert_eq!(parsed, StatusRecord::ok());
        }

        // two delimiters, no other bytes (nothing printed)
        assert_eq!(output, [&DELIMITER[..], &DELIMITER[..]].concat());
    }

    #[tokio::test]
    async fn print_output_is_forwarded_when_capture_enabled() {
        let mut input = b"print(\"hello\");".to_vec();
        input.extend_from_slice(&[0x01, 0x02, 0x03, b'\n']);

        let mut bridge = ReplBridge::new();
        let mut output = Vec::new();
        let mut status = Vec::new();
        bridge
            .run(std::io::Cursor::new(input), &mut output, &mut status)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("hello\n"));
        assert!(text.ends_with(std::str::from_utf8(&DELIMITER).unwrap()));
    }

    #[tokio::test]
    async fn capture_combined_sentinel_toggles_without_executing() {
        let mut input = b"__CAPTURE_COMBINED__ = false".to_vec();
        input.extend_from_slice(&[0x01, 0x02, 0x03, b'\n']);
        input.extend_from_slice(b"print(\"quiet\");");
        input.extend_from_slice(&[0x01, 0x02, 0x03, b'\n']);

        let mut bridge = ReplBridge::new();
        let mut output = Vec::new();
        let mut status = Vec::new();
        bridge
            .run(std::io::Cursor::new(input), &mut output, &mut status)
            .await
            .unwrap();

        // only one submission actually executed (the toggle line doesn't
        // count), so only one delimiter and one status record.
        assert_eq!(output, DELIMITER.to_vec());
        let status_text = String::from_utf8(status).unwrap();
        assert_eq!(status_text.lines().count(), 1);
    }

    #[tokio::test]
    async fn runtime_error_is_reported_as_exception_status() {
        let mut input = b"throw \"boom\";".to_vec();
        input.extend_from_slice(&[0x01, 0x02, 0x03, b'\n']);

        let mut bridge = ReplBridge::new();
        let mut output = Vec::new();
        let mut status = Vec::new();
        bridge
            .run(std::io::Cursor::new(input), &mut output, &mut status)
            .await
            .unwrap();

        let status_text = String::from_utf8(status).unwrap();
        let parsed: StatusRecord = serde_json::from_str(status_text.lines().next().unwrap()).unwrap();
        assert!(matches!(parsed, StatusRecord::Exception { .. }));
    }
}
