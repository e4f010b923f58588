use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::JsiiError;

/// Hard cap on a single wire line. The protocol recommends at least
/// 1 MiB; large assemblies and snapshot payloads want headroom.
pub(crate) const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// One end of the line-delimited JSON wire: requests out, responses in.
///
/// The stream is transport-agnostic so tests can drive it over an
/// in-memory duplex pipe instead of child stdio.
pub(crate) struct WireStream {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    line: String,
}

/// Outcome of one read: a parsed message, or end-of-stream. EOF is
/// surfaced separately so the engine can attribute it to process death.
#[derive(Debug)]
pub(crate) enum WireRead {
    Message(Map<String, Value>),
    Eof,
}

impl WireStream {
    pub(crate) fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(writer),
            line: String::new(),
        }
    }

    /// Reads the next non-blank line and parses it as a single JSON
    /// object. Oversize lines and parse failures are protocol
    /// violations.
    pub(crate) async fn read_message(&mut self) -> Result<WireRead, JsiiError> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(|source| {
                    JsiiError::Protocol(format!("failed to read from kernel stdout: {source}"))
                })?;
            if read == 0 {
                return Ok(WireRead::Eof);
            }
            if self.line.len() > MAX_LINE_BYTES {
                return Err(JsiiError::Protocol(format!(
                    "kernel response line exceeds {MAX_LINE_BYTES} bytes"
                )));
            }

            let trimmed = self.line.trim_end_matches(['\r', '\n']);
            if trimmed.trim().is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(trimmed).map_err(|source| {
                JsiiError::Protocol(format!("kernel response is not valid JSON: {source}"))
            })?;
            return match value {
                Value::Object(map) => Ok(WireRead::Message(map)),
                other => Err(JsiiError::Protocol(format!(
                    "kernel response must be a JSON object, got: {other}"
                ))),
            };
        }
    }

    /// Serializes `message` compactly onto a single line and flushes.
    pub(crate) async fn write_message(&mut self, message: &impl Serialize) -> Result<(), JsiiError> {
        let mut payload = serde_json::to_string(message).map_err(|source| {
            JsiiError::Protocol(format!("failed to serialize request: {source}"))
        })?;
        payload.push('\n');
        self.writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|source| {
                JsiiError::Protocol(format!("failed to write to kernel stdin: {source}"))
            })?;
        self.writer.flush().await.map_err(|source| {
            JsiiError::Protocol(format!("failed to flush kernel stdin: {source}"))
        })
    }
}
