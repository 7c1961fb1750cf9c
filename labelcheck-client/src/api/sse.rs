//! Incremental Server-Sent Events decoding
//!
//! Turns a chunked byte stream into complete SSE messages, then into batch
//! progress snapshots. Chunk boundaries may fall anywhere, including inside
//! a multi-byte UTF-8 sequence, so bytes are buffered until a full line is
//! available.

use super::ProgressStream;
use crate::error::ApiError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use labelcheck_common::types::BatchProgressSnapshot;
use std::fmt::Display;
use tracing::trace;

/// One dispatched SSE message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// `event:` field, if the server named the event
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`
    pub data: String,
}

/// Longest line or message body buffered before giving up on it
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Line-oriented SSE parser state
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    max_bytes: usize,
    /// Dropping the rest of an oversized line
    skipping: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_MESSAGE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            max_bytes,
            skipping: false,
        }
    }

    /// Feed a chunk; returns every message completed by it
    ///
    /// A line or message longer than the limit is dropped and reported as
    /// [`ApiError::Decode`]; decoding resumes at the next line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<SseMessage, ApiError>> {
        let mut chunk = chunk;
        if self.skipping {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(newline) => {
                    self.skipping = false;
                    chunk = &chunk[newline + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
        }

        if self.buffer.len() > self.max_bytes {
            self.buffer.clear();
            self.discard_message();
            self.skipping = true;
            messages.push(Err(self.overflow()));
        }
        messages
    }

    fn overflow(&self) -> ApiError {
        ApiError::Decode(format!("message exceeds {} bytes", self.max_bytes))
    }

    fn discard_message(&mut self) {
        self.event = None;
        self.data.clear();
        self.data_len = 0;
    }

    fn process_line(&mut self, line: &str) -> Option<Result<SseMessage, ApiError>> {
        if line.is_empty() {
            return self.dispatch().map(Ok);
        }

        // Comment (heartbeats)
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data_len += value.len() + 1;
                if self.data_len > self.max_bytes {
                    self.discard_message();
                    return Some(Err(self.overflow()));
                }
                self.data.push(value.to_string());
            }
            "event" => self.event = Some(value.to_string()),
            // id / retry carry nothing this client uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        self.data_len = 0;
        Some(SseMessage { event, data })
    }
}

/// Decode one message body as a progress snapshot
pub fn parse_snapshot(message: &SseMessage) -> Result<BatchProgressSnapshot, ApiError> {
    serde_json::from_str(&message.data)
        .map_err(|e| ApiError::Decode(format!("progress message {:?}: {}", message.data, e)))
}

/// Wrap a raw byte stream as a stream of progress snapshots
///
/// A transport error is yielded once and ends the stream. A message that is
/// not a snapshot yields `ApiError::Decode` and decoding continues.
pub fn progress_stream<S, E>(bytes: S) -> ProgressStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for message in decoder.feed(&chunk) {
                        match message {
                            Ok(message) => {
                                trace!(data = %message.data, "SSE message");
                                yield parse_snapshot(&message);
                            }
                            Err(e) => yield Err(e),
                        }
                    }
                }
                Err(e) => {
                    yield Err(ApiError::Network(e.to_string()));
                    return;
                }
            }
        }
    })
}
