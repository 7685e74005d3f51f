use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tracing::trace;

/// Stream of incremental assistant text produced by a streaming chat
/// completion.
///
/// Parses the server-sent-event framing used by OpenAI-compatible
/// endpoints: each event is a `data: {json}` line, and the final event
/// is the literal `data: [DONE]`. Empty deltas are skipped.
pub struct TokenStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: BytesMut,
    pending: VecDeque<String>,
    finished: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl TokenStream {
    pub(crate) fn new(inner: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(inner),
            buffer: BytesMut::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Consume complete lines from the buffer, queueing any text deltas.
    /// Returns `Ok(true)` once the terminal `[DONE]` event is seen.
    ///
    /// The buffer holds raw bytes so that a multi-byte character split
    /// across network reads is only decoded once the line is complete.
    fn drain_buffered_lines(&mut self) -> Result<bool> {
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(newline_pos + 1);
            let line = String::from_utf8_lossy(&raw);

            let Some(payload) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();

            if payload == "[DONE]" {
                return Ok(true);
            }
            if payload.is_empty() {
                continue;
            }

            let chunk: StreamChunk = serde_json::from_str(payload)
                .with_context(|| format!("Failed to parse stream event: {payload}"))?;

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    trace!(delta_len = content.len(), "Received stream delta");
                    self.pending.push_back(content);
                }
            }
        }

        Ok(false)
    }
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(delta)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                    match self.drain_buffered_lines() {
                        Ok(done) => self.finished = done,
                        Err(e) => {
                            self.finished = true;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(
                        anyhow::Error::new(e).context("Error reading chat completion stream")
                    )));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
