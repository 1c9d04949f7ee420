//! Decoding of streamed flow runs.
//!
//! With `stream=true` the run endpoint answers with one JSON event per line:
//! `token` events carry a `chunk` of the reply, `end` carries the complete run
//! response and `error` reports a failed run.

use crate::chat_flow::{ForwardError, reply_from_value};
use futures_util::{Stream, StreamExt, stream};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, warn};

/// The reply of a streamed run, one chunk at a time.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ForwardError>> + Send>>;

#[derive(Deserialize, Debug)]
struct StreamEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Incremental decoder for the line-delimited event body.
///
/// Once an `end` or `error` event has been seen the decoder is finished and
/// ignores further input. A run that ends without yielding any text is an
/// error, so callers always see at least one item.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    emitted: bool,
    finished: bool,
}

impl StreamDecoder {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one body chunk and returns the items completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, ForwardError>> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line, &mut out);
            if self.finished {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flushes the last unterminated line once the body is exhausted.
    pub fn finish(&mut self) -> Vec<Result<String, ForwardError>> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest, &mut out);
        if !self.finished {
            self.finished = true;
            if !self.emitted {
                out.push(Err(ForwardError::MalformedResponse(
                    "stream ended without a reply".to_string(),
                )));
            }
        }
        out
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<Result<String, ForwardError>>) {
        let line = line.trim_ascii();
        let line = line.strip_prefix(b"data:").unwrap_or(line).trim_ascii();
        if line.is_empty() {
            return;
        }

        let event: StreamEvent = match serde_json::from_slice(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    error = %e,
                    line = %String::from_utf8_lossy(line),
                    "Skipping undecodable Langflow stream line"
                );
                return;
            }
        };

        match event.event.as_str() {
            "token" => {
                if let Some(chunk) = event
                    .data
                    .get("chunk")
                    .and_then(Value::as_str)
                    .filter(|chunk| !chunk.is_empty())
                {
                    self.emitted = true;
                    out.push(Ok(chunk.to_string()));
                }
            }
            "end" => {
                self.finished = true;
                // Flows without a streaming component only report the result.
                if !self.emitted {
                    let reply = match event.data.get("result") {
                        Some(result) => reply_from_value(result),
                        None => Err(ForwardError::MalformedResponse(
                            "`end` event without a result".to_string(),
                        )),
                    };
                    out.push(reply);
                }
            }
            "error" => {
                self.finished = true;
                let message = event
                    .data
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| event.data.to_string());
                out.push(Err(ForwardError::FlowError(message)));
            }
            other => debug!(event = other, "Ignoring Langflow stream event"),
        }
    }
}

/// Adapts a streamed response body into reply chunks.
pub fn token_stream<S, B>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = (Box::pin(body), StreamDecoder::default(), VecDeque::new());
    Box::pin(stream::unfold(
        state,
        |(mut body, mut decoder, mut pending)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (body, decoder, pending)));
                }
                if decoder.is_finished() {
                    return None;
                }
                match body.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(chunk.as_ref())),
                    Some(Err(e)) => {
                        decoder.finished = true;
                        pending.push_back(Err(ForwardError::Transport(e)));
                    }
                    None => pending.extend(decoder.finish()),
                }
            }
        },
    ))
}
