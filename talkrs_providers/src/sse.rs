//! Server-Sent Events decoding for streamed chat completions.
//!
//! OpenAI-compatible endpoints stream one JSON chunk per `data:` event and
//! finish with a literal `[DONE]` event.

use anyhow::anyhow;
use futures_util::{StreamExt, stream};
use talkrs_core::DeltaStream;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio_util::io::StreamReader;

const DONE_MARKER: &str = "[DONE]";

/// A single SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Line-oriented SSE framing.
#[derive(Debug, Default)]
pub struct SseDecoder {
    current_event: Option<String>,
    current_data: String,
}

impl SseDecoder {
    /// Feed one line (without its terminator). Returns an event when the
    /// line completes one.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }

        if let Some(event_type) = field_value(line, "event") {
            self.current_event = Some(event_type.to_string());
        } else if let Some(data) = field_value(line, "data") {
            if !self.current_data.is_empty() {
                self.current_data.push('\n');
            }
            self.current_data.push_str(data);
        }
        // id:, retry: and comments are ignored
        None
    }

    /// Flush an event left open when the body ended without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take_event()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        let event = self.current_event.take();
        if self.current_data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.current_data),
        })
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Extract the content fragment from one chunk.
///
/// Chunks without content (role announcements, finish reasons) yield `None`.
/// An `error` object in the stream is surfaced as an error.
pub fn parse_chunk(data: &str) -> anyhow::Result<Option<String>> {
    let chunk: serde_json::Value =
        serde_json::from_str(data).map_err(|e| anyhow!("Invalid stream chunk: {e}"))?;

    if let Some(error) = chunk.get("error") {
        let message = error["message"]
            .as_str()
            .map_or_else(|| error.to_string(), ToString::to_string);
        return Err(anyhow!("Upstream stream error: {message}"));
    }

    Ok(chunk["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(ToString::to_string))
}

struct SseState<R> {
    lines: Lines<R>,
    decoder: SseDecoder,
    finished: bool,
}

/// Turn a streaming HTTP response into a stream of content fragments.
///
/// Empty fragments are skipped. The stream ends after `[DONE]` or when the
/// body ends; a read or decode failure is yielded once and ends the stream.
pub fn delta_stream(response: reqwest::Response) -> DeltaStream {
    let bytes = Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other)),
    );
    let state = SseState {
        lines: BufReader::new(StreamReader::new(bytes)).lines(),
        decoder: SseDecoder::default(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        while !state.finished {
            let event = match state.lines.next_line().await {
                Ok(Some(line)) => state.decoder.push_line(&line),
                Ok(None) => {
                    state.finished = true;
                    state.decoder.finish()
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(anyhow!("Stream read failed: {e}")), state));
                }
            };

            let Some(event) = event else {
                continue;
            };
            if event.data == DONE_MARKER {
                state.finished = true;
                break;
            }
            match parse_chunk(&event.data) {
                Ok(Some(delta)) => return Some((Ok(delta), state)),
                Ok(None) => {}
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
        None
    })
    .boxed()
}
