//! Server-sent-event decoding for streamed chat completions.
//!
//! Chunks arrive as `data: {json}` lines; the stream ends with
//! `data: [DONE]`. Text deltas, audio data and audio transcript are
//! accumulated separately.

use serde_json::Value;
use tracing::{debug, warn};

use super::{AudioReply, ChatReply};

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    text: String,
    audio_data: String,
    transcript: String,
    done: bool,
    chunks: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes. Partial lines are held until their newline arrives,
    /// so multi-byte characters split across chunks decode intact.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.done {
            return;
        }
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.line(line.trim_end_matches(['\n', '\r']));
            if self.done {
                self.pending.clear();
                break;
            }
        }
    }

    fn line(&mut self, line: &str) {
        // Blank lines separate events; `:` lines are keep-alive comments.
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            return;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            debug!(chunks = self.chunks, "Stream complete");
            self.done = true;
            return;
        }

        let chunk: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Skipping malformed stream chunk");
                return;
            }
        };
        self.chunks += 1;

        let delta = &chunk["choices"][0]["delta"];
        if let Some(s) = delta["content"].as_str() {
            self.text.push_str(s);
        }
        if let Some(s) = delta["audio"]["data"].as_str() {
            self.audio_data.push_str(s);
        }
        if let Some(s) = delta["audio"]["transcript"].as_str() {
            self.transcript.push_str(s);
        }
    }

    /// Flush any unterminated final line and return what was collected.
    pub fn finish(mut self) -> ChatReply {
        if !self.done && !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let rest = String::from_utf8_lossy(&rest).into_owned();
            self.line(rest.trim_end_matches('\r'));
        }
        let audio = if self.audio_data.is_empty() && self.transcript.is_empty() {
            None
        } else {
            Some(AudioReply {
                data: self.audio_data,
                transcript: self.transcript,
            })
        };
        ChatReply {
            text: self.text.trim().to_string(),
            audio,
        }
    }
}
