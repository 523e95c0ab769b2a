//! Streaming protocol for as-completed delivery.
//!
//! A run streams as server-sent events:
//!
//! ```text
//! event: message   data: {"type":"persona","data":{..PersonaOutput..}}     × N, completion order
//! event: message   data: {"type":"consensus","data":{..Consensus..}}       × 1, last message
//! event: done      data: {}
//! ```
//!
//! [`StreamReader`] is the matching client side: it skips frames it cannot
//! understand and rebuilds an [`AnalysisResponse`] from the rest.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AnalysisResponse, Consensus, PersonaOutput};

pub const MESSAGE_EVENT: &str = "message";
pub const DONE_EVENT: &str = "done";

/// Payload of a `message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamMessage {
    Persona(PersonaOutput),
    Consensus(Consensus),
}

/// One event on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Message(StreamMessage),
    Done,
}

impl StreamEvent {
    pub fn persona(output: PersonaOutput) -> Self {
        Self::Message(StreamMessage::Persona(output))
    }

    pub fn consensus(consensus: Consensus) -> Self {
        Self::Message(StreamMessage::Consensus(consensus))
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Message(_) => MESSAGE_EVENT,
            Self::Done => DONE_EVENT,
        }
    }

    /// JSON text for the `data:` field.
    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            Self::Message(message) => serde_json::to_string(message),
            Self::Done => Ok("{}".to_string()),
        }
    }

    /// Complete SSE frame including the blank-line terminator.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(format!("event: {}\ndata: {}\n\n", self.event_name(), self.data()?))
    }
}

/// Parse one SSE frame (without its terminator).
///
/// Returns `None` for comment-only frames and for anything malformed.
pub fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let mut name: Option<&str> = None;
    let mut data: Vec<&str> = Vec::new();
    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => name = Some(value.trim()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if name.is_none() && data.is_empty() {
        return None;
    }

    match name.unwrap_or(MESSAGE_EVENT) {
        MESSAGE_EVENT => serde_json::from_str(&data.join("\n"))
            .map(StreamEvent::Message)
            .ok(),
        DONE_EVENT => Some(StreamEvent::Done),
        _ => None,
    }
}

/// Incremental, tolerant stream consumer.
#[derive(Debug, Default)]
pub struct StreamReader {
    buffer: String,
    personas: Vec<PersonaOutput>,
    consensus: Option<Consensus>,
    done: bool,
    skipped: usize,
}

impl StreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes-as-text; returns the events completed by this chunk.
    ///
    /// Frames may be split across chunks arbitrarily. Malformed frames are
    /// skipped and counted; events after `done` are ignored.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        if self.buffer.contains('\r') {
            // A trailing `\r` may be the first half of a CRLF split across chunks.
            let pending_cr = self.buffer.ends_with('\r');
            if pending_cr {
                self.buffer.pop();
            }
            self.buffer = self.buffer.replace("\r\n", "\n");
            if pending_cr {
                self.buffer.push('\r');
            }
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..end + 2).collect();
            let frame = frame.trim_end_matches('\n');
            if self.done || frame.trim().is_empty() {
                continue;
            }
            if frame.lines().all(|l| l.starts_with(':')) {
                continue;
            }
            match parse_frame(frame) {
                Some(event) => {
                    self.apply(&event);
                    events.push(event);
                }
                None => {
                    self.skipped += 1;
                    debug!(frame_len = frame.len(), "skipping malformed stream frame");
                }
            }
        }
        events
    }

    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Message(StreamMessage::Persona(output)) => {
                self.personas.push(output.clone());
            }
            StreamEvent::Message(StreamMessage::Consensus(consensus)) => {
                self.consensus = Some(consensus.clone());
            }
            StreamEvent::Done => self.done = true,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of frames dropped as malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Personas received so far, in arrival order.
    pub fn personas(&self) -> &[PersonaOutput] {
        &self.personas
    }

    /// Rebuild the response. `None` until a consensus has arrived.
    pub fn finish(self) -> Option<AnalysisResponse> {
        let consensus = self.consensus?;
        Some(AnalysisResponse::new(self.personas, consensus))
    }
}
