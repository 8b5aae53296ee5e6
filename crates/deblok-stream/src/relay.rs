//! Re-framing of an upstream completion stream for the app's clients.
//!
//! The relay reads the provider's SSE body with the same reader a client
//! uses, and re-emits a small, stable vocabulary:
//!
//! ```text
//! data: {"type":"meta","v":"AI_ROUTE_V1"}
//! data: {"type":"text","text":"..."}      (one per delta, text verbatim)
//! data: {"type":"done"}                   (or {"type":"error","message":...})
//! ```
//!
//! Exactly one terminal frame is sent, then the stream ends.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use crate::consumer::TurnReader;
use crate::delta::{DeltaMapping, MalformedPayload};
use crate::sse::encode_frame;
use crate::transport::ByteStream;
use crate::turn::{TurnEvent, TurnId, TurnOutcome};

/// Relayed body, ready to be written to an HTTP response.
pub type WireStream = Pin<Box<dyn futures::Stream<Item = Bytes> + Send + 'static>>;

/// Headers sent with a relayed body.
pub const RESPONSE_HEADERS: [(&str, &str); 3] = [
    ("content-type", "text/event-stream; charset=utf-8"),
    ("cache-control", "no-cache, no-transform"),
    ("connection", "keep-alive"),
];

/// One frame of the app wire protocol.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireEvent {
    Meta { v: String },
    Text { text: String },
    Done,
    Error { message: String },
}

impl WireEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Encodes as a `data:` frame terminated by a blank line.
    pub fn encode(&self) -> String {
        let payload = match self {
            Self::Meta { v } => serde_json::json!({ "type": "meta", "v": v }),
            Self::Text { text } => serde_json::json!({ "type": "text", "text": text }),
            Self::Done => serde_json::json!({ "type": "done" }),
            Self::Error { message } => serde_json::json!({ "type": "error", "message": message }),
        };
        encode_frame(None, &payload.to_string())
    }
}

/// Relay behavior.
#[derive(Clone, Debug)]
pub struct RelayOptions {
    /// Version tag sent in the leading `meta` frame; `None` skips it.
    pub meta_version: Option<String>,
    /// Message sent to clients on any failure. Details are only logged.
    pub public_error: String,
    /// Shapes of the upstream stream.
    pub upstream_mapping: DeltaMapping,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            meta_version: Some("AI_ROUTE_V1".to_string()),
            public_error: "Erreur serveur".to_string(),
            upstream_mapping: DeltaMapping::openai_responses()
                .malformed_payload(MalformedPayload::Skip),
        }
    }
}

impl RelayOptions {
    pub fn meta_version(mut self, version: Option<String>) -> Self {
        self.meta_version = version;
        self
    }

    pub fn public_error(mut self, message: impl Into<String>) -> Self {
        self.public_error = message.into();
        self
    }

    pub fn upstream_mapping(mut self, mapping: DeltaMapping) -> Self {
        self.upstream_mapping = mapping;
        self
    }
}

struct RelayState {
    upstream: ByteStream,
    reader: TurnReader,
    pending: VecDeque<WireEvent>,
    public_error: String,
    terminated: bool,
}

impl RelayState {
    fn ingest(&mut self, chunk: &[u8]) {
        let Self {
            reader, pending, ..
        } = self;
        reader.feed(chunk, &mut |event: &TurnEvent| {
            if let TurnEvent::Delta { text, .. } = event {
                pending.push_back(WireEvent::Text { text: text.clone() });
            }
        });
    }

    fn end(&mut self) {
        let Self {
            reader, pending, ..
        } = self;
        reader.end(&mut |event: &TurnEvent| {
            if let TurnEvent::Delta { text, .. } = event {
                pending.push_back(WireEvent::Text { text: text.clone() });
            }
        });
    }

    fn settle(&mut self) {
        if self.terminated {
            return;
        }
        let Some(outcome) = self.reader.outcome() else {
            return;
        };
        let terminal = match outcome {
            TurnOutcome::Completed { text } => {
                debug!(turn_id = %self.reader.turn_id(), chars = text.chars().count(), "relay completed");
                WireEvent::Done
            }
            TurnOutcome::Failed { error, .. } => {
                warn!(turn_id = %self.reader.turn_id(), error = %error, "relay upstream failed");
                WireEvent::Error {
                    message: self.public_error.clone(),
                }
            }
            TurnOutcome::Cancelled { .. } => WireEvent::Error {
                message: self.public_error.clone(),
            },
        };
        self.pending.push_back(terminal);
        self.terminated = true;
    }
}

/// Translates an upstream provider body into app wire frames.
///
/// Reading stops at the upstream completion event; anything after it is
/// never pulled. Transport errors and an upstream that closes early both
/// end with a single `error` frame.
pub fn relay_stream(
    upstream: ByteStream,
    options: RelayOptions,
) -> impl futures::Stream<Item = Bytes> + Send {
    let mut pending = VecDeque::new();
    if let Some(v) = options.meta_version {
        pending.push_back(WireEvent::Meta { v });
    }
    let state = RelayState {
        upstream,
        reader: TurnReader::new(TurnId::new(), options.upstream_mapping),
        pending,
        public_error: options.public_error,
        terminated: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Bytes::from(event.encode()), state));
            }
            if state.terminated {
                return None;
            }
            match state.upstream.next().await {
                Some(Ok(chunk)) => state.ingest(&chunk),
                Some(Err(err)) => state.reader.fail(err),
                None => state.end(),
            }
            state.settle();
        }
    })
}
