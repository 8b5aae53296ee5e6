//! Turning parsed SSE events into assistant text.
//!
//! Providers disagree on how a text delta looks on the wire. The app relay
//! sends `{"type":"text","text":...}`, OpenAI Responses sends
//! `event: response.output_text.delta` with `{"delta":...}`. A
//! [`DeltaMapping`] describes those shapes as data so one accumulator can
//! consume any of them.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::errors::StreamError;
use crate::sse::Event;

/// How one tagged event kind is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRule {
    /// Append the string found in `field`.
    Text { field: String },
    /// Terminal success.
    Done,
    /// Terminal provider error. The first string found at one of the dotted
    /// `fields` paths becomes the message.
    Error { fields: Vec<String> },
    /// Recognized but carries nothing to display.
    Ignore,
}

impl DeltaRule {
    /// Text rule reading `field`.
    pub fn text(field: impl Into<String>) -> Self {
        Self::Text {
            field: field.into(),
        }
    }

    /// Error rule reading the given dotted paths in order.
    pub fn error<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Error {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// What to do with a `data:` payload that is not a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPayload {
    /// Show the raw payload as text.
    #[default]
    Literal,
    /// Drop the frame (logged as a parse error).
    Skip,
}

/// Result of classifying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Text(String),
    Done,
    Upstream(String),
    Ignored,
}

/// Event-tag to delta-shape table.
///
/// A tag is the SSE event name when it has a rule, otherwise the JSON `type`
/// field of the payload. Payloads with neither are checked against
/// `untagged_fields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaMapping {
    rules: HashMap<String, DeltaRule>,
    untagged_fields: Vec<String>,
    done_sentinels: Vec<String>,
    malformed: MalformedPayload,
}

const DEFAULT_UPSTREAM_MESSAGE: &str = "upstream stream error";

impl DeltaMapping {
    /// Empty mapping: nothing is recognized.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
            untagged_fields: Vec::new(),
            done_sentinels: Vec::new(),
            malformed: MalformedPayload::default(),
        }
    }

    /// Shapes emitted by the app's own streaming endpoint.
    pub fn app_wire() -> Self {
        Self::empty()
            .with_rule("text", DeltaRule::text("text"))
            .with_rule("done", DeltaRule::Done)
            .with_rule("error", DeltaRule::error(["message", "error.message"]))
            .with_rule("meta", DeltaRule::Ignore)
    }

    /// Shapes emitted by the OpenAI Responses streaming API.
    pub fn openai_responses() -> Self {
        Self::empty()
            .with_rule("response.output_text.delta", DeltaRule::text("delta"))
            .with_rule("response.completed", DeltaRule::Done)
            .with_rule(
                "response.error",
                DeltaRule::error(["error.message", "message"]),
            )
            .with_rule(
                "response.failed",
                DeltaRule::error(["response.error.message", "error.message", "message"]),
            )
            .with_rule("error", DeltaRule::error(["message", "error.message"]))
            .with_untagged_field("delta")
            .with_done_sentinel("[DONE]")
    }

    /// Adds or replaces the rule for `tag`.
    pub fn with_rule(mut self, tag: impl Into<String>, rule: DeltaRule) -> Self {
        self.rules.insert(tag.into(), rule);
        self
    }

    /// Adds a field checked on payloads that carry no tag at all.
    pub fn with_untagged_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.untagged_fields.contains(&field) {
            self.untagged_fields.push(field);
        }
        self
    }

    /// Adds a raw payload that means "stream finished" (e.g. `[DONE]`).
    pub fn with_done_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        let sentinel = sentinel.into();
        if !self.done_sentinels.contains(&sentinel) {
            self.done_sentinels.push(sentinel);
        }
        self
    }

    /// Sets the policy for payloads that are not JSON objects.
    pub fn malformed_payload(mut self, policy: MalformedPayload) -> Self {
        self.malformed = policy;
        self
    }

    /// Merges `other` into `self`; rules in `other` win on conflict.
    pub fn merge(mut self, other: DeltaMapping) -> Self {
        self.rules.extend(other.rules);
        for field in other.untagged_fields {
            self = self.with_untagged_field(field);
        }
        for sentinel in other.done_sentinels {
            self = self.with_done_sentinel(sentinel);
        }
        self
    }

    /// Rule registered for `tag`, if any.
    pub fn rule(&self, tag: &str) -> Option<&DeltaRule> {
        self.rules.get(tag)
    }

    /// Interprets one event.
    ///
    /// Returns a `Parse` error for frames that cannot be interpreted; callers
    /// skip those and keep reading.
    pub fn classify(&self, event: &Event) -> Result<Classified, StreamError> {
        if self
            .done_sentinels
            .iter()
            .any(|s| s.as_str() == event.data.trim())
        {
            return Ok(Classified::Done);
        }

        let value = match serde_json::from_str::<serde_json::Value>(&event.data) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            Ok(_) => return self.malformed_fallback(event, "payload is not a JSON object"),
            Err(e) => return self.malformed_fallback(event, &format!("invalid JSON payload: {e}")),
        };

        let json_type = value.get("type").and_then(|v| v.as_str());
        let tagged = Some(event.name.as_str())
            .filter(|name| !name.is_empty())
            .and_then(|name| self.rules.get(name))
            .or_else(|| json_type.and_then(|t| self.rules.get(t)));

        match tagged {
            Some(DeltaRule::Text { field }) => match value.get(field).and_then(|v| v.as_str()) {
                Some(text) => Ok(Classified::Text(text.to_string())),
                None => Err(StreamError::parse(format!(
                    "text event without string field `{field}`"
                ))),
            },
            Some(DeltaRule::Done) => Ok(Classified::Done),
            Some(DeltaRule::Error { fields }) => {
                let message = fields
                    .iter()
                    .find_map(|path| lookup_str(&value, path))
                    .unwrap_or(DEFAULT_UPSTREAM_MESSAGE);
                Ok(Classified::Upstream(message.to_string()))
            }
            Some(DeltaRule::Ignore) => Ok(Classified::Ignored),
            None if event.name.is_empty() && json_type.is_none() => Ok(self
                .untagged_fields
                .iter()
                .find_map(|field| value.get(field).and_then(|v| v.as_str()))
                .map(|text| Classified::Text(text.to_string()))
                .unwrap_or(Classified::Ignored)),
            None => Ok(Classified::Ignored),
        }
    }

    fn malformed_fallback(&self, event: &Event, reason: &str) -> Result<Classified, StreamError> {
        match self.malformed {
            MalformedPayload::Literal => Ok(Classified::Text(event.data.clone())),
            MalformedPayload::Skip => Err(StreamError::parse(reason)),
        }
    }
}

impl Default for DeltaMapping {
    /// Both the app wire shapes and the OpenAI Responses shapes.
    fn default() -> Self {
        Self::app_wire().merge(Self::openai_responses())
    }
}

fn lookup_str<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a str> {
    path.split('.')
        .try_fold(value, |current, key| current.get(key))
        .and_then(|v| v.as_str())
}

/// Lifecycle of one streamed assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

impl StreamPhase {
    /// True for `Done`, `Errored` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored | Self::Cancelled)
    }
}

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Text was appended; carries the appended fragment.
    Appended(String),
    /// The stream reached `Done`.
    Completed,
    /// Nothing changed (unrecognized, empty, or already terminal).
    Ignored,
    /// A malformed frame was skipped.
    Skipped(StreamError),
}

/// Append-only accumulator for the assistant text of one turn.
#[derive(Debug, Clone)]
pub struct DeltaAccumulator {
    mapping: DeltaMapping,
    phase: StreamPhase,
    text: String,
}

impl DeltaAccumulator {
    /// Creates an idle accumulator using `mapping`.
    pub fn new(mapping: DeltaMapping) -> Self {
        Self {
            mapping,
            phase: StreamPhase::Idle,
            text: String::new(),
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Moves `Idle` to `Streaming`; no-op otherwise.
    pub fn begin(&mut self) {
        if self.phase == StreamPhase::Idle {
            self.phase = StreamPhase::Streaming;
        }
    }

    /// Applies one event.
    ///
    /// An upstream error event moves to `Errored` and is returned as `Err`.
    /// Parse problems are not errors here: they come back as
    /// [`Applied::Skipped`] and leave the phase untouched.
    pub fn apply(&mut self, event: &Event) -> Result<Applied, StreamError> {
        if self.is_terminal() {
            debug!(event = %event.name, "event after terminal phase ignored");
            return Ok(Applied::Ignored);
        }
        self.begin();

        match self.mapping.classify(event) {
            Ok(Classified::Text(fragment)) => {
                if fragment.is_empty() {
                    return Ok(Applied::Ignored);
                }
                self.text.push_str(&fragment);
                Ok(Applied::Appended(fragment))
            }
            Ok(Classified::Done) => {
                self.phase = StreamPhase::Done;
                Ok(Applied::Completed)
            }
            Ok(Classified::Upstream(message)) => {
                self.phase = StreamPhase::Errored;
                Err(StreamError::upstream(message))
            }
            Ok(Classified::Ignored) => Ok(Applied::Ignored),
            Err(err) => {
                warn!(event = %event.name, error = %err, "skipping malformed frame");
                Ok(Applied::Skipped(err))
            }
        }
    }

    /// Moves to `Errored` unless already terminal.
    pub fn fail(&mut self) -> bool {
        self.seal(StreamPhase::Errored)
    }

    /// Moves to `Cancelled` unless already terminal.
    pub fn cancel(&mut self) -> bool {
        self.seal(StreamPhase::Cancelled)
    }

    fn seal(&mut self, phase: StreamPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.phase = phase;
        true
    }
}

impl Default for DeltaAccumulator {
    fn default() -> Self {
        Self::new(DeltaMapping::default())
    }
}
