/// Failure kinds that can occur while a single turn is streaming.
///
/// Only `Parse` is recoverable: the offending frame is skipped and the turn
/// keeps reading. Every other kind ends the turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamError {
    /// Non-OK HTTP status, network failure, or the body ended without a
    /// terminal event.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
    /// The byte stream was not valid UTF-8.
    #[error("decode error: {message}")]
    Decode { message: String },
    /// A frame was present but its payload did not have the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },
    /// The provider emitted a terminal error event inside the stream.
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Transport {
            message: message.into(),
            status,
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a per-frame parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Returns true when this error ends the turn.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Parse { .. })
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. }
            | Self::Decode { message }
            | Self::Parse { message }
            | Self::Upstream { message } => message,
        }
    }

    /// HTTP status attached to a transport failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

/// Top-level error type for the public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeblokError {
    /// Invalid client or session configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty message, bad request body, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// A turn or request failed while streaming.
    #[error(transparent)]
    Stream(StreamError),
    /// The turn was cancelled before a terminal result was produced.
    #[error("cancelled")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DeblokError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<StreamError> for DeblokError {
    fn from(value: StreamError) -> Self {
        DeblokError::Stream(value)
    }
}
