//! Common imports for typical usage.
pub use crate::{
    AbortHandle, ChatSession, DeblokError, DeltaMapping, EndpointConfig, EndpointTransport,
    Message, Role, SessionOptions, StreamError, StreamPhase, TitleRequest, TurnEvent, TurnId,
    TurnOutcome, TurnRequest, TurnStream, TurnTransport, init_observability,
};
