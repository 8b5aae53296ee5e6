//! Streaming chat turns for DEBLOK.
//!
//! A turn is one user message plus the assistant reply streamed back as
//! Server-Sent Events. This crate reads such a stream into text deltas,
//! keeps the conversation consistent while it grows, and re-frames an
//! OpenAI Responses stream into the app's own wire format.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Streaming a turn
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use deblok_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), DeblokError> {
//! let transport = Arc::new(EndpointTransport::from_env()?);
//! let mut session = ChatSession::new(transport, SessionOptions::default())?;
//!
//! let mut turn = session.start_turn("Salut !")?;
//! while let Some(event) = turn.next_event().await {
//!     if let TurnEvent::Delta { text, .. } = event {
//!         print!("{text}");
//!     }
//! }
//! let outcome = turn.finish().await?;
//! println!("\n{:?}", outcome.phase());
//! # Ok(())
//! # }
//! ```

/// Read loop turning a byte stream into turn events.
pub mod consumer;
/// Delta mapping rules and the per-turn accumulator.
pub mod delta;
/// Public error types.
pub mod errors;
/// Conversation history with turn-keyed in-progress replies.
pub mod message;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Re-framing of provider streams into app wire frames.
pub mod relay;
/// Chat session owning a transport and a conversation.
pub mod session;
/// SSE framing, field parsing and UTF-8 decoding.
pub mod sse;
/// Folder title prompt and response cleanup.
pub mod title;
/// Transport seam and the HTTP endpoint transport.
pub mod transport;
/// Turn identity, outcome, events and cancellation.
pub mod turn;
/// Vendor-specific integrations.
pub mod vendors;

pub use consumer::{TurnReader, drive_turn};
pub use delta::{
    Applied, Classified, DeltaAccumulator, DeltaMapping, DeltaRule, MalformedPayload, StreamPhase,
};
pub use errors::{DeblokError, StreamError};
pub use message::{Conversation, FailureNotices, Message, Role};
pub use observability::init_observability;
pub use relay::{RelayOptions, WireEvent, WireStream, relay_stream};
pub use session::{ChatSession, SessionOptions, TurnStream};
pub use sse::{Event, FrameSplitter, Utf8Decoder, encode_frame, parse_event, split_frames};
pub use title::{TitleRequest, clean_title, extract_output_text, title_from_response};
pub use transport::{ByteStream, EndpointConfig, EndpointTransport, TurnRequest, TurnTransport};
pub use turn::{
    AbortHandle, AbortSignal, TurnEvent, TurnId, TurnObserver, TurnOutcome, abort_pair,
};
