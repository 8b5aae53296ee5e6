//! Provider-specific integrations.
//!
//! The streaming core only sees bytes through [`crate::TurnTransport`]; a
//! vendor module turns a provider API into such a transport.
pub mod openai;
