//! OpenAI Responses API integration.
mod client;
mod config;
mod options;

pub use client::{DirectTransport, OpenAiClient};
pub use config::OpenAiConfig;
pub use options::{OpenAiReasoningEffort, OpenAiRequestOptions};
