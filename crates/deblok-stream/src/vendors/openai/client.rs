use futures::StreamExt as _;
use tracing::{debug, info};

use crate::delta::DeltaMapping;
use crate::errors::{DeblokError, StreamError};
use crate::message::Message;
use crate::relay::{RelayOptions, WireStream, relay_stream};
use crate::title::{TitleRequest, title_from_response};
use crate::transport::{ByteStream, TurnRequest, TurnTransport, into_byte_stream};

use super::config::OpenAiConfig;
use super::options::{OpenAiReasoningEffort, OpenAiRequestOptions};

/// Client for OpenAI's Responses API.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, DeblokError> {
        if config.api_key.trim().is_empty() {
            return Err(DeblokError::Config(
                "OpenAI config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DeblokError::Config(format!("failed to build OpenAI client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a client using `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, DeblokError> {
        Self::new(OpenAiConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Starts a streamed response for `messages` with the chat model.
    ///
    /// Returns the raw SSE body once the status has been checked.
    pub async fn stream_response(
        &self,
        messages: &[Message],
        options: &OpenAiRequestOptions,
    ) -> Result<ByteStream, StreamError> {
        let body = build_request_body(&self.config.chat_model, message_input(messages), true, options);
        debug!(model = %self.config.chat_model, messages = messages.len(), "starting OpenAI responses stream");
        let response = self.post(&body).await?;
        Ok(into_byte_stream(response))
    }

    /// Sends a non-streaming request and returns the JSON response body.
    pub async fn create_response(
        &self,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, StreamError> {
        let response = self.post(body).await?;
        response
            .json()
            .await
            .map_err(|e| StreamError::decode(format!("invalid OpenAI response body: {e}")))
    }

    /// Generates a short folder title for a first exchange.
    pub async fn generate_title(&self, request: &TitleRequest) -> Result<String, DeblokError> {
        let prompt = request.prompt()?;
        let options = OpenAiRequestOptions::default().reasoning_effort(OpenAiReasoningEffort::Low);
        // Title instructions use the `developer` role, never part of chat history.
        let input = vec![serde_json::json!({ "role": "developer", "content": prompt })];
        let body = build_request_body(&self.config.title_model, input, false, &options);
        let response = self.create_response(&body).await?;
        let title = title_from_response(&response);
        info!(model = %self.config.title_model, title = %title, "generated folder title");
        Ok(title)
    }

    /// Streams a reply for `request` re-framed into app wire frames.
    pub async fn relay(
        &self,
        request: &TurnRequest,
        options: RelayOptions,
    ) -> Result<WireStream, DeblokError> {
        request.validate()?;
        let upstream = self
            .stream_response(&request.messages, &OpenAiRequestOptions::default())
            .await?;
        Ok(Box::pin(relay_stream(upstream, options)))
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, StreamError> {
        let response = self
            .client
            .post(self.config.responses_url())
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("OpenAI request failed: {e}"), None))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::transport(
                format!("OpenAI responses request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }
        Ok(response)
    }
}

fn message_input(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

pub(crate) fn build_request_body(
    model: &str,
    input: Vec<serde_json::Value>,
    stream: bool,
    options: &OpenAiRequestOptions,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "input": input,
    });
    if stream {
        body["stream"] = serde_json::Value::Bool(true);
    }
    options.apply_to(&mut body);
    body
}

/// Talks to OpenAI directly and relays in-process.
///
/// Produces the same wire frames as the app endpoint, so sessions behave
/// identically with either transport.
pub struct DirectTransport {
    client: OpenAiClient,
    relay: RelayOptions,
}

impl DirectTransport {
    pub fn new(client: OpenAiClient) -> Self {
        Self {
            client,
            relay: RelayOptions::default(),
        }
    }

    pub fn from_env() -> Result<Self, DeblokError> {
        Ok(Self::new(OpenAiClient::from_env()?))
    }

    pub fn relay_options(mut self, options: RelayOptions) -> Self {
        self.relay = options;
        self
    }
}

#[async_trait::async_trait]
impl TurnTransport for DirectTransport {
    fn name(&self) -> &str {
        "openai"
    }

    async fn open(&self, request: &TurnRequest) -> Result<ByteStream, StreamError> {
        if request.messages.is_empty() {
            return Err(StreamError::transport("messages invalid", Some(400)));
        }
        let upstream = self
            .client
            .stream_response(&request.messages, &OpenAiRequestOptions::default())
            .await?;
        let relayed = relay_stream(upstream, self.relay.clone());
        Ok(Box::pin(relayed.map(Ok::<_, StreamError>)))
    }

    fn mapping(&self) -> DeltaMapping {
        DeltaMapping::app_wire()
    }
}
