use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use tracing::debug;

use crate::delta::DeltaMapping;
use crate::errors::{DeblokError, StreamError};
use crate::message::Message;

/// Chunked response body carrying SSE frames.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Body posted to a streaming endpoint for one turn.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Folder (conversation thread) the turn belongs to. Opaque here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Role-tagged history, oldest first, ending with the new user message.
    pub messages: Vec<Message>,
}

impl TurnRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            folder_id: None,
            messages,
        }
    }

    pub fn folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    /// Parses and validates a raw request body.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, DeblokError> {
        let request: Self = serde_json::from_slice(body)
            .map_err(|e| DeblokError::Validation(format!("invalid request body: {e}")))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), DeblokError> {
        if self.messages.is_empty() {
            return Err(DeblokError::Validation(
                "at least one message is required".into(),
            ));
        }
        Ok(())
    }
}

/// Opens the byte stream for one turn.
///
/// Implementations must check the response status before returning; a
/// non-OK response is a `StreamError::Transport` carrying the status.
#[async_trait::async_trait]
pub trait TurnTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Sends `request` and returns the response body.
    async fn open(&self, request: &TurnRequest) -> Result<ByteStream, StreamError>;

    /// Event shapes this transport produces.
    fn mapping(&self) -> DeltaMapping {
        DeltaMapping::default()
    }
}

/// Configuration for [`EndpointTransport`].
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Full URL of the streaming endpoint.
    pub url: String,
    /// Time allowed to receive response headers.
    pub connect_timeout: Duration,
    /// Session cookie forwarded for authentication, if any.
    pub cookie: Option<String>,
}

const DEFAULT_ENDPOINT_URL: &str = "http://localhost:3000/api/ai";

impl EndpointConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(30),
            cookie: None,
        }
    }

    /// Builds a config from `DEBLOK_ENDPOINT_URL` and `DEBLOK_SESSION_COOKIE`.
    pub fn from_env() -> Self {
        let url = std::env::var("DEBLOK_ENDPOINT_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT_URL.to_string());
        let mut config = Self::new(url);
        config.cookie = std::env::var("DEBLOK_SESSION_COOKIE")
            .ok()
            .filter(|v| !v.trim().is_empty());
        config
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT_URL)
    }
}

/// Posts turns to the app's own streaming endpoint.
pub struct EndpointTransport {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl EndpointTransport {
    pub fn new(config: EndpointConfig) -> Result<Self, DeblokError> {
        if config.url.trim().is_empty() {
            return Err(DeblokError::Config("endpoint url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| DeblokError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, DeblokError> {
        Self::new(EndpointConfig::from_env())
    }
}

#[async_trait::async_trait]
impl TurnTransport for EndpointTransport {
    fn name(&self) -> &str {
        "endpoint"
    }

    async fn open(&self, request: &TurnRequest) -> Result<ByteStream, StreamError> {
        debug!(url = %self.config.url, messages = request.messages.len(), "posting turn");
        let mut http_req = self
            .client
            .post(&self.config.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);
        if let Some(cookie) = &self.config.cookie {
            http_req = http_req.header(reqwest::header::COOKIE, cookie);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("request failed: {e}"), None))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::transport(
                format!("endpoint responded with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        Ok(into_byte_stream(response))
    }
}

pub(crate) fn into_byte_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(response.bytes_stream().map(|chunk| {
        chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}"), None))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::drive_turn;
    use crate::turn::{AbortSignal, TurnEvent, TurnId, TurnOutcome};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hello_request() -> TurnRequest {
        TurnRequest::new(vec![Message::user("Salut")]).folder_id("f-1")
    }

    #[test]
    fn request_uses_camel_case_folder_id() {
        let json = serde_json::to_value(hello_request()).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "folderId": "f-1",
                "messages": [{"role": "user", "content": "Salut"}]
            })
        );
    }

    #[test]
    fn request_body_validation() {
        let ok = TurnRequest::from_json_slice(br#"{"messages":[{"role":"user","content":"x"}]}"#)
            .expect("valid");
        assert_eq!(ok.folder_id, None);

        let empty = TurnRequest::from_json_slice(br#"{"messages":[]}"#);
        assert!(matches!(empty, Err(DeblokError::Validation(_))));

        let not_array = TurnRequest::from_json_slice(br#"{"messages":"hi"}"#);
        assert!(matches!(not_array, Err(DeblokError::Validation(_))));

        let bad_role = TurnRequest::from_json_slice(br#"{"messages":[{"role":"tool","content":"x"}]}"#);
        assert!(matches!(bad_role, Err(DeblokError::Validation(_))));
    }

    #[test]
    fn empty_url_is_config_error() {
        assert!(matches!(
            EndpointTransport::new(EndpointConfig::new(" ")),
            Err(DeblokError::Config(_))
        ));
    }

    #[tokio::test]
    async fn streams_endpoint_body_into_turn() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"meta\",\"v\":\"AI_ROUTE_V1\"}\n\n",
            "data: {\"type\":\"text\",\"text\":\"Bon\"}\n\n",
            "data: {\"type\":\"text\",\"text\":\"jour\"}\n\n",
            "data: {\"type\":\"done\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/ai"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(serde_json::json!({"folderId": "f-1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let transport =
            EndpointTransport::new(EndpointConfig::new(format!("{}/api/ai", server.uri())))
                .expect("transport");
        let stream = transport.open(&hello_request()).await.expect("open");
        let outcome = drive_turn(
            TurnId::new(),
            stream,
            transport.mapping(),
            AbortSignal::never(),
            &mut |_: &TurnEvent| {},
        )
        .await;
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                text: "Bonjour".into()
            }
        );
    }

    #[tokio::test]
    async fn non_ok_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ai"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Not authenticated"))
            .mount(&server)
            .await;

        let transport = EndpointTransport::new(
            EndpointConfig::new(format!("{}/api/ai", server.uri())).cookie("sb=token"),
        )
        .expect("transport");
        let err = match transport.open(&hello_request()).await {
            Ok(_) => panic!("401 should fail"),
            Err(err) => err,
        };
        assert_eq!(err.status(), Some(401));
        assert!(err.message().contains("Not authenticated"));
    }
}
