use std::time::Duration;

use crate::errors::DeblokError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_CHAT_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_TITLE_MODEL: &str = "gpt-5";

/// Configuration for [`super::OpenAiClient`].
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL for the OpenAI-compatible endpoint.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// HTTP timeout for a whole request, streamed body included.
    pub timeout: Duration,
    /// Model answering chat turns.
    pub chat_model: String,
    /// Model generating folder titles.
    pub title_model: String,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            title_model: DEFAULT_TITLE_MODEL.to_string(),
        }
    }

    /// Builds a config from `OPENAI_API_KEY`.
    ///
    /// `OPENAI_BASE_URL`, `DEBLOK_CHAT_MODEL` and `DEBLOK_TITLE_MODEL`
    /// override the defaults when set.
    pub fn from_env() -> Result<Self, DeblokError> {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(DeblokError::Config("missing OPENAI_API_KEY".into()));
        }
        let mut config = Self::new(api_key);
        if let Some(base_url) = non_empty_env("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(model) = non_empty_env("DEBLOK_CHAT_MODEL") {
            config.chat_model = model;
        }
        if let Some(model) = non_empty_env("DEBLOK_TITLE_MODEL") {
            config.title_model = model;
        }
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    pub fn title_model(mut self, model: impl Into<String>) -> Self {
        self.title_model = model.into();
        self
    }

    pub(crate) fn responses_url(&self) -> String {
        format!("{}/v1/responses", self.base_url.trim_end_matches('/'))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_url_tolerates_trailing_slash() {
        let config = OpenAiConfig::new("k").base_url("http://127.0.0.1:9000/");
        assert_eq!(config.responses_url(), "http://127.0.0.1:9000/v1/responses");
        assert_eq!(config.chat_model, "gpt-4.1-mini");
        assert_eq!(config.title_model, "gpt-5");
    }
}
