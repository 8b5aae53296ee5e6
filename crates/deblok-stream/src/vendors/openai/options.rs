/// OpenAI reasoning effort hint (when supported by the selected model).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenAiReasoningEffort {
    Low,
    Medium,
    High,
}

/// Per-request OpenAI options.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OpenAiRequestOptions {
    /// Whether OpenAI should store the response server-side. Off unless set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<OpenAiReasoningEffort>,
}

impl OpenAiRequestOptions {
    pub fn store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reasoning_effort(mut self, effort: OpenAiReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    /// Writes these options into a Responses API request body.
    pub(crate) fn apply_to(&self, body: &mut serde_json::Value) {
        body["store"] = serde_json::Value::Bool(self.store.unwrap_or(false));
        if let Some(effort) = self.reasoning_effort {
            body["reasoning"] = serde_json::json!({ "effort": effort });
        }
    }
}
