//! Short folder titles generated from the first exchange of a conversation.

use crate::errors::DeblokError;

/// Title used when the model returns nothing usable.
pub const FALLBACK_TITLE: &str = "Dossier";

/// Titles are cut to this many characters.
pub const MAX_TITLE_CHARS: usize = 60;

const QUOTE_CHARS: &[char] = &['"', '\'', '«', '»'];

/// Body of a title request.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleRequest {
    pub user_text: String,
    #[serde(default)]
    pub ai_text: Option<String>,
}

impl TitleRequest {
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ai_text: None,
        }
    }

    pub fn ai_text(mut self, text: impl Into<String>) -> Self {
        self.ai_text = Some(text.into());
        self
    }

    /// Builds the instruction sent to the model.
    ///
    /// Fails when the user text is blank; a blank assistant text is omitted.
    pub fn prompt(&self) -> Result<String, DeblokError> {
        let user_text = self.user_text.trim();
        if user_text.is_empty() {
            return Err(DeblokError::Validation("userText must not be empty".into()));
        }
        let mut prompt = String::from(
            "Génère un titre de dossier très court (2 à 5 mots), en français, sans guillemets, sans point final. Contexte:\n",
        );
        prompt.push_str(&format!("Message utilisateur: {user_text}\n"));
        if let Some(ai_text) = self.ai_text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            prompt.push_str(&format!("Réponse assistant: {ai_text}\n"));
        }
        prompt.push_str("Donne uniquement le titre.");
        Ok(prompt)
    }
}

/// Pulls the generated text out of a non-streaming Responses API body.
///
/// Prefers the top-level `output_text`; otherwise joins every
/// `output[].content[]` part of type `output_text`.
pub fn extract_output_text(body: &serde_json::Value) -> String {
    if let Some(text) = body
        .get("output_text")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return text.to_string();
    }

    let Some(items) = body.get("output").and_then(|v| v.as_array()) else {
        return String::new();
    };
    let joined: String = items
        .iter()
        .filter_map(|item| item.get("content").and_then(|c| c.as_array()))
        .flatten()
        .filter(|part| part.get("type").and_then(|t| t.as_str()) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();
    joined.trim().to_string()
}

/// Strips surrounding quotes, collapses whitespace and caps the length.
pub fn clean_title(raw: &str) -> String {
    let unquoted = raw.trim_matches(QUOTE_CHARS);
    let collapsed = unquoted.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_TITLE_CHARS).collect()
}

/// Cleaned title from a Responses body, or [`FALLBACK_TITLE`].
pub fn title_from_response(body: &serde_json::Value) -> String {
    let title = clean_title(&extract_output_text(body));
    if title.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        title
    }
}
