use crate::errors::DeblokError;
use crate::turn::{TurnEvent, TurnId, TurnOutcome};

/// Author of a message in the role-tagged history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of the conversation history.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// User-visible text written into the assistant slot when a turn does not
/// complete normally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureNotices {
    /// Appended after any partial text on transport/decode/upstream failure.
    pub error: String,
    /// Used when a cancelled turn produced no text at all.
    pub cancelled_empty: String,
}

impl Default for FailureNotices {
    fn default() -> Self {
        Self {
            error: "\nErreur serveur. Réessaie.".to_string(),
            cancelled_empty: "Réponse interrompue.".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    message: Message,
    sealed: bool,
}

#[derive(Clone, Copy, Debug)]
struct OpenSlot {
    turn_id: TurnId,
    index: usize,
}

/// Ordered message history with at most one in-progress assistant message.
///
/// The in-progress message is addressed by turn id, never by position, so a
/// late update from an abandoned turn cannot land in the current reply.
/// Once sealed, a message is never mutated again.
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    entries: Vec<Entry>,
    open: Option<OpenSlot>,
    notices: FailureNotices,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation seeded with already-sealed messages.
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            entries: messages
                .into_iter()
                .map(|message| Entry {
                    message,
                    sealed: true,
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn notices(mut self, notices: FailureNotices) -> Self {
        self.notices = notices;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    /// Turn currently streaming into the open assistant slot.
    pub fn active_turn(&self) -> Option<TurnId> {
        self.open.map(|slot| slot.turn_id)
    }

    /// Text of the in-progress assistant message, if any.
    pub fn in_progress_text(&self) -> Option<&str> {
        self.open
            .map(|slot| self.entries[slot.index].message.content.as_str())
    }

    /// Appends the user message and an empty in-progress assistant message.
    ///
    /// A still-open previous turn is sealed first and becomes stale.
    pub fn begin_turn(
        &mut self,
        turn_id: TurnId,
        user_text: impl Into<String>,
    ) -> Result<(), DeblokError> {
        let user_text = user_text.into();
        if user_text.trim().is_empty() {
            return Err(DeblokError::Validation(
                "message must not be empty".into(),
            ));
        }
        if let Some(previous) = self.open {
            let cancelled = TurnOutcome::Cancelled {
                text: self.entries[previous.index].message.content.clone(),
            };
            self.finish(previous.turn_id, &cancelled);
        }

        self.entries.push(Entry {
            message: Message::user(user_text),
            sealed: true,
        });
        self.entries.push(Entry {
            message: Message::assistant(""),
            sealed: false,
        });
        self.open = Some(OpenSlot {
            turn_id,
            index: self.entries.len() - 1,
        });
        Ok(())
    }

    /// Appends a delta to the open message of `turn_id`.
    ///
    /// Returns false (and changes nothing) for stale or unknown turns.
    pub fn append_delta(&mut self, turn_id: TurnId, text: &str) -> bool {
        let Some(index) = self.open_index(turn_id) else {
            return false;
        };
        self.entries[index].message.content.push_str(text);
        true
    }

    /// Seals the open message of `turn_id` according to `outcome`.
    pub fn finish(&mut self, turn_id: TurnId, outcome: &TurnOutcome) -> bool {
        let Some(index) = self.open_index(turn_id) else {
            return false;
        };
        let content = &mut self.entries[index].message.content;
        match outcome {
            TurnOutcome::Completed { .. } => {}
            TurnOutcome::Cancelled { .. } => {
                if content.is_empty() {
                    content.push_str(&self.notices.cancelled_empty);
                }
            }
            TurnOutcome::Failed { .. } => content.push_str(&self.notices.error),
        }
        self.entries[index].sealed = true;
        self.open = None;
        true
    }

    /// Routes a turn event to `append_delta` or `finish`.
    pub fn apply(&mut self, event: &TurnEvent) -> bool {
        match event {
            TurnEvent::Delta { turn_id, text, .. } => self.append_delta(*turn_id, text),
            TurnEvent::Finished { turn_id, outcome } => self.finish(*turn_id, outcome),
        }
    }

    /// Sealed, non-empty messages, limited to the most recent `window`.
    ///
    /// This is the history sent with a request; the in-progress reply is
    /// never included.
    pub fn history(&self, window: usize) -> Vec<Message> {
        let sealed: Vec<&Message> = self
            .entries
            .iter()
            .filter(|entry| entry.sealed && !entry.message.content.is_empty())
            .map(|entry| &entry.message)
            .collect();
        let skip = sealed.len().saturating_sub(window);
        sealed.into_iter().skip(skip).cloned().collect()
    }

    fn open_index(&self, turn_id: TurnId) -> Option<usize> {
        self.open
            .filter(|slot| slot.turn_id == turn_id)
            .filter(|slot| !self.entries[slot.index].sealed)
            .map(|slot| slot.index)
    }
}
