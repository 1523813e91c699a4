use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New Chat";
pub const GREETING: &str =
    "Hello! I'm here to help you with parenting questions. How can I assist you today?";
const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content.into(), true)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(content.into(), false)
    }

    // v7 ids share a process-wide counter, so ids minted within the same
    // millisecond stay unique and ordered.
    fn new(content: String, is_user: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            content,
            is_user,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatSession {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub is_archived: bool,
    pub messages: Vec<Message>,
}

impl ChatSession {
    /// A fresh, non-archived session holding only the assistant greeting.
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            title: DEFAULT_TITLE.to_string(),
            created_at: Utc::now(),
            is_archived: false,
            messages: vec![Message::assistant(GREETING)],
        }
    }

    /// Appends `message`, deriving the title when it is the first user reply
    /// to the greeting. Returns the new title if it changed.
    pub fn push_message(&mut self, message: Message) -> Option<String> {
        let retitle = self.messages.len() == 1 && message.is_user;
        if retitle {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
        retitle.then(|| self.title.clone())
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// First 30 characters of `content`, with an ellipsis when cut.
pub fn derive_title(content: &str) -> String {
    match content.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_single_greeting() {
        let s = ChatSession::new();
        assert_eq!(s.title, DEFAULT_TITLE);
        assert!(!s.is_archived);
        assert_eq!(s.messages.len(), 1);
        assert!(!s.messages[0].is_user);
        assert_eq!(s.messages[0].content, GREETING);
    }

    #[test]
    fn title_is_truncated_at_thirty_chars() {
        let long = "X".repeat(40);
        assert_eq!(derive_title(&long), format!("{}...", "X".repeat(30)));
        assert_eq!(derive_title(&"Y".repeat(30)), "Y".repeat(30));
        assert_eq!(derive_title("short"), "short");
    }

    #[test]
    fn title_counts_characters_not_bytes() {
        let text = "é".repeat(35);
        let title = derive_title(&text);
        assert_eq!(title, format!("{}...", "é".repeat(30)));
    }

    #[test]
    fn title_is_derived_once_from_first_user_message() {
        let mut s = ChatSession::new();
        let changed = s.push_message(Message::user("How do I start sleep training?"));
        assert_eq!(changed.as_deref(), Some("How do I start sleep training?"));
        let changed = s.push_message(Message::assistant("1. **Routine**: keep it steady"));
        assert!(changed.is_none());
        let changed = s.push_message(Message::user("Something else entirely"));
        assert!(changed.is_none());
        assert_eq!(s.title, "How do I start sleep training?");
    }

    #[test]
    fn assistant_second_message_does_not_retitle() {
        let mut s = ChatSession::new();
        assert!(s.push_message(Message::assistant("extra")).is_none());
        assert_eq!(s.title, DEFAULT_TITLE);
    }

    #[test]
    fn message_ids_do_not_collide_within_a_tick() {
        let ids: std::collections::HashSet<Uuid> =
            (0..500).map(|_| Message::user("x").id).collect();
        assert_eq!(ids.len(), 500);
    }
}
