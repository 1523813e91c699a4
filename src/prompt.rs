use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = "You are a helpful parenting assistant specializing in early childhood development, sleep training, feeding, and general parenting advice. Provide practical, evidence-based advice in a warm and supportive tone. Format your responses with clear structure using numbered lists and bold headings. For example: '1. **Sleep Training**: [content] 2. **Feeding**: [content]' etc. Keep responses concise but informative. Remember the context of the conversation and build upon previous responses. If the user asks for 'more detail' or similar follow-up questions, provide additional information based on what was discussed previously.";

pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// One prior turn as it travels over the completion exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub content: String,
    pub is_user: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// The last `window` entries of `history`, oldest first.
pub fn recent<T>(history: &[T], window: usize) -> &[T] {
    &history[history.len().saturating_sub(window)..]
}

/// System persona, then at most `window` prior turns, then the new message.
pub fn build_messages(history: &[HistoryEntry], message: &str, window: usize) -> Vec<ChatTurn> {
    let recent = recent(history, window);
    let mut turns = Vec::with_capacity(recent.len() + 2);
    turns.push(ChatTurn::new(Role::System, SYSTEM_PROMPT));
    turns.extend(recent.iter().map(|h| {
        let role = if h.is_user { Role::User } else { Role::Assistant };
        ChatTurn::new(role, h.content.clone())
    }));
    turns.push(ChatTurn::new(Role::User, message));
    turns
}
