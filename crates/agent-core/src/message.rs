//! Conversation Messages
//!
//! Turns and the append-only conversation log replayed to the model on
//! every request.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolResult, ToolStatus};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result answering one tool call
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single turn in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content (may be empty on assistant turns that only call tools)
    pub content: String,

    /// Pending tool calls requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Id of the tool call a tool turn answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Outcome of the invocation a tool turn reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_status: Option<ToolStatus>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_status: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool call requests
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    /// Create a tool message answering `tool_call_id`
    pub fn tool(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        status: ToolStatus,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_status: Some(status),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Create the tool message reporting `result`
    pub fn tool_result(result: &ToolResult) -> Self {
        Self::tool(result.payload.to_content(), result.id.clone(), result.status)
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Append-only conversation log
///
/// Insertion order is the replay order. There is no removal: history
/// accumulates across every query of a session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Full ordered history
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Chooses which part of the history is sent to the model.
///
/// Applied to the snapshot only; the log itself is never shortened.
pub trait ContextWindow: Send + Sync {
    fn select<'a>(&self, history: &'a [Message]) -> Cow<'a, [Message]>;
}

/// Replay the whole history verbatim
#[derive(Clone, Copy, Debug, Default)]
pub struct FullHistory;

impl ContextWindow for FullHistory {
    fn select<'a>(&self, history: &'a [Message]) -> Cow<'a, [Message]> {
        Cow::Borrowed(history)
    }
}

/// Keep the most recent `max_exchanges` user-initiated exchanges, plus the
/// latest system turn preceding them.
///
/// An exchange opens on a user turn and runs up to the next one, so the
/// window never starts on an assistant or tool turn and always carries the
/// question being answered.
#[derive(Clone, Copy, Debug)]
pub struct RecentExchanges {
    pub max_exchanges: usize,
}

impl ContextWindow for RecentExchanges {
    fn select<'a>(&self, history: &'a [Message]) -> Cow<'a, [Message]> {
        let keep = self.max_exchanges.max(1);
        let user_turns: Vec<usize> = history
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User)
            .map(|(i, _)| i)
            .collect();

        if user_turns.len() <= keep {
            return Cow::Borrowed(history);
        }

        let start = user_turns[user_turns.len() - keep];
        let mut window = Vec::with_capacity(history.len() - start + 1);
        if let Some(system) = history[..start].iter().rev().find(|m| m.role == Role::System) {
            window.push(system.clone());
        }
        window.extend_from_slice(&history[start..]);
        Cow::Owned(window)
    }
}
