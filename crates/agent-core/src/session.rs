//! Session Management
//!
//! A session binds an agent to one tool-server connection and one
//! conversation that accumulates across queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::Conversation;
use crate::reasoning::{Agent, QueryOutcome};
use crate::tool::ToolServer;

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected agent session
pub struct Session {
    id: SessionId,
    agent: Agent,
    tools: Arc<dyn ToolServer>,
    conversation: Conversation,
    created_at: DateTime<Utc>,
    active: bool,
}

impl Session {
    /// Start a session over an established tool-server connection.
    ///
    /// Lists the server's tools once to confirm the connection is usable.
    /// On failure the connection is closed before the error is returned.
    pub async fn connect(agent: Agent, tools: Arc<dyn ToolServer>) -> Result<Self> {
        let listed = match tools.list_tools().await {
            Ok(listed) => listed,
            Err(e) => {
                if let Err(close_err) = tools.close().await {
                    tracing::warn!(
                        error = %close_err,
                        "Failed to close tool server after connect error"
                    );
                }
                return Err(e);
            }
        };

        let session = Self {
            id: SessionId::new(),
            agent,
            tools,
            conversation: Conversation::new(),
            created_at: Utc::now(),
            active: true,
        };

        let names: Vec<&str> = listed.iter().map(|t| t.name.as_str()).collect();
        tracing::info!(session = %session.id, tools = ?names, "Connected to server");
        Ok(session)
    }

    /// Run one query through the agent; history carries over between calls
    pub async fn process_query(&mut self, query: &str) -> Result<QueryOutcome> {
        if !self.active {
            return Err(AgentError::Session(format!("session {} is closed", self.id)));
        }

        tracing::debug!(session = %self.id, "Processing query");
        self.agent
            .process_query(&mut self.conversation, self.tools.as_ref(), query)
            .await
    }

    /// Release the tool-server connection. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;

        tracing::info!(
            session = %self.id,
            turns = self.conversation.len(),
            duration_secs = (Utc::now() - self.created_at).num_seconds(),
            "Closing session"
        );
        self.tools.close().await
    }

    /// Conversation history
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }
}
