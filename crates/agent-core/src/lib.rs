//! # agent-core
//!
//! Tool-calling orchestration for LLM agents backed by a remote tool server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Session                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ Conversation │  │    Agent     │  │    ToolServer      │  │
//! │  │ (append-only)│──│ (state loop) │──│ (remote, via       │  │
//! │  └──────────────┘  └──────┬───────┘  │  ToolInvoker)      │  │
//! │                           │          └────────────────────┘  │
//! │                    ┌──────┴───────┐                          │
//! │                    │ LlmProvider  │                          │
//! │                    └──────────────┘                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` and `ToolServer` traits keep the loop independent of
//! any particular model API or tool transport.

pub mod error;
pub mod invoker;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod tool;

#[cfg(test)]
mod testing;

pub use error::{AgentError, Result};
pub use message::{Conversation, Message, Role};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, QueryOutcome};
pub use session::Session;
pub use tool::{ToolCall, ToolDescriptor, ToolOutput, ToolPayload, ToolResult, ToolServer};
