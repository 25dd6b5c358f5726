//! # agent-runtime
//!
//! Concrete backends for the agent-core traits.
//!
//! ## Providers
//!
//! - **OpenRouter** (default): any OpenAI-compatible chat completion API
//!
//! ## Tool servers
//!
//! - **MCP over SSE**: `http(s)://host/sse`
//! - **MCP over stdio**: a spawned server process
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{mcp, openrouter::OpenRouterProvider};
//!
//! let config = OpenRouterConfig::from_lookup(|key| std::env::var(key).ok());
//! let provider = OpenRouterProvider::new(config)?;
//! let tools = mcp::connect(&server_config, mcp::ConnectOptions::default()).await?;
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .build()?;
//! let mut session = Session::connect(agent, tools).await?;
//! ```

pub mod mcp;
pub mod openrouter;

pub use mcp::{ConnectOptions, McpClient, McpError, McpServerConfig};
pub use openrouter::{OpenRouterConfig, OpenRouterProvider};

// Re-export core types for convenience
pub use agent_core::{Agent, AgentError, LlmProvider, Message, Result, Role, Session, ToolServer};
