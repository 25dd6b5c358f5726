//! Runtime settings: `.env`, then the process environment, then flags

use std::time::Duration;

use agent_core::error::{AgentError, Result};
use agent_core::provider::GenerationOptions;
use agent_core::reasoning::DEFAULT_MAX_ROUNDS;
use agent_runtime::mcp::{ConnectOptions, McpServerConfig};
use agent_runtime::openrouter::OpenRouterConfig;

use crate::Cli;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8001/sse";

#[derive(Clone, Debug)]
pub struct Settings {
    pub model: String,
    pub provider: OpenRouterConfig,
    pub server: McpServerConfig,
    pub max_rounds: usize,
    pub request_timeout: Duration,

    /// Replay only this many recent exchanges to the model
    pub history_exchanges: Option<usize>,
}

impl Settings {
    /// Resolve settings from `lookup` (the environment in production) and
    /// apply command-line overrides on top
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>, cli: &Cli) -> Result<Self> {
        let model = cli
            .model
            .clone()
            .or_else(|| lookup("MODEL"))
            .unwrap_or_else(|| GenerationOptions::default().model);

        let server_target = cli
            .server
            .clone()
            .or_else(|| lookup("MCP_SERVER_URL"))
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let server = McpServerConfig::parse(&server_target).ok_or_else(|| {
            AgentError::Config("MCP server must be a URL or a command line".into())
        })?;

        let max_rounds = match cli.max_rounds {
            Some(rounds) => rounds,
            None => parse_var(&lookup, "MAX_TOOL_ROUNDS")?.unwrap_or(DEFAULT_MAX_ROUNDS),
        };

        let request_timeout = parse_var(&lookup, "MCP_REQUEST_TIMEOUT_SECS")?
            .map_or(ConnectOptions::default().request_timeout, Duration::from_secs);

        let history_exchanges = match cli.history_exchanges {
            Some(exchanges) => Some(exchanges),
            None => parse_var(&lookup, "HISTORY_EXCHANGES")?,
        };

        Ok(Self {
            model,
            provider: OpenRouterConfig::from_lookup(&lookup),
            server,
            max_rounds,
            request_timeout,
            history_exchanges,
        })
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            request_timeout: self.request_timeout,
            ..ConnectOptions::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .map(|v| {
            v.trim().parse().map_err(|_| {
                AgentError::Config(format!("{key} must be a non-negative integer, got '{v}'"))
            })
        })
        .transpose()
}
