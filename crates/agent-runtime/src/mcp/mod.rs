//! MCP Tool Server Client
//!
//! A Model Context Protocol client speaking JSON-RPC 2.0 over one of two
//! transports:
//!
//! - **SSE**: `GET <url>` opens an event stream; the server's first
//!   `endpoint` event names the URL requests are POSTed to, and replies
//!   arrive as `message` events.
//! - **stdio**: a child process exchanging newline-delimited JSON.
//!
//! Both feed inbound messages into one dispatcher task that correlates
//! responses with pending requests and answers server pings.

mod rpc;
mod sse;
mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use agent_core::error::{AgentError, Result as CoreResult};
use agent_core::tool::{ToolDescriptor, ToolOutput, ToolPayload, ToolServer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rpc::{Inbound, PendingRequests};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to connect to MCP server: {0}")]
    Connect(String),

    #[error("failed to spawn MCP server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server returned invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("MCP server returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("MCP server connection terminated")]
    Terminated,

    #[error("MCP request '{method}' timed out after {secs}s")]
    Timeout { method: String, secs: u64 },
}

impl From<McpError> for AgentError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Connect(_)
            | McpError::Spawn { .. }
            | McpError::Transport(_)
            | McpError::Terminated
            | McpError::Timeout { .. } => Self::Transport(err.to_string()),
            McpError::Protocol(_) | McpError::InvalidJson(_) | McpError::Rpc { .. } => {
                Self::ToolServer(err.to_string())
            }
        }
    }
}

/// Where the tool server lives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum McpServerConfig {
    Sse {
        url: String,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl McpServerConfig {
    /// `http(s)://…` selects SSE; anything else is a command line for stdio
    pub fn parse(target: &str) -> Option<Self> {
        let target = target.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            return Some(Self::Sse { url: target.to_string() });
        }

        let mut parts = target.split_whitespace().map(str::to_string);
        let command = parts.next()?;
        Some(Self::Stdio {
            command,
            args: parts.collect(),
        })
    }
}

impl std::fmt::Display for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse { url } => write!(f, "{url}"),
            Self::Stdio { command, args } if args.is_empty() => write!(f, "{command}"),
            Self::Stdio { command, args } => write!(f, "{command} {}", args.join(" ")),
        }
    }
}

/// Timeouts applied by the transport layer
#[derive(Clone, Copy, Debug)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Connect and complete the MCP handshake
pub async fn connect(
    config: &McpServerConfig,
    options: ConnectOptions,
) -> Result<Arc<dyn ToolServer>, McpError> {
    info!(server = %config, "Connecting to MCP server");
    match config {
        McpServerConfig::Sse { url } => {
            let (transport, inbound) = SseTransport::connect(url, options.connect_timeout).await?;
            let client = McpClient::start(transport, inbound, options.request_timeout).await?;
            Ok(Arc::new(client))
        }
        McpServerConfig::Stdio { command, args } => {
            let (transport, inbound) = StdioTransport::spawn(command, args)?;
            let client = McpClient::start(transport, inbound, options.request_timeout).await?;
            Ok(Arc::new(client))
        }
    }
}

/// Outbound half of a connection; inbound messages arrive on the channel
/// returned by the transport's constructor.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, message: &Value) -> Result<(), McpError>;

    async fn shutdown(&self) -> Result<(), McpError>;
}

struct ClientInner<T> {
    transport: T,
    pending: PendingRequests,
    /// Set once the inbound stream has ended; nothing can answer after that
    closed: AtomicBool,
}

/// MCP client over any [`Transport`]
pub struct McpClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
    server_name: String,
}

impl<T: Transport> McpClient<T> {
    /// Start dispatching `inbound` and run the initialize handshake.
    ///
    /// The transport is shut down if the handshake fails.
    pub async fn start(
        transport: T,
        inbound: mpsc::Receiver<Value>,
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        let inner = Arc::new(ClientInner {
            transport,
            pending: PendingRequests::default(),
            closed: AtomicBool::new(false),
        });
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&inner), inbound));

        let mut client = Self {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
            request_timeout,
            server_name: String::new(),
        };

        if let Err(e) = client.initialize().await {
            if let Err(shutdown_err) = client.shutdown().await {
                debug!(error = %shutdown_err, "Shutdown after failed handshake also failed");
            }
            return Err(e);
        }
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {}
        });
        let result = self.request("initialize", params).await?;

        self.server_name = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        info!(server = %self.server_name, protocol = version, "MCP session initialized");

        self.notify("notifications/initialized", json!({})).await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(McpError::Terminated);
        }

        let (id, rx) = self.inner.pending.register().await;
        // The dispatcher may have drained the table between the check and
        // the registration
        if self.inner.closed.load(Ordering::Acquire) {
            self.inner.pending.forget(id).await;
            return Err(McpError::Terminated);
        }

        let message = rpc::request(id, method, params);
        if let Err(e) = self.inner.transport.send(&message).await {
            self.inner.pending.forget(id).await;
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Terminated),
            Err(_) => {
                self.inner.pending.forget(id).await;
                Err(McpError::Timeout {
                    method: method.to_string(),
                    secs: self.request_timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.inner.transport.send(&rpc::notification(method, params)).await
    }

    /// All tools, following `nextCursor` pagination
    pub async fn list_all_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map_or_else(|| json!({}), |c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            tools.extend(parse_tool_listing(&result)?);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(tools);
            }
        }
    }

    /// Invoke `name` and interpret the `tools/call` result
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", params).await?;
        Ok(parse_call_result(result))
    }

    /// Stop the dispatcher and close the transport. Idempotent.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }
        self.inner.closed.store(true, Ordering::Release);
        self.inner.pending.fail_all().await;
        self.inner.transport.shutdown().await
    }

    /// Server name reported during the handshake
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

impl<T: Transport> Drop for McpClient<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<T: Transport> ToolServer for McpClient<T> {
    async fn list_tools(&self) -> CoreResult<Vec<ToolDescriptor>> {
        Ok(self.list_all_tools().await?)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> CoreResult<ToolOutput> {
        Ok(self.invoke(name, arguments).await?)
    }

    async fn close(&self) -> CoreResult<()> {
        info!(server = %self.server_name, "Closing MCP connection");
        Ok(self.shutdown().await?)
    }
}

/// Route inbound messages until the transport's channel closes
async fn dispatch<T: Transport>(
    inner: Arc<ClientInner<T>>,
    mut inbound: mpsc::Receiver<Value>,
) {
    while let Some(message) = inbound.recv().await {
        match rpc::classify(message) {
            Inbound::Response { id, outcome } => {
                if !inner.pending.resolve(id, outcome).await {
                    debug!(response_id = id, "Received response for unknown request");
                }
            }
            Inbound::Request { id, method } => {
                let reply = if method == "ping" {
                    rpc::response(id, json!({}))
                } else {
                    warn!(method = %method, "Server sent unsupported request");
                    let message = format!("client does not implement method '{method}'");
                    rpc::error_response(id, -32601, &message)
                };
                if let Err(e) = inner.transport.send(&reply).await {
                    warn!(error = %e, "Failed to answer server request");
                }
            }
            Inbound::Notification { method } => {
                debug!(method = %method, "Received notification from server");
            }
            Inbound::Ignored => {}
        }
    }

    debug!("MCP inbound stream closed");
    inner.closed.store(true, Ordering::Release);
    inner.pending.fail_all().await;
}

fn parse_tool_listing(result: &Value) -> Result<Vec<ToolDescriptor>, McpError> {
    let entries = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| McpError::Protocol("tools/list result has no 'tools' array".into()))?;

    let mut tools = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<ToolDescriptor>(entry.clone()) {
            Ok(tool) => tools.push(tool),
            Err(e) => warn!(error = %e, entry = %entry, "Skipping unnamed tool entry"),
        }
    }
    Ok(tools)
}

/// All-text content becomes one text payload; anything else stays structured
fn parse_call_result(mut result: Value) -> ToolOutput {
    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);

    let text_parts: Option<Vec<String>> = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|parts| parts.iter().map(text_part).collect());

    let payload = if let Some(texts) = text_parts {
        ToolPayload::Text(texts.join("\n"))
    } else if result.get("structuredContent").is_some() {
        ToolPayload::Structured(result["structuredContent"].take())
    } else if result.get("content").is_some() {
        ToolPayload::Structured(result["content"].take())
    } else {
        ToolPayload::Structured(result)
    };

    ToolOutput { payload, is_error }
}

/// `Some(text)` for a text content part, `None` for any other kind
fn text_part(part: &Value) -> Option<String> {
    match part.get("type").and_then(Value::as_str) {
        Some("text") => Some(
            part.get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        _ => None,
    }
}
