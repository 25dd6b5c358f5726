//! Tool Invoker
//!
//! Turns every outcome of a remote tool call into a [`ToolResult`]. Nothing
//! the tool server does, including transport failures, escapes as an error.

use serde_json::{Map, Value};

use crate::tool::{ToolResult, ToolServer};

/// Outcome of one invocation
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub result: ToolResult,

    /// The server returned an output, even one flagged as an error.
    /// False when the call never completed (transport or protocol failure).
    pub responded: bool,
}

pub struct ToolInvoker<'a> {
    server: &'a dyn ToolServer,
}

impl<'a> ToolInvoker<'a> {
    pub fn new(server: &'a dyn ToolServer) -> Self {
        Self { server }
    }

    /// Execute `name` on the tool server with decoded `arguments`
    pub async fn invoke(
        &self,
        call_id: &str,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Invocation {
        match self.server.call_tool(name, arguments).await {
            Ok(output) if output.is_error => {
                tracing::warn!(tool = %name, "Tool reported an error result");
                let message = format!("Error executing tool: {}", output.payload.to_content());
                Invocation {
                    result: ToolResult::failure(call_id, name, message),
                    responded: true,
                }
            }
            Ok(output) => Invocation {
                result: ToolResult::success(call_id, name, output.payload),
                responded: true,
            },
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool invocation failed");
                let message = format!("Error executing tool: {e}");
                Invocation {
                    result: ToolResult::failure(call_id, name, message),
                    responded: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedToolServer;
    use crate::tool::{ToolOutput, ToolPayload, ToolStatus};
    use serde_json::json;

    fn args(query: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("query".into(), json!(query));
        map
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let server = ScriptedToolServer::new().respond("search", Ok(ToolOutput::text("3 results")));
        let Invocation { result, responded } =
            ToolInvoker::new(&server).invoke("call_1", "search", args("rust")).await;

        assert!(responded);
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.id, "call_1");
        assert_eq!(result.payload, ToolPayload::Text("3 results".into()));
        assert_eq!(server.calls()[0].1["query"], "rust");
    }

    #[tokio::test]
    async fn test_invoke_transport_failure_becomes_error_result() {
        let server = ScriptedToolServer::new().respond(
            "search",
            Err(crate::AgentError::Transport("connection reset".into())),
        );
        let Invocation { result, responded } =
            ToolInvoker::new(&server).invoke("call_1", "search", args("rust")).await;

        assert!(!responded);
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.payload.to_content().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_invoke_remote_error_flag() {
        let output = ToolOutput {
            payload: ToolPayload::Text("quota exceeded".into()),
            is_error: true,
        };
        let server = ScriptedToolServer::new().respond("search", Ok(output));
        let Invocation { result, responded } =
            ToolInvoker::new(&server).invoke("call_1", "search", args("rust")).await;

        assert!(responded);
        assert!(!result.is_success());
        assert_eq!(
            result.payload,
            ToolPayload::Text("Error executing tool: quota exceeded".into())
        );
    }
}
