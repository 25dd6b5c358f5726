//! JSON-RPC 2.0 framing and request/response correlation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot};

use super::McpError;

type Responder = oneshot::Sender<Result<Value, McpError>>;

/// Outstanding requests keyed by JSON-RPC id
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    waiting: Mutex<HashMap<u64, Responder>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiting: Mutex::new(HashMap::new()),
        }
    }
}

impl PendingRequests {
    /// Allocate an id and a receiver for its response
    pub(crate) async fn register(&self) -> (u64, oneshot::Receiver<Result<Value, McpError>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().await.insert(id, tx);
        (id, rx)
    }

    /// Deliver a response; false if nobody is waiting for `id`
    pub(crate) async fn resolve(&self, id: u64, outcome: Result<Value, McpError>) -> bool {
        let responder = self.waiting.lock().await.remove(&id);
        match responder {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop a request that will never be answered (timeout, send failure)
    pub(crate) async fn forget(&self, id: u64) {
        self.waiting.lock().await.remove(&id);
    }

    /// Fail every outstanding request
    pub(crate) async fn fail_all(&self) {
        let mut waiting = self.waiting.lock().await;
        for (_, sender) in waiting.drain() {
            let _ = sender.send(Err(McpError::Terminated));
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.waiting.lock().await.len()
    }
}

/// A message received from the server
#[derive(Debug)]
pub(crate) enum Inbound {
    /// Reply to one of our requests
    Response { id: u64, outcome: Result<Value, McpError> },
    /// Server-initiated request expecting a reply
    Request { id: Value, method: String },
    /// Server-initiated notification
    Notification { method: String },
    /// Anything else (unknown ids, malformed envelopes)
    Ignored,
}

pub(crate) fn classify(mut value: Value) -> Inbound {
    let method = value.get("method").and_then(Value::as_str).map(str::to_string);
    let id = value.get("id").cloned();

    match (id, method) {
        (Some(id), Some(method)) => Inbound::Request { id, method },
        (None, Some(method)) => Inbound::Notification { method },
        (Some(id), None) => {
            let Some(id) = response_id(&id) else {
                return Inbound::Ignored;
            };
            let outcome = match value.get("error") {
                Some(error) => Err(McpError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                }),
                None => Ok(value.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
            };
            Inbound::Response { id, outcome }
        }
        (None, None) => Inbound::Ignored,
    }
}

fn response_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub(crate) fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
}

pub(crate) fn response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub(crate) fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_result() {
        let inbound = classify(json!({"jsonrpc": "2.0", "id": 3, "result": {"tools": []}}));
        match inbound {
            Inbound::Response { id, outcome } => {
                assert_eq!(id, 3);
                assert_eq!(outcome.unwrap(), json!({"tools": []}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_error_and_string_id() {
        let inbound = classify(json!({
            "jsonrpc": "2.0",
            "id": "7",
            "error": {"code": -32602, "message": "Unknown tool"}
        }));
        match inbound {
            Inbound::Response { id, outcome } => {
                assert_eq!(id, 7);
                assert!(matches!(outcome, Err(McpError::Rpc { code: -32602, .. })));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_server_traffic() {
        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            Inbound::Request { method, .. } if method == "ping"
        ));
        assert!(matches!(
            classify(json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"})),
            Inbound::Notification { .. }
        ));
        assert!(matches!(classify(json!({"id": "abc"})), Inbound::Ignored));
        assert!(matches!(classify(json!({"jsonrpc": "2.0"})), Inbound::Ignored));
    }

    #[tokio::test]
    async fn test_pending_resolve_and_fail_all() {
        let pending = PendingRequests::default();
        let (first, first_rx) = pending.register().await;
        let (second, second_rx) = pending.register().await;
        assert_ne!(first, second);

        assert!(pending.resolve(first, Ok(json!(1))).await);
        assert!(!pending.resolve(first, Ok(json!(1))).await);
        assert_eq!(first_rx.await.unwrap().unwrap(), json!(1));

        pending.fail_all().await;
        assert!(matches!(second_rx.await.unwrap(), Err(McpError::Terminated)));
        assert_eq!(pending.len().await, 0);
    }

    #[test]
    fn test_envelopes() {
        assert_eq!(request(1, "tools/list", json!({}))["method"], "tools/list");
        assert!(notification("notifications/initialized", json!({})).get("id").is_none());
        assert_eq!(response(json!(4), json!({}))["id"], 4);
        assert_eq!(error_response(json!(5), -32601, "nope")["error"]["code"], -32601);
    }
}
