//! Scripted provider and tool server doubles for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, GenerationOptions, LlmProvider};
use crate::tool::{CallSiteTool, ToolCall, ToolDescriptor, ToolOutput, ToolServer};

/// What the provider saw on one `complete` call
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    /// Tool names offered, `None` when tools were withheld
    pub tools: Option<Vec<String>>,
}

/// Provider replaying a fixed script of completions
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Completion>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, completion: Completion) -> Self {
        self.script.lock().unwrap().push_back(Ok(completion));
        self
    }

    pub fn then_err(self, error: AgentError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn then_text(self, text: &str) -> Self {
        self.then(Completion::text(text))
    }

    /// One assistant turn requesting `calls` as `(id, name, raw_args)`
    pub fn then_calls(self, calls: &[(&str, &str, &str)]) -> Self {
        let calls = calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect();
        self.then(Completion::tool_calls(calls))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[CallSiteTool]>,
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.map(|t| t.iter().map(|tool| tool.function.name.clone()).collect()),
        });
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(AgentError::Provider("script exhausted".into())))
            .map(|mut completion| {
                completion.model.clone_from(&options.model);
                completion
            })
    }
}

/// Tool server with canned per-tool responses
pub struct ScriptedToolServer {
    tools: Vec<ToolDescriptor>,
    responses: Mutex<HashMap<String, VecDeque<Result<ToolOutput>>>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    listings: AtomicUsize,
    closed: AtomicBool,
}

impl Default for ScriptedToolServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedToolServer {
    /// A server exposing a single `search` tool
    pub fn new() -> Self {
        Self::with_tools(vec![ToolDescriptor::new(
            "search",
            Some("Search the web".into()),
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
        )])
    }

    pub fn with_tools(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            listings: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue the next response for `tool`; unqueued calls succeed with `"<tool> ok"`
    pub fn respond(self, tool: &str, response: Result<ToolOutput>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolServer for ScriptedToolServer {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        let queued = self
            .responses
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| Ok(ToolOutput::text(format!("{name} ok"))))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
