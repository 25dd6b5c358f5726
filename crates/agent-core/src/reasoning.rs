//! Reasoning Loop
//!
//! The tool-calling state machine. For each user query the agent asks the
//! model for a completion, runs any tool calls it requests, feeds the
//! results back, and repeats until the model answers in plain text or the
//! round budget runs out.
//!
//! ```text
//!            ┌──────────────── tool calls ────────────────┐
//!            ▼                                            │
//!   AwaitingModel ──── text ────► Done         ExecutingTools
//!            │                      ▲                     ▲
//!            │ rounds >= max        │                     │
//!            └──► ForcedFinal ──────┘   (tool calls) ─────┘
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::invoker::ToolInvoker;
use crate::message::{ContextWindow, Conversation, FullHistory, Message};
use crate::provider::{Completion, GenerationOptions, LlmProvider};
use crate::tool::{CallSiteTool, ToolCall, ToolResult, ToolServer, call_site_tool};

/// Default maximum number of tool-call rounds per query
pub const DEFAULT_MAX_ROUNDS: usize = 5;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to tools.

Rules:
1. Call tools when you need information. Use valid JSON for arguments.
2. Once you have enough information, respond with a final answer (no more tool calls).
3. Never call a tool twice with the same arguments.
4. Keep search queries short and specific (3-6 words work best).";

const DEFAULT_FORCE_FINAL_PROMPT: &str = "Please provide your final answer based on the \
information gathered so far. Do not make any more tool calls.";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Policy instructions appended as a system turn at the start of every query
    pub system_prompt: String,

    /// Tool-call rounds allowed before the answer is forced
    pub max_rounds: usize,

    /// Generation options
    pub generation: GenerationOptions,

    /// User turn appended when the round budget is exhausted
    pub force_final_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            generation: GenerationOptions::default(),
            force_final_prompt: DEFAULT_FORCE_FINAL_PROMPT.into(),
        }
    }
}

/// States of the per-query loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools,
    ForcedFinal,
    Done,
}

/// Result of one processed query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Tool announcements, stop marker and final answer, one per line
    pub answer: String,

    /// Text of the terminal model response alone (may be empty)
    pub final_answer: String,

    /// Completed tool-call rounds
    pub rounds: usize,

    /// Whether the round budget forced the answer
    pub forced_final: bool,
}

/// The main Agent struct
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    context: Arc<dyn ContextWindow>,
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(provider: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self {
            provider,
            context: Arc::new(FullHistory),
            config,
        }
    }

    /// Process one user query against `conversation`.
    ///
    /// The conversation only grows. Tool failures and malformed tool
    /// arguments are reported to the model as tool turns; only failures to
    /// list tools or to obtain a completion end the query with an error.
    pub async fn process_query(
        &self,
        conversation: &mut Conversation,
        tools: &dyn ToolServer,
        query: &str,
    ) -> Result<QueryOutcome> {
        let listed = tools.list_tools().await?;
        let catalog: Vec<CallSiteTool> = listed.iter().map(call_site_tool).collect();
        tracing::debug!(tools = catalog.len(), "Tool catalog loaded");

        conversation.push(Message::system(self.config.system_prompt.clone()));
        conversation.push(Message::user(query));

        let max_rounds = self.config.max_rounds;
        let mut rounds = 0;
        let mut transcript: Vec<String> = Vec::new();
        let mut pending: Vec<ToolCall> = Vec::new();
        let mut final_answer = String::new();
        let mut forced_final = false;
        let mut state = LoopState::AwaitingModel;

        while state != LoopState::Done {
            tracing::debug!(?state, rounds, "Loop step");

            state = match state {
                LoopState::AwaitingModel => {
                    let completion = self.request(conversation, Some(catalog.as_slice())).await?;
                    let message = completion.into_message();
                    pending.clone_from(&message.tool_calls);
                    let content = message.content.clone();
                    conversation.push(message);

                    if rounds >= max_rounds {
                        LoopState::ForcedFinal
                    } else if !pending.is_empty() {
                        LoopState::ExecutingTools
                    } else {
                        final_answer = content;
                        LoopState::Done
                    }
                }
                LoopState::ExecutingTools => {
                    rounds += 1;
                    for call in pending.drain(..) {
                        let (result, announcement) = self.execute_call(tools, &call).await;
                        transcript.extend(announcement);
                        conversation.push(Message::tool_result(&result));
                    }
                    LoopState::AwaitingModel
                }
                LoopState::ForcedFinal => {
                    forced_final = true;
                    tracing::warn!(max_rounds, "Tool round budget exhausted; forcing final answer");
                    transcript.push(format!(
                        "[Stopped: exceeded maximum of {max_rounds} tool call rounds]"
                    ));

                    conversation.push(Message::user(self.config.force_final_prompt.clone()));
                    let completion = self.request(conversation, None).await?;
                    final_answer.clone_from(&completion.content);
                    conversation.push(Message::assistant(completion.content));
                    LoopState::Done
                }
                LoopState::Done => LoopState::Done,
            };
        }

        if final_answer.is_empty() {
            tracing::warn!("No content returned from model");
        }
        transcript.push(final_answer.clone());

        tracing::info!(rounds, forced_final, "Query complete");

        Ok(QueryOutcome {
            answer: transcript.join("\n"),
            final_answer,
            rounds,
            forced_final,
        })
    }

    /// Request a completion over the (windowed) conversation
    async fn request(
        &self,
        conversation: &Conversation,
        tools: Option<&[CallSiteTool]>,
    ) -> Result<Completion> {
        let context = self.context.select(conversation.snapshot());
        self.provider
            .complete(&context, tools, &self.config.generation)
            .await
    }

    /// Decode and execute one tool call.
    ///
    /// Returns the result to record and, when the server answered the call,
    /// the announcement line for the query transcript.
    async fn execute_call(
        &self,
        tools: &dyn ToolServer,
        call: &ToolCall,
    ) -> (ToolResult, Option<String>) {
        let arguments = match call.decode_arguments() {
            Ok(arguments) => arguments,
            Err(e) => {
                tracing::warn!(
                    tool = %call.name,
                    raw = %call.arguments,
                    error = %e,
                    "Failed to parse tool arguments"
                );
                let message = format!(
                    "Error: Invalid JSON in tool arguments. \
                     Please try again with valid JSON. Details: {e}"
                );
                let result = ToolResult::failure(call.id.clone(), call.name.clone(), message);
                return (result, None);
            }
        };

        let rendered = Value::Object(arguments.clone()).to_string();
        tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");

        let invocation = ToolInvoker::new(tools).invoke(&call.id, &call.name, arguments).await;
        let announcement = invocation
            .responded
            .then(|| format!("[Calling tool {} with args {rendered}]", call.name));
        (invocation.result, announcement)
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    context: Option<Arc<dyn ContextWindow>>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            context: None,
            config: AgentConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = Some(temp);
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max: u32) -> Self {
        self.config.generation.max_tokens = max;
        self
    }

    #[must_use]
    pub const fn max_rounds(mut self, max: usize) -> Self {
        self.config.max_rounds = max;
        self
    }

    /// Select what part of the history is replayed to the model
    #[must_use]
    pub fn context_window(mut self, window: Arc<dyn ContextWindow>) -> Self {
        self.context = Some(window);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        let mut agent = Agent::new(provider, self.config);
        if let Some(context) = self.context {
            agent.context = context;
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{RecentExchanges, Role};
    use crate::testing::{ScriptedProvider, ScriptedToolServer};
    use crate::tool::{ToolOutput, ToolPayload, ToolStatus};

    fn agent(provider: &Arc<ScriptedProvider>, max_rounds: usize) -> Agent {
        AgentBuilder::new()
            .provider(provider.clone())
            .max_rounds(max_rounds)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_single_search_round() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[("call_1", "search", r#"{"query": "martin moder"}"#)])
                .then_text("Martin Moder is a science communicator."),
        );
        let server = ScriptedToolServer::new()
            .respond("search", Ok(ToolOutput::text("Martin Moder - molecular biologist")));
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "search for martin moder on the web")
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 1);
        assert!(!outcome.forced_final);
        assert_eq!(
            outcome.answer,
            "[Calling tool search with args {\"query\":\"martin moder\"}]\n\
             Martin Moder is a science communicator."
        );
        assert_eq!(server.calls().len(), 1);

        // system, user, assistant(tool call), tool, assistant(answer)
        let roles: Vec<Role> = conversation.snapshot().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(conversation.snapshot()[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_rounds_count_batches_not_calls() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[
                    ("a1", "search", r#"{"query": "a"}"#),
                    ("a2", "search", r#"{"query": "b"}"#),
                    ("a3", "search", r#"{"query": "c"}"#),
                ])
                .then_calls(&[
                    ("b1", "search", r#"{"query": "d"}"#),
                    ("b2", "search", r#"{"query": "e"}"#),
                ])
                .then_text("done"),
        );
        let server = ScriptedToolServer::new();
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 2);
        assert_eq!(server.calls().len(), 5);

        // Calls run in request order and tool turns follow that order
        let queries: Vec<String> = server
            .calls()
            .iter()
            .map(|(_, args)| args["query"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(queries, ["a", "b", "c", "d", "e"]);
        let ids: Vec<&str> = conversation
            .snapshot()
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, ["a1", "a2", "a3", "b1", "b2"]);
    }

    #[tokio::test]
    async fn test_round_cap_forces_toolless_final() {
        let mut script = ScriptedProvider::new();
        for i in 0..6 {
            let id = format!("call_{i}");
            let args = format!(r#"{{"query": "attempt {i}"}}"#);
            script = script.then_calls(&[(id.as_str(), "search", args.as_str())]);
        }
        let provider = Arc::new(script.then_text("Best effort answer."));
        let server = ScriptedToolServer::new();
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        assert!(outcome.forced_final);
        assert_eq!(outcome.rounds, 5);
        assert_eq!(outcome.final_answer, "Best effort answer.");
        assert_eq!(server.calls().len(), 5);
        assert!(outcome.answer.contains("[Stopped: exceeded maximum of 5 tool call rounds]"));
        assert!(outcome.answer.ends_with("Best effort answer."));

        let requests = provider.requests();
        assert_eq!(requests.len(), 7);
        assert!(requests[..6].iter().all(|r| r.tools.is_some()));
        let last = &requests[6];
        assert!(last.tools.is_none());
        let prompt = last.messages.last().unwrap();
        assert_eq!(prompt.role, Role::User);
        assert_eq!(prompt.content, AgentConfig::default().force_final_prompt);
    }

    #[tokio::test]
    async fn test_forced_final_accepts_tool_calls_as_text() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[("c1", "search", "{}")])
                .then_calls(&[("c2", "search", "{}")])
                .then_calls(&[("c3", "search", "{}")]),
        );
        let server = ScriptedToolServer::new();
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 1)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        // Forced response is final even though it carried no text
        assert!(outcome.forced_final);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.final_answer, "");
        assert_eq!(server.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_arguments_never_invoke_tool() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[
                    ("bad", "search", r#"{"query": "unterminated"#),
                    ("good", "search", r#"{"query": "fine"}"#),
                ])
                .then_text("ok"),
        );
        let server = ScriptedToolServer::new();
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        assert_eq!(server.calls().len(), 1);
        assert_eq!(server.calls()[0].1["query"], "fine");

        let corrective: Vec<&Message> = conversation
            .snapshot()
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("bad"))
            .collect();
        assert_eq!(corrective.len(), 1);
        assert_eq!(corrective[0].tool_status, Some(ToolStatus::Error));
        assert!(corrective[0].content.starts_with("Error: Invalid JSON in tool arguments."));
        assert!(!outcome.answer.contains("unterminated"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_reported_not_raised() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[("c1", "search", r#"{"query": "x"}"#)])
                .then_text("The search failed, sorry."),
        );
        let server = ScriptedToolServer::new()
            .respond("search", Err(AgentError::Transport("connection reset".into())));
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        assert_eq!(outcome.final_answer, "The search failed, sorry.");
        let tool_turn = &conversation.snapshot()[3];
        assert_eq!(tool_turn.tool_status, Some(ToolStatus::Error));
        assert!(tool_turn.content.contains("connection reset"));

        // The model saw the failure before answering
        let requests = provider.requests();
        assert_eq!(requests[1].messages.last().unwrap().role, Role::Tool);

        // A call that never completed is not announced
        assert_eq!(outcome.answer, "The search failed, sorry.");
    }

    #[tokio::test]
    async fn test_remote_error_result_is_still_announced() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[("c1", "search", r#"{"query": "x"}"#)])
                .then_text("Quota hit."),
        );
        let output = ToolOutput {
            payload: ToolPayload::Text("quota exceeded".into()),
            is_error: true,
        };
        let server = ScriptedToolServer::new().respond("search", Ok(output));
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        assert_eq!(
            outcome.answer,
            "[Calling tool search with args {\"query\":\"x\"}]\nQuota hit."
        );
        assert_eq!(conversation.snapshot()[3].tool_status, Some(ToolStatus::Error));
    }

    #[tokio::test]
    async fn test_duplicate_calls_are_not_deduplicated() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[("c1", "search", r#"{"query": "same"}"#)])
                .then_calls(&[("c2", "search", r#"{"query": "same"}"#)])
                .then_text("answer"),
        );
        let server = ScriptedToolServer::new();
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        // The "never call twice" rule is advice to the model, not enforced here
        assert_eq!(outcome.rounds, 2);
        assert_eq!(server.calls().len(), 2);
        assert_eq!(server.calls()[0], server.calls()[1]);
    }

    #[tokio::test]
    async fn test_empty_final_answer_is_accepted() {
        let provider = Arc::new(ScriptedProvider::new().then_text(""));
        let server = ScriptedToolServer::new();
        let mut conversation = Conversation::new();

        let outcome = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap();

        assert_eq!(outcome.final_answer, "");
        assert_eq!(outcome.rounds, 0);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_history_accumulates_across_queries() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .then_calls(&[("c1", "search", r#"{"query": "x"}"#)])
                .then_text("first")
                .then_text("second"),
        );
        let server = ScriptedToolServer::new();
        let agent = agent(&provider, 5);
        let mut conversation = Conversation::new();

        agent.process_query(&mut conversation, &server, "one").await.unwrap();
        let after_first = conversation.len();
        let first_snapshot: Vec<String> =
            conversation.snapshot().iter().map(|m| m.content.clone()).collect();

        agent.process_query(&mut conversation, &server, "two").await.unwrap();
        assert!(conversation.len() > after_first);

        // Earlier turns are replayed unchanged, as a prefix
        let replayed: Vec<String> = provider.requests()[2]
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(replayed[..after_first], first_snapshot[..]);
        assert_eq!(server.listings(), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_ends_query_with_error() {
        let provider = Arc::new(
            ScriptedProvider::new().then_err(AgentError::ProviderUnavailable("502".into())),
        );
        let server = ScriptedToolServer::new();
        let mut conversation = Conversation::new();

        let err = agent(&provider, 5)
            .process_query(&mut conversation, &server, "q")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::ProviderUnavailable(_)));
        // The query turns stay in the log
        assert_eq!(conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_context_window_limits_request_not_log() {
        let provider = Arc::new(ScriptedProvider::new().then_text("a").then_text("b"));
        let server = ScriptedToolServer::new();
        let agent = AgentBuilder::new()
            .provider(provider.clone())
            .context_window(Arc::new(RecentExchanges { max_exchanges: 1 }))
            .build()
            .unwrap();
        let mut conversation = Conversation::new();

        agent.process_query(&mut conversation, &server, "one").await.unwrap();
        agent.process_query(&mut conversation, &server, "two").await.unwrap();

        assert_eq!(conversation.len(), 6);
        let sent = &provider.requests()[1].messages;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content, "two");
    }

    #[test]
    fn test_builder_requires_provider() {
        assert!(matches!(AgentBuilder::new().build(), Err(AgentError::Config(_))));
    }
}
