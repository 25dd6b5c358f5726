//! mcp-chat
//!
//! Chat with an OpenRouter-hosted model that can call the tools of an MCP
//! server. Without a query argument it runs an interactive loop; with one
//! it answers that query and exits.

mod settings;

use std::sync::Arc;

use agent_core::message::RecentExchanges;
use agent_core::reasoning::AgentBuilder;
use agent_core::tool::catalog_tool;
use agent_core::{AgentError, LlmProvider, Session, ToolServer};
use agent_runtime::mcp;
use agent_runtime::openrouter::{self, OpenRouterProvider};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "mcp-chat", version, about = "Tool-calling chat client for MCP servers")]
pub struct Cli {
    /// Model identifier (overrides MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// MCP server: an SSE URL or a command line to spawn (overrides MCP_SERVER_URL)
    #[arg(long)]
    pub server: Option<String>,

    /// Tool-call round budget per query (overrides MAX_TOOL_ROUNDS)
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Replay only the most recent N question-and-answer exchanges to the
    /// model (overrides HISTORY_EXCHANGES)
    #[arg(long)]
    pub history_exchanges: Option<usize>,

    /// Send the query once to the responses endpoint with the server's tool
    /// catalog and print the raw response
    #[arg(long, requires = "query")]
    pub catalog: bool,

    /// Query to answer; starts an interactive session when omitted
    pub query: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(|key| std::env::var(key).ok(), &cli)?;
    let provider = Arc::new(OpenRouterProvider::new(settings.provider.clone())?);
    let query = cli.query.join(" ");

    if settings.provider.api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY is not set; requests may be rejected");
    }

    // Check the model endpoint before connecting the tool server
    match provider.health_check().await {
        Ok(true) => tracing::info!(provider = provider.name(), "Model endpoint reachable"),
        Ok(false) | Err(_) => tracing::warn!(
            base_url = %settings.provider.base_url,
            "Model endpoint not reachable; queries may fail"
        ),
    }

    let tools = mcp::connect(&settings.server, settings.connect_options())
        .await
        .map_err(AgentError::from)?;

    if cli.catalog {
        let result = run_catalog(&provider, tools.as_ref(), &settings.model, &query).await;
        if let Err(e) = tools.close().await {
            tracing::warn!(error = %e, "Failed to close tool server");
        }
        return result;
    }

    let mut builder = AgentBuilder::new()
        .provider(provider)
        .model(settings.model.clone())
        .max_rounds(settings.max_rounds);
    if let Some(max_exchanges) = settings.history_exchanges {
        builder = builder.context_window(Arc::new(RecentExchanges { max_exchanges }));
    }
    let agent = builder.build()?;

    let mut session = Session::connect(agent, tools).await?;
    tracing::info!(model = %settings.model, server = %settings.server, "Session ready");

    let result = if query.is_empty() {
        chat_loop(&mut session).await
    } else {
        session
            .process_query(&query)
            .await
            .map(|outcome| println!("{}", outcome.answer))
            .map_err(anyhow::Error::from)
    };

    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Failed to close session");
    }
    result
}

/// Read queries from stdin until `quit` or end of input
async fn chat_loop(session: &mut Session) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("MCP client started. Type your queries or 'quit' to exit.");
    loop {
        stdout.write_all(b"\nQuery: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.eq_ignore_ascii_case("quit") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        match session.process_query(query).await {
            Ok(outcome) => println!("\n{}", outcome.answer),
            Err(e) => {
                tracing::error!(error = %e, "Query failed");
                println!("\nError: {}", e.user_message());
            }
        }
    }
    Ok(())
}

async fn run_catalog(
    provider: &OpenRouterProvider,
    tools: &dyn ToolServer,
    model: &str,
    query: &str,
) -> anyhow::Result<()> {
    let catalog: Vec<_> = tools.list_tools().await?.iter().map(catalog_tool).collect();
    let response = provider.respond(model, query, &catalog).await?;

    let text = openrouter::output_text(&response);
    if !text.is_empty() {
        tracing::info!(answer = %text, "Responses endpoint answered");
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
