//! chatlog: conversation log main binary
//!
//! Usage:
//!   chatlog                 - Start the interactive chat
//!   chatlog --once <text>   - Send one message, print the reply and exit
//!   chatlog --help          - Show help

mod cli;

use chatlog_core::{
    ChatCompletionsResponder, Config, ElizaResponder, MemoryBackend, MessageStore,
    NotificationBus, PersistenceAdapter, ResponseRouter, SnapshotBackend, SqliteBackend,
    StaticCredential,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Run mode
enum RunMode {
    /// Interactive REPL
    Interactive,
    /// Submit a single message
    Once(String),
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_args(std::env::args().skip(1));

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("chatlog {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Logs go to stderr so they never interleave with the conversation view
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting chatlog...");
    tracing::info!("Storage: {}", config.storage.db_path);

    let router = build_router(&config)?;

    match mode {
        RunMode::Interactive => cli::run_cli(router).await,
        RunMode::Once(text) => cli::run_once(router, &text).await,
        _ => Ok(()),
    }
}

/// Parse command line arguments
fn parse_args(args: impl IntoIterator<Item = String>) -> RunMode {
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            "--once" | "-e" => {
                let text = args.collect::<Vec<_>>().join(" ");
                return RunMode::Once(text);
            }
            _ => {}
        }
    }

    RunMode::Interactive
}

/// Wire store, responders and router from configuration
fn build_router(config: &Config) -> anyhow::Result<ResponseRouter> {
    let backend: Arc<dyn SnapshotBackend> = match SqliteBackend::new(&config.storage.db_path) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::warn!(
                "Snapshot database unavailable ({}), history will not survive restart",
                e
            );
            Arc::new(MemoryBackend::new())
        }
    };

    let store = Arc::new(MessageStore::open(
        PersistenceAdapter::new(backend),
        Arc::new(NotificationBus::new()),
    ));

    let credentials = Arc::new(StaticCredential::new(config.llm.api_key.clone()));
    let remote = ChatCompletionsResponder::new(&config.llm, credentials)
        .map_err(|e| anyhow::anyhow!("Failed to create remote responder: {}", e))?;
    tracing::info!("Remote model: {}", remote.model());

    Ok(ResponseRouter::new(store, Arc::new(ElizaResponder::new()))
        .with_remote(Arc::new(remote))
        .with_mode(config.chat.mode))
}

/// Print help message
fn print_help() {
    println!("chatlog - conversation log with local and remote responders");
    println!();
    println!("Usage:");
    println!("  chatlog                 Start the interactive chat");
    println!("  chatlog --once <text>   Send one message, print the reply and exit");
    println!("  chatlog --help          Show this help message");
    println!("  chatlog --version       Show version");
    println!();
    println!("Environment Variables:");
    println!("  LLM_API_KEY          API key for the remote responder (or OPENROUTER_API_KEY)");
    println!("  LLM_MODEL            Model name (default: deepseek/deepseek-chat-v3.1)");
    println!("  LLM_BASE_URL         Custom API endpoint (default: https://openrouter.ai/api/v1)");
    println!("  LLM_TIMEOUT_SECS     Remote request timeout (default: 60)");
    println!("  DB_PATH              Snapshot database (default: data/chatlog.db)");
    println!("  CHAT_MODE            Initial mode: local or remote (default: local)");
}
