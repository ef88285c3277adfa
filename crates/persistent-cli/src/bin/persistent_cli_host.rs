//! Persistent CLI host.
//!
//! Operator binary for driving a configured tool from a terminal, or for
//! normalizing captured tool output offline. Events are written to stdout as
//! JSON lines; logs go to stderr.

use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use persistent_cli::normalizer::{AdapterKind, OutputMode, OutputNormalizer};
use persistent_cli::process::output::event_stream;
use persistent_cli::{
    ChannelDispatcher, CliSessionContext, EnvironmentStore, Error, InMemoryEnvironmentStore, Result,
    RuntimeConfig,
    SessionHost, SessionId, ToolId, UnifiedCliEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "persistent-cli-host")]
#[command(about = "Drive long-lived CLI coding assistants and normalize their output", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to PERSISTENT_CLI_CONFIG or the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send stdin lines as prompts to a tool and print its events
    Run {
        /// Tool id from the configuration
        #[arg(long)]
        tool: String,

        /// Session id (generated when omitted)
        #[arg(long)]
        session: Option<String>,

        /// Working directory for the tool
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Seconds to keep printing events after stdin closes
        #[arg(long, default_value_t = 5)]
        linger_secs: u64,
    },

    /// Normalize captured output read from stdin
    Normalize {
        /// Output protocol of the capture
        #[arg(long, value_enum, default_value_t = ModeArg::Jsonl)]
        mode: ModeArg,

        /// Adapter for JSONL captures
        #[arg(long, value_enum, default_value_t = AdapterArg::Codex)]
        adapter: AdapterArg,
    },

    /// List configured tools
    Tools,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Jsonl,
    Plain,
}

#[derive(Clone, Copy, ValueEnum)]
enum AdapterArg {
    Codex,
    Claude,
    Passthrough,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Jsonl => OutputMode::Jsonl,
            ModeArg::Plain => OutputMode::Plain,
        }
    }
}

impl From<AdapterArg> for AdapterKind {
    fn from(adapter: AdapterArg) -> Self {
        match adapter {
            AdapterArg::Codex => AdapterKind::Codex,
            AdapterArg::Claude => AdapterKind::Claude,
            AdapterArg::Passthrough => AdapterKind::Passthrough,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            tool,
            session,
            cwd,
            linger_secs,
        } => {
            let config = load_config(cli.config).await?;
            run(config, ToolId::new(tool), session, cwd, Duration::from_secs(linger_secs)).await
        }
        Commands::Normalize { mode, adapter } => normalize(mode.into(), adapter.into()).await,
        Commands::Tools => {
            let config = load_config(cli.config).await?;
            for tool in &config.tools {
                let mode = match tool.output_mode {
                    OutputMode::Jsonl => "jsonl",
                    OutputMode::Plain => "plain",
                };
                println!("{:<16} {:<24} {:<6} {}", tool.id.as_str(), tool.display_name(), mode, tool.command);
            }
            Ok(())
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("persistent_cli=debug,persistent_cli_host=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("persistent_cli=info,persistent_cli_host=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn load_config(path: Option<PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load_from_path(&path).await,
        None => RuntimeConfig::load().await,
    }
}

async fn run(
    config: RuntimeConfig,
    tool_id: ToolId,
    session: Option<String>,
    cwd: Option<PathBuf>,
    linger: Duration,
) -> Result<()> {
    config.tool(&tool_id)?;

    let session_id = session.map(SessionId::new).unwrap_or_else(SessionId::generate);
    if !session_id.is_valid() {
        return Err(Error::protocol(format!("invalid session id '{}'", session_id)));
    }

    let mut context = CliSessionContext::new(session_id.clone());
    if let Some(dir) = cwd {
        context = context.with_working_directory(dir);
    }

    let (dispatcher, mut events) = ChannelDispatcher::new();
    let store: Arc<dyn EnvironmentStore> = Arc::new(InMemoryEnvironmentStore::new());
    let host = SessionHost::start(config, Some(store), Arc::new(dispatcher));
    info!(session = %session_id, tool = %tool_id, "Session ready");

    let printer = tokio::spawn(async move {
        let mut context = CliSessionContext::new(session_id);
        while let Some(dispatched) = events.recv().await {
            context.observe(&dispatched.event);
            print_event(&dispatched.event);
        }
        context
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let prompt = match line {
            Ok(Some(prompt)) if prompt.trim().is_empty() => continue,
            Ok(Some(prompt)) => prompt,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        if let Err(e) = host.send_prompt_with(&context, &tool_id, &prompt, &cancel).await {
            if e.is_launch_failure() {
                host.shutdown().await;
                return Err(e);
            }
            warn!("Prompt not delivered: {}", e);
        }
    }

    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(linger) => {}
    }

    host.end_session(&context.session_id).await;
    host.shutdown().await;
    drop(host);

    match printer.await {
        Ok(seen) if seen.is_resume() => {
            info!(thread_id = ?seen.cli_thread_id, "Tool thread id for resume");
        }
        Ok(_) => {}
        Err(e) => warn!("Event printer failed: {}", e),
    }
    Ok(())
}

async fn normalize(mode: OutputMode, adapter: AdapterKind) -> Result<()> {
    let normalizer = match mode {
        OutputMode::Jsonl => OutputNormalizer::jsonl(adapter.build()),
        OutputMode::Plain => OutputNormalizer::plain(),
    };
    let mut events = Box::pin(event_stream(tokio::io::stdin(), normalizer));
    while let Some(event) = events.next().await {
        print_event(&event);
    }
    Ok(())
}

fn print_event(event: &UnifiedCliEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(event_type = %event.event_type, "Failed to serialize event: {}", e),
    }
}
