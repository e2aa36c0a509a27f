//! redraft CLI - draft, critique and revise a reply until it is approved
//!
//! Usage:
//!   redraft run <message>        Run the loop on a message
//!   redraft resume <id>          Resume an interrupted conversation
//!   redraft show <id>            Show a conversation's checkpoint
//!   redraft list                 List stored conversations
//!   redraft config init          Write the default config file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use redraft_agent::{AnthropicClient, LlmDecisionExtractor};
use redraft_core::{RedraftConfig, RevisionState};
use redraft_orchestrator::{
    CheckpointStore, FileCheckpointStore, Orchestrator, RunOptions, TranscriptLogger,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "redraft")]
#[command(author, version, about = "Write, review and revise replies with a bounded loop")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding checkpoints and transcripts
    #[arg(long, global = true, default_value = ".redraft")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the revision loop on a message
    Run {
        /// The incoming message to respond to
        message: String,

        /// Conversation to run under (a new id is generated if omitted)
        #[arg(long)]
        conversation_id: Option<String>,

        /// Override the revision cap
        #[arg(long)]
        max_revisions: Option<u32>,

        /// Override the model (opus, sonnet, haiku or a full model id)
        #[arg(long)]
        model: Option<String>,

        /// Per-node timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Resume a conversation from its last checkpoint
    Resume {
        conversation_id: String,

        /// Per-node timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show the stored checkpoint for a conversation
    Show {
        conversation_id: String,

        /// Print the raw checkpoint JSON instead of the conversation log
        #[arg(long)]
        json: bool,
    },

    /// List conversations with a stored checkpoint
    List,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default config to .redraft/config.toml
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let root = std::env::current_dir().context("Failed to resolve working directory")?;

    match cli.command {
        Commands::Run {
            message,
            conversation_id,
            max_revisions,
            model,
            timeout_secs,
        } => {
            cmd_run(
                &root,
                &cli.state_dir,
                message,
                conversation_id,
                max_revisions,
                model,
                timeout_secs,
            )
            .await
        }
        Commands::Resume {
            conversation_id,
            timeout_secs,
        } => cmd_resume(&root, &cli.state_dir, conversation_id, timeout_secs).await,
        Commands::Show {
            conversation_id,
            json,
        } => cmd_show(&cli.state_dir, conversation_id, json).await,
        Commands::List => cmd_list(&cli.state_dir).await,
        Commands::Config { action } => cmd_config(&root, action),
    }
}

type CliOrchestrator = Orchestrator<AnthropicClient, LlmDecisionExtractor<AnthropicClient>>;

fn build_orchestrator(root: &Path, state_dir: &Path, config: &RedraftConfig) -> Result<CliOrchestrator> {
    let prompts = config
        .prompts
        .resolve(root)
        .context("Failed to load prompt instructions")?;
    let client = AnthropicClient::from_config(&config.model).context("Failed to create model client")?;
    // Classification should be as deterministic as the API allows
    let extractor = LlmDecisionExtractor::new(client.clone().with_temperature(0.0));
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(state_dir.join("checkpoints")));

    Ok(Orchestrator::new(
        client,
        extractor,
        store,
        config.loop_settings.clone(),
        prompts,
    )
    .with_transcript(TranscriptLogger::new(state_dir.join("transcripts"))))
}

/// Options with a Ctrl-C handler wired to the cancellation token
fn run_options(timeout_secs: Option<u64>) -> RunOptions {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after checkpoint");
            trigger.cancel();
        }
    });

    let options = RunOptions::default().with_cancel(cancel);
    match timeout_secs {
        Some(secs) => options.with_timeout(Duration::from_secs(secs)),
        None => options,
    }
}

async fn cmd_run(
    root: &Path,
    state_dir: &Path,
    message: String,
    conversation_id: Option<String>,
    max_revisions: Option<u32>,
    model: Option<String>,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let mut config = RedraftConfig::load(root).context("Failed to load configuration")?;
    if let Some(max) = max_revisions {
        config.loop_settings.max_revisions = max;
    }
    if let Some(model) = model {
        config.model.name = model;
    }
    config.validate()?;

    let conversation_id = conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(
        conversation = %conversation_id,
        max_revisions = config.loop_settings.max_revisions,
        model = %config.model.name,
        "Starting revision loop"
    );

    let orchestrator = build_orchestrator(root, state_dir, &config)?;
    let state = orchestrator
        .run_with(&message, &conversation_id, run_options(timeout_secs))
        .await
        .with_context(|| interrupted_hint(&conversation_id))?;

    print_result(&conversation_id, &state);
    Ok(())
}

async fn cmd_resume(
    root: &Path,
    state_dir: &Path,
    conversation_id: String,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let config = RedraftConfig::load(root).context("Failed to load configuration")?;
    let orchestrator = build_orchestrator(root, state_dir, &config)?;

    let state = orchestrator
        .resume_with(&conversation_id, run_options(timeout_secs))
        .await
        .with_context(|| interrupted_hint(&conversation_id))?;

    print_result(&conversation_id, &state);
    Ok(())
}

async fn cmd_show(state_dir: &Path, conversation_id: String, json: bool) -> Result<()> {
    let store = FileCheckpointStore::new(state_dir.join("checkpoints"));
    let checkpoint = store
        .load(&conversation_id)
        .await?
        .with_context(|| format!("No checkpoint for conversation {}", conversation_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    println!(
        "Conversation {} (step {}, next: {}, saved {})",
        checkpoint.conversation_id,
        checkpoint.step,
        checkpoint.next,
        checkpoint.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    for entry in checkpoint.state.log().iter() {
        println!("[{}] {}", entry.author, entry.content);
    }
    Ok(())
}

async fn cmd_list(state_dir: &Path) -> Result<()> {
    let store = FileCheckpointStore::new(state_dir.join("checkpoints"));
    let ids = store.list().await?;
    if ids.is_empty() {
        println!("No conversations in {}", store.dir().display());
        return Ok(());
    }

    for id in ids {
        match store.load(&id).await {
            Ok(Some(cp)) => {
                let status = if cp.is_finished() { "done" } else { "unfinished" };
                println!(
                    "{}  {}  revisions={}  next={}",
                    id,
                    status,
                    cp.state.revision_count(),
                    cp.next
                );
            }
            Ok(None) => {}
            Err(e) => println!("{}  unreadable: {}", id, e),
        }
    }
    Ok(())
}

fn cmd_config(root: &Path, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Init => {
            let path = RedraftConfig::path(root);
            if path.exists() {
                println!("Config already exists at {}", path.display());
                return Ok(());
            }
            let path = RedraftConfig::write_default(root)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigCommands::Show => {
            let config = RedraftConfig::load(root)?;
            println!(
                "max_revisions = {}\nmax_revisions_message = {:?}\nmodel = {}\ntemperature = {}\nmax_tokens = {}",
                config.loop_settings.max_revisions,
                config.loop_settings.max_revisions_message,
                config.model.name,
                config.model.temperature,
                config.model.max_tokens,
            );
        }
    }
    Ok(())
}

fn interrupted_hint(conversation_id: &str) -> String {
    format!(
        "Run for {} did not finish; continue with `redraft resume {}`",
        conversation_id, conversation_id
    )
}

fn print_result(conversation_id: &str, state: &RevisionState) {
    println!("Conversation: {}", conversation_id);
    println!("Revisions:    {}", state.revision_count());
    println!("Decision:     {}", state.decision());
    if !state.feedback().is_empty() {
        println!("Feedback:     {}", state.feedback());
    }
    println!();
    println!("{}", state.draft());
}
