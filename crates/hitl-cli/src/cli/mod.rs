//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use hitl_core::client::WorkflowClient;
use hitl_core::config::Config;
use hitl_core::core::{Decision, OpInbox, Orchestrator, SessionStore, ThreadManager, interrupt};

mod commands;
mod follow;

#[derive(Parser)]
#[command(name = "hitl")]
#[command(version)]
#[command(about = "Human-in-the-loop client for streamed workflow runs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Workflow server base URL
    #[arg(long, global = true, env = "HITL_BASE_URL", value_name = "URL")]
    base_url: Option<String>,

    /// Assistant (graph) id to run
    #[arg(long, global = true, value_name = "ID")]
    assistant: Option<String>,

    /// Journal raw frames and log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cancel a run that streams longer than this (0 disables)
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start a run on a fresh thread and follow it
    Run {
        /// Topic to research (uses the configured default when omitted)
        #[arg(short, long)]
        topic: Option<String>,

        /// Answer the first approval request with this decision
        #[arg(short, long, value_name = "DECISION")]
        decision: Option<Decision>,
    },
    /// Answer the pending approval request of the saved thread
    Resume {
        /// accept (y), retry, or reject (n)
        #[arg(value_name = "DECISION")]
        decision: Decision,
    },
    /// Show the saved session and whether it still awaits approval
    Status,
    /// Forget the saved thread and topic
    Reset,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Print the effective configuration as TOML
    Generate,
}

/// Everything a session command needs.
pub struct SessionContext {
    pub config: Config,
    pub base_url: String,
}

impl SessionContext {
    /// Builds an orchestrator over the persisted session.
    pub fn open(&self) -> (Orchestrator, OpInbox) {
        let threads = ThreadManager::load(SessionStore::default_location());
        Orchestrator::new(
            WorkflowClient::new(&self.base_url),
            self.config.clone(),
            threads,
        )
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = crate::logging::init(cli.verbose);

    interrupt::init()?;

    // Operations are cooperative tasks on one thread.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli {
        command,
        base_url,
        assistant,
        verbose,
        timeout,
    } = cli;

    let session = || -> Result<SessionContext> {
        let mut config = Config::load().context("load config")?;
        if let Some(assistant) = assistant.clone() {
            config.assistant_id = assistant;
        }
        if verbose {
            config.interpret.verbose = true;
        }
        if let Some(secs) = timeout {
            config.stream_timeout_secs = secs;
        }
        let base_url = config.effective_base_url(base_url.as_deref())?;
        Ok(SessionContext { config, base_url })
    };

    // default to interactive mode
    let Some(command) = command else {
        return commands::interactive::run(&session()?).await;
    };

    match command {
        Commands::Run { topic, decision } => {
            commands::run::run(&session()?, topic.as_deref(), decision).await
        }
        Commands::Resume { decision } => commands::resume::run(&session()?, decision).await,
        Commands::Status => commands::status::run(&session()?).await,
        Commands::Reset => commands::reset::run(&session()?),
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
        },
    }
}
