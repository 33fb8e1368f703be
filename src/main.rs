use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reviewflow::config::CONFIG_DIR;
use reviewflow::logging::{self, LogOptions};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "reviewflow")]
#[command(version, about = "Route, run and checkpoint code review workers")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs on stderr as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Root for sessions, artifacts and cache. Overrides REVIEWFLOW_DATA_DIR and reviewflow.toml.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Application name sessions and artifacts are scoped to
    #[arg(long, global = true)]
    pub app: Option<String>,

    /// Owner sessions and artifacts are scoped to (defaults to session.default_owner)
    #[arg(long, global = true)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyse a message (argument, --file, or stdin) through the pipeline
    Analyze {
        /// The request, with the code in a fenced block
        message: Option<String>,

        /// Read the request from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Delay between workers in milliseconds
        #[arg(long)]
        pacing_ms: Option<u64>,

        /// continue_on_error or abort_on_error
        #[arg(long)]
        failure_policy: Option<String>,

        /// Print every event as a JSON line
        #[arg(long)]
        json: bool,
    },
    /// Inspect or delete sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
    /// Inspect stored artifacts
    Artifacts {
        #[command(subcommand)]
        command: ArtifactsCommands,
    },
    /// Inspect or prune the result cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionsCommands {
    /// List sessions for the application and owner
    List,
    /// Show a session's state and events
    Show {
        id: String,
        /// Include the full event journal
        #[arg(long)]
        events: bool,
    },
    /// Delete a session
    Delete { id: String },
}

#[derive(Subcommand, Clone)]
pub enum ArtifactsCommands {
    /// List artifact names
    List,
    /// Print an artifact's content
    Show {
        name: String,
        /// Print the metadata sidecar instead of the content
        #[arg(long)]
        metadata: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum CacheCommands {
    /// Count entries and expired entries
    Stats,
    /// Remove expired entries
    Sweep,
    /// Remove every entry
    Clear,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default reviewflow.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // File logging only once the project has a .reviewflow directory.
    let config_dir = project_dir.join(CONFIG_DIR);
    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: config_dir.is_dir().then(|| config_dir.join("logs")),
    })?;

    match &cli.command {
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
        Commands::Analyze {
            message,
            file,
            session,
            pacing_ms,
            failure_policy,
            json,
        } => {
            let args = cmd::AnalyzeArgs {
                message: message.clone(),
                file: file.clone(),
                session: session.clone(),
                pacing_ms: *pacing_ms,
                failure_policy: failure_policy.clone(),
                json: *json,
            };
            cmd::cmd_analyze(&cli, &project_dir, args).await?;
        }
        Commands::Sessions { command } => {
            cmd::cmd_sessions(&cli, &project_dir, command.clone()).await?
        }
        Commands::Artifacts { command } => {
            cmd::cmd_artifacts(&cli, &project_dir, command.clone()).await?
        }
        Commands::Cache { command } => cmd::cmd_cache(&cli, &project_dir, command.clone()).await?,
    }

    Ok(())
}
