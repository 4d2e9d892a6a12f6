use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "dirgen")]
#[command(version, about = "Drive and observe DirGen orchestrator runs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every gate without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    /// Orchestrator base URL. Overrides dirgen.toml and DIRGEN_HOST.
    #[arg(long, global = true)]
    pub host: Option<String>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a document and follow the run it starts
    Run {
        /// Document to submit. Defaults to .dirgen/svad.md, then the newest docs/*svad*.md
        document: Option<PathBuf>,
    },
    /// Follow an existing run without submitting anything
    Watch { run_id: String },
    /// Send an approval decision for a run
    #[command(group(ArgGroup::new("decision").required(true).args(["approve", "reject"])))]
    Approve {
        run_id: String,
        #[arg(long)]
        approve: bool,
        #[arg(long)]
        reject: bool,
        /// Feedback sent with the decision
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Ask the orchestrator to stop a run
    Stop { run_id: String },
    /// Check that the orchestrator is reachable
    Health,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default dirgen.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    use dirgen::client_config::DirgenConfig;
    use dirgen::logging::init_logging;

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&project_dir, command.clone());
    }

    let config = DirgenConfig::with_cli_args(project_dir, cli.host.clone(), cli.verbose, cli.yes)?;
    let streams = matches!(cli.command, Commands::Run { .. } | Commands::Watch { .. });
    let log_dir = (streams && config.log_to_file()).then(|| config.log_dir());
    let _log_guard = init_logging(&config.log_level(), log_dir.as_deref(), config.log_json());

    match &cli.command {
        Commands::Run { document } => cmd::cmd_run(&config, document.clone()).await?,
        Commands::Watch { run_id } => cmd::cmd_watch(&config, run_id).await?,
        Commands::Approve {
            run_id,
            approve,
            reject: _,
            comment,
        } => cmd::cmd_approve(&config, run_id, *approve, comment.as_deref()).await?,
        Commands::Stop { run_id } => cmd::cmd_stop(&config, run_id).await?,
        Commands::Health => cmd::cmd_health(&config).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
