mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use stepbox_common::ExecutionMode;
use stepbox_sandbox::{HostBridge, SandboxConfig};

#[derive(Parser)]
#[command(name = "stepbox")]
#[command(about = "Run and step through untrusted JavaScript in an isolated V8 sandbox")]
#[command(version)]
pub struct Cli {
    /// Sandbox configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Source file plus the entry point to call
#[derive(clap::Args)]
pub struct SourceArgs {
    /// JavaScript source file
    pub file: PathBuf,

    /// Name of the function to invoke
    #[arg(short, long, default_value = "main")]
    pub entry: String,

    /// Entry point arguments as a JSON array
    #[arg(short, long, default_value = "[]")]
    pub args: String,

    /// Wall-clock timeout in milliseconds (default from config)
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Auto,
    Manual,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => ExecutionMode::Auto,
            ModeArg::Manual => ExecutionMode::Manual,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run to completion, printing every event and the outcome
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Step through a run interactively (step, resume, back N, terminate)
    Step {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Print the instrumented program
    Instrument {
        /// JavaScript source file
        file: PathBuf,

        /// Name of the function to invoke
        #[arg(short, long, default_value = "main")]
        entry: String,

        #[arg(short, long, value_enum, default_value = "auto")]
        mode: ModeArg,
    },
    /// Serve the JSON-lines protocol on stdin/stdout
    Serve,
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "stepbox={},stepbox_sandbox={},stepbox_cli={}",
                    log_level, log_level, log_level
                ))
            }),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = SandboxConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load sandbox configuration")?;

    match cli.command {
        Commands::Run { source, json } => {
            let request = commands::load_request(&source, ExecutionMode::Auto)?;
            commands::execute_run(HostBridge::v8(config), request, json).await
        }
        Commands::Step { source } => {
            let request = commands::load_request(&source, ExecutionMode::Manual)?;
            commands::execute_step(HostBridge::v8(config), request).await
        }
        Commands::Instrument { file, entry, mode } => {
            commands::execute_instrument(&config, &file, &entry, mode.into())
        }
        Commands::Serve => commands::execute_serve(HostBridge::v8(config)).await,
    }
}
