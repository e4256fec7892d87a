//! sback: operational CLI for the snapback history engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use sback_core::SbError;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

/// Exit codes shared with wrapping tooling.
mod exit {
    pub const OK: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const LOCK_TIMEOUT: u8 = 3;
    pub const INTEGRITY: u8 = 4;
    pub const PARTIAL_ROLLBACK: u8 = 5;
}

#[derive(Parser)]
#[command(name = "sback")]
#[command(about = "Session-grained local edit history with selective rollback", long_about = None)]
#[command(version)]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Data directory (defaults to <workspace>/.sback)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and default configuration
    Init,
    /// List recorded sessions, newest first
    List {
        /// Maximum sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one session manifest
    Show {
        /// Session ID (or unique prefix)
        session_id: String,
        /// Emit the manifest wire form as JSON
        #[arg(long)]
        json: bool,
    },
    /// Revert a recorded session to its starting state
    Rollback {
        /// Session ID (or unique prefix)
        session_id: String,
        /// Plan and validate only; touch nothing
        #[arg(long)]
        dry_run: bool,
        /// Skip re-hashing staged content before the swap
        #[arg(long)]
        skip_verification: bool,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Delete a recorded session and release its content references
    Delete {
        /// Session ID (or unique prefix)
        session_id: String,
    },
    /// Run the recovery sweeper now
    Recover,
    /// Collect unreferenced blobs past the grace window
    Gc {
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Show blob store statistics
    Stats,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| workspace.join(".sback"));

    match run(cli, &workspace, &data_dir) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            if let Some(suggestion) = e
                .downcast_ref::<SbError>()
                .and_then(|sb| sb.recovery_suggestion())
            {
                eprintln!("hint: {}", suggestion);
            }
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn run(cli: Cli, workspace: &PathBuf, data_dir: &PathBuf) -> Result<u8> {
    match cli.command {
        Commands::Init => commands::init::run(workspace, data_dir),
        Commands::List { limit, json } => commands::list::run(workspace, data_dir, limit, json),
        Commands::Show { session_id, json } => {
            commands::show::run(workspace, data_dir, &session_id, json)
        }
        Commands::Rollback {
            session_id,
            dry_run,
            skip_verification,
            yes,
        } => commands::rollback::run(
            workspace,
            data_dir,
            &session_id,
            dry_run,
            skip_verification,
            yes,
        ),
        Commands::Delete { session_id } => commands::delete::run(workspace, data_dir, &session_id),
        Commands::Recover => commands::recover::run(workspace, data_dir),
        Commands::Gc { dry_run } => commands::gc::run(workspace, data_dir, dry_run),
        Commands::Stats => commands::stats::run(workspace, data_dir),
    }
}

fn exit_code_for(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<SbError>() {
        Some(SbError::LockTimeout { .. }) | Some(SbError::WorkspaceLockHeld { .. }) => {
            exit::LOCK_TIMEOUT
        }
        Some(SbError::HashMismatch { .. })
        | Some(SbError::CorruptedBlob { .. })
        | Some(SbError::BlobNotFound(_))
        | Some(SbError::ManifestIncomplete { .. }) => exit::INTEGRITY,
        _ => exit::FAILURE,
    }
}
