//! emend - optimistic file-editing engine.
//!
//! This is the main entry point for the emend CLI.

use clap::{Parser, Subcommand};
use emend::commands;
use emend_patch::PatchError;
use emend_snapshot::SnapshotError;
use emend_util::log::{self, LogConfig, LogLevel};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "emend")]
#[command(author, version, about = "Optimistic file-editing engine", long_about = None)]
struct Cli {
    /// Repository root (defaults to walking up from the current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an edit-instruction stream (JSON array) to the working tree
    Apply {
        /// Read instructions from a file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Description recorded on the batch
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List batches, most recent first
    History {
        /// Maximum number of batches to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show a file's change in a batch
    Diff {
        /// File to diff
        file: PathBuf,
        /// Batch id (defaults to the newest batch touching the file)
        batch: Option<u64>,
    },
    /// Write a batch's pre-images back to the working tree
    Restore {
        /// Batch id (defaults to the newest committed batch)
        batch: Option<u64>,
        /// Restore only this file
        file: Option<PathBuf>,
    },
    /// Prune old batches, keeping the N most recent
    Keep {
        /// How many committed batches to keep
        count: Option<usize>,
        /// Prune by age instead of count
        #[arg(long)]
        older_than_days: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    log::init(LogConfig {
        print: cli.verbose,
        level: if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        },
        include_location: false,
    });

    let root = match resolve_root(cli.root.clone()) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Apply { file, message } => {
            commands::apply::run(&root, file.as_deref(), message.as_deref()).await
        }
        Commands::History { limit } => commands::history::run(&root, limit).await,
        Commands::Diff { file, batch } => commands::diff::run(&root, &file, batch).await,
        Commands::Restore { batch, file } => {
            commands::restore::run(&root, batch, file.as_deref()).await
        }
        Commands::Keep {
            count,
            older_than_days,
        } => commands::keep::run(&root, count, older_than_days).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn resolve_root(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    let cwd = std::env::current_dir()?;
    Ok(emend_util::path::find_repo_root(&cwd).unwrap_or(cwd))
}

/// Exit codes: 0 success, 1 user error, 2 backend failure.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(snapshot) = err.downcast_ref::<SnapshotError>() {
        if snapshot.is_user_error() {
            1
        } else {
            2
        }
    } else if err.downcast_ref::<PatchError>().is_some() {
        1
    } else {
        2
    }
}
