//! mask_stats - read a durable mask tally store
//!
//! Prints counts, recent history and run summaries as JSON. The database is
//! opened read-only and must already exist.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use mask_tally::{SqliteStatePublisher, StatePublisher, Timestamp, DEFAULT_HISTORY_WINDOW};

#[derive(Parser, Debug)]
#[command(name = "mask_stats", about = "Inspect a mask tally SQLite store")]
struct Args {
    /// Path to the mask tally SQLite DB
    #[arg(long, env = "MASK_TALLY_DB_PATH", default_value = "mask_tally.db")]
    db: String,

    /// Compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-class counts, total and recent history
    Snapshot {
        #[arg(long, default_value_t = DEFAULT_HISTORY_WINDOW)]
        limit: usize,
    },
    /// Most recent history entries, newest first
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_WINDOW)]
        limit: usize,
    },
    /// Every stored run summary, oldest first
    Summaries,
    /// The summary published at one timestamp (`YYYY-MM-DD HH:MM:SS`)
    Summary {
        #[arg(long)]
        timestamp: Timestamp,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let store = SqliteStatePublisher::open_existing(&args.db)?;

    match &args.command {
        Command::Snapshot { limit } => emit(&store.read_view(*limit)?, args.compact),
        Command::History { limit } => emit(&store.recent_history(*limit)?, args.compact),
        Command::Summaries => emit(&store.summaries()?, args.compact),
        Command::Summary { timestamp } => {
            let summary = store
                .summary_at(timestamp)?
                .ok_or_else(|| anyhow!("no summary recorded at {}", timestamp))?;
            emit(&summary, args.compact)
        }
    }
}

fn emit<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", text);
    Ok(())
}
