//! # TopDup CLI (`topdup`)
//!
//! ## Usage
//!
//! ```bash
//! topdup --config ./config/topdup.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `topdup init` | Create both SQLite stores and their schema |
//! | `topdup sync` | Pull new articles and record their near-duplicates |
//! | `topdup consolidate` | Append new similar pairs to `similar_docs` |
//! | `topdup reindex` | Rebuild the remote index and clear the local replica |
//! | `topdup run` | Run all jobs on their schedules until Ctrl-C |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use topdup::{config, jobs, logging, migrate, scheduler};

/// TopDup: near-duplicate detection for news articles.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults; environment variables
/// override individual keys.
#[derive(Parser)]
#[command(
    name = "topdup",
    about = "TopDup: near-duplicate detection for news articles",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/topdup.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create both stores and their schema. Idempotent.
    Init,

    /// Run one sync: pull new remote articles into the local replica,
    /// retrieve near-duplicates and write scores to remote metadata.
    Sync,

    /// Run one consolidation: append new similar pairs to `similar_docs`.
    Consolidate,

    /// Rebuild remote embeddings and index from scratch, then clear the
    /// local replica.
    Reindex,

    /// Run sync, consolidation and the daily reindex on their schedules.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::init_stores(&cfg).await?;
            println!("Stores initialized successfully.");
        }
        Commands::Sync => {
            let pipeline = jobs::Pipeline::from_config(&cfg)?;
            let outcome = pipeline.run_sync().await;
            println!("{}", jobs::summarize_sync(&outcome));
        }
        Commands::Consolidate => {
            let pipeline = jobs::Pipeline::from_config(&cfg)?;
            let outcome = pipeline.run_consolidation().await;
            println!("{}", jobs::summarize_consolidation(&outcome));
        }
        Commands::Reindex => {
            let pipeline = jobs::Pipeline::from_config(&cfg)?;
            let outcome = pipeline.run_full_remote_reindex().await;
            println!("{}", jobs::summarize_reindex(&outcome));
        }
        Commands::Run => {
            let pipeline = Arc::new(jobs::Pipeline::from_config(&cfg)?);
            scheduler::Scheduler::new(pipeline, &cfg.schedule)?
                .run()
                .await?;
        }
    }

    Ok(())
}
