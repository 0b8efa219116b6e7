//! `keep` - prune old batches.
//!
//! Retains the N most recent committed batches (or those younger than
//! an age horizon) and drops the payloads of the rest. Pruned batches
//! stay listed as tombstones.

use crate::commands::open_manager;
use anyhow::Result;
use std::path::Path;

pub async fn run(root: &Path, count: Option<usize>, older_than_days: Option<u32>) -> Result<()> {
    let (config, manager) = open_manager(root).await?;

    let pruned = match older_than_days {
        Some(days) => manager.cleanup(days).await?,
        None => manager.prune(count.unwrap_or(config.keep_count)).await?,
    };

    if pruned == 0 {
        println!("Nothing to prune.");
    } else {
        println!("Pruned {pruned} batch(es).");
    }

    Ok(())
}
