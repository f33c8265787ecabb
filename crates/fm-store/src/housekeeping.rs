//! Housekeeping: prunes future-dated blocks and archives aged ones.
//!
//! Future-dated blocks come from clock rollbacks or restored test data;
//! they are discarded to keep the index compact and monotone. Aged blocks
//! beyond the configured retention count are handed to the archiver, oldest
//! first. Archival failure of one block is logged and does not stop the run;
//! prune failures propagate.

use crate::archive;
use crate::clock;
use crate::error::Result;
use crate::keeper::IndexKeeper;
use tokio::fs;
use tracing::{debug, error};

/// Options for one housekeeping run.
#[derive(Debug, Clone, Copy, Default)]
pub struct HousekeepingOptions {
    /// Number of newest live blocks to keep per device. Zero disables
    /// archival entirely.
    pub level1_blocks: usize,
}

/// Outcome of one housekeeping run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Future-dated blocks removed.
    pub pruned_blocks: usize,
    /// Aged blocks archived.
    pub archived_blocks: usize,
    /// Materialized archive copies re-packed and removed.
    pub swept_blocks: usize,
    /// Whether the index log was compacted.
    pub compacted_index: bool,
}

/// Runs housekeeping against the given wall-clock instant.
pub async fn run(
    keeper: &mut IndexKeeper,
    opts: &HousekeepingOptions,
    now_ms: u64,
    index_compact_threshold: u64,
) -> Result<HousekeepingReport> {
    let mut report = HousekeepingReport::default();
    let now_block = clock::block_index(now_ms, keeper.block_hours());

    // Prune: anything indexed after the current block cannot be real.
    for devid in keeper.devices() {
        for block in keeper.future_live_blocks(devid, now_block) {
            keeper.remove_device_block_index(devid, block).await?;

            let dir = keeper.layout().device_block_dir(devid, block);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            let _ = fs::remove_dir(keeper.layout().block_dir(block)).await;

            debug!(devid, block, "pruned future-dated block");
            report.pruned_blocks += 1;
        }
    }

    // Archive: keep the newest level1_blocks live, pack the rest.
    if opts.level1_blocks > 0 {
        for devid in keeper.devices() {
            let count = keeper.live_block_count(devid);
            if count > opts.level1_blocks {
                let excess = count - opts.level1_blocks;
                for block in keeper.oldest_live_blocks(devid, excess) {
                    match archive::archive_device_block(keeper, devid, block).await {
                        Ok(()) => report.archived_blocks += 1,
                        Err(err) => {
                            error!(devid, block, error = %err, "archival failed, block stays live");
                        }
                    }
                }
            }

            // Archived blocks materialized by reads are re-packed so any
            // overwrites land in the tarball, then the copy is removed.
            for block in keeper.archived_blocks(devid) {
                let dir = keeper.layout().device_block_dir(devid, block);
                if !fs::try_exists(&dir).await? {
                    continue;
                }
                match archive::archive_device_block(keeper, devid, block).await {
                    Ok(()) => report.swept_blocks += 1,
                    Err(err) => {
                        error!(devid, block, error = %err, "sweep of materialized block failed");
                    }
                }
            }
        }
    }

    if keeper.index_log_len() > index_compact_threshold {
        keeper.compact_index().await?;
        report.compacted_index = true;
    }

    Ok(report)
}
