//! Projection engine: reconstructs the latest metric values as of an
//! instant.
//!
//! The walk runs backward through a device's blocks, live first, archived
//! second, collecting the freshest observation of each requested metric with
//! a ticktime at or before the reference instant. Work is bounded by the
//! travel limits: at most `live_travel_max + archive_travel_max` blocks are
//! opened regardless of how much history exists.
//!
//! The walk is best-effort. A record that fails to decode is skipped with a
//! warning; a block that fails to open ends the walk at that block and the
//! partial result is returned without error.

use crate::clock;
use crate::error::Result;
use crate::keeper::IndexKeeper;
use crate::loader;
use crate::record;
use std::collections::BTreeSet;
use tokio::fs;
use tracing::warn;

/// One projected metric value, tagged with the ticktime of the record it
/// came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedMetric {
    /// Metric identifier.
    pub id: u32,
    /// Source status code.
    pub status: i32,
    /// Integer value.
    pub value: i32,
    /// Decimal scale.
    pub scale: i32,
    /// Asynchronous capture instant, when the metric carried one.
    pub timestamp: Option<u32>,
    /// Ticktime of the record providing this value, epoch seconds.
    pub ticktime: u64,
}

/// Reconstructs the freshest value of each requested metric at or before
/// `time_ms`.
///
/// With an empty `metric_ids`, returns every metric of the single freshest
/// decodable record instead. Results are sorted by metric id.
pub async fn project(
    keeper: &mut IndexKeeper,
    live_travel_max: usize,
    archive_travel_max: usize,
    devid: u32,
    time_ms: u64,
    metric_ids: &[u32],
) -> Result<Vec<ProjectedMetric>> {
    let wanted: BTreeSet<u32> = metric_ids.iter().copied().collect();
    let max_block = clock::block_index(time_ms, keeper.block_hours());
    let cutoff_epoch = clock::epoch_secs(time_ms);

    let mut walk = Walk {
        wanted,
        cutoff_epoch,
        resolved: BTreeSet::new(),
        result: Vec::new(),
        done: false,
    };

    let live: Vec<i64> = keeper
        .live_blocks_desc(devid)
        .into_iter()
        .filter(|block| *block <= max_block)
        .take(live_travel_max)
        .collect();
    walk.run(keeper, devid, &live).await;

    if !walk.done {
        let archived: Vec<i64> = keeper
            .archived_blocks_desc(devid)
            .into_iter()
            .filter(|block| *block <= max_block)
            .take(archive_travel_max)
            .collect();
        walk.run(keeper, devid, &archived).await;
    }

    let mut result = walk.result;
    result.sort_by_key(|metric| metric.id);
    Ok(result)
}

struct Walk {
    wanted: BTreeSet<u32>,
    cutoff_epoch: u64,
    resolved: BTreeSet<u32>,
    result: Vec<ProjectedMetric>,
    done: bool,
}

impl Walk {
    /// Walks the given blocks newest-first until every wanted metric is
    /// resolved or the list is exhausted.
    async fn run(&mut self, keeper: &mut IndexKeeper, devid: u32, blocks: &[i64]) {
        for &block in blocks {
            if self.done {
                return;
            }

            let files = match loader::open_block(keeper, devid, block).await {
                Ok(files) => files,
                Err(err) => {
                    warn!(devid, block, error = %err, "failed to open block, ending walk");
                    return;
                }
            };

            for file in files.iter().rev() {
                if file.epoch_secs > self.cutoff_epoch {
                    continue;
                }

                let frame = match fs::read(&file.path).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(path = %file.path.display(), error = %err, "failed to read record, skipping");
                        continue;
                    }
                };
                let state = match record::decode_record(&frame) {
                    Ok(state) => state,
                    Err(err) => {
                        warn!(path = %file.path.display(), error = %err, "failed to decode record, skipping");
                        continue;
                    }
                };

                self.merge(&state, file.epoch_secs);
                if self.done {
                    return;
                }
            }
        }
    }

    fn merge(&mut self, state: &record::DevState, ticktime: u64) {
        if self.wanted.is_empty() {
            // No filter: the single freshest record answers the query.
            for metric in &state.metrics {
                self.result.push(projected(metric, ticktime));
            }
            self.done = true;
            return;
        }

        for metric in &state.metrics {
            if self.wanted.contains(&metric.id) && self.resolved.insert(metric.id) {
                self.result.push(projected(metric, ticktime));
            }
        }
        if self.resolved == self.wanted {
            self.done = true;
        }
    }
}

fn projected(metric: &record::Metric, ticktime: u64) -> ProjectedMetric {
    ProjectedMetric {
        id: metric.id,
        status: metric.status,
        value: metric.value,
        scale: metric.scale,
        timestamp: metric.timestamp,
        ticktime,
    }
}
