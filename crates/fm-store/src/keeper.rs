//! Index keeper: the bookkeeping layer between record files and the index.
//!
//! Owns the keyspace (`fm:devices`, `fm:blk:<devid>`, `fm:_blk:<devid>`,
//! `fm:lgv:<devid>`) and enforces the write-path ordering: record file first,
//! then last-good-value, then the live-block set, then the device set. A
//! crash between the rename and the index updates leaves an orphan record
//! that a later write of the same ticktime re-indexes.

use crate::clock;
use crate::config::SyncMode;
use crate::error::Result;
use crate::index::IndexStore;
use crate::layout::StoreLayout;
use crate::record::DevState;
use crate::writer;
use std::collections::BTreeMap;
use tracing::warn;

/// Ordered set of all known device ids.
pub const KEY_DEVICES: &str = "fm:devices";

/// Key of the live-block set for a device.
pub fn key_live_blocks(devid: u32) -> String {
    format!("fm:blk:{devid}")
}

/// Key of the archived-block set for a device.
pub fn key_archived_blocks(devid: u32) -> String {
    format!("fm:_blk:{devid}")
}

/// Key of the last-good-value hash for a device.
pub fn key_lgv(devid: u32) -> String {
    format!("fm:lgv:{devid}")
}

/// Hash field carrying the device-wide maximum ticktime.
const LGV_GLOBAL_TICKTIME: &str = "ticktime";

/// The freshest stored observation of one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LgvMetric {
    /// Metric identifier.
    pub id: u32,
    /// Ticktime of the observation, epoch seconds.
    pub ticktime: u64,
    /// Source status code.
    pub status: i32,
    /// Integer value.
    pub value: i32,
    /// Decimal scale.
    pub scale: i32,
    /// Asynchronous capture instant, when the metric carried one.
    pub timestamp: Option<u32>,
}

/// Parsed last-good-value state for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastGoodValue {
    /// Maximum ticktime ever observed for the device, epoch seconds.
    pub last_ticktime: u64,
    /// Freshest observation per metric id, sorted by id.
    pub metrics: Vec<LgvMetric>,
}

/// Keeps the device, block, and last-good-value indexes coherent with the
/// record files on disk.
#[derive(Debug)]
pub struct IndexKeeper {
    index: IndexStore,
    layout: StoreLayout,
    block_hours: u8,
    sync_mode: SyncMode,
}

impl IndexKeeper {
    /// Creates a keeper over an opened index store.
    pub fn new(
        index: IndexStore,
        layout: StoreLayout,
        block_hours: u8,
        sync_mode: SyncMode,
    ) -> Self {
        Self {
            index,
            layout,
            block_hours,
            sync_mode,
        }
    }

    /// Returns the filesystem layout.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Returns the configured block width.
    pub fn block_hours(&self) -> u8 {
        self.block_hours
    }

    /// Persists a device state at the given ticktime and indexes it.
    ///
    /// Returns `true` when the record file was newly created. Any failing
    /// step short-circuits; steps already performed are not rolled back.
    pub async fn put_device_state(
        &mut self,
        devid: u32,
        ticktime_ms: u64,
        state: &DevState,
    ) -> Result<bool> {
        let block = clock::block_index(ticktime_ms, self.block_hours);
        let new_file = writer::write_record(
            &self.layout,
            devid,
            block,
            ticktime_ms,
            state,
            self.sync_mode,
        )
        .await?;

        self.update_lgv(devid, state, ticktime_ms).await?;
        self.index.set_add(&key_live_blocks(devid), block).await?;
        if new_file {
            self.index.set_add(KEY_DEVICES, devid as i64).await?;
        }
        Ok(new_file)
    }

    /// Folds a record into the device's last-good-value hash.
    ///
    /// A metric overwrites its stored tuple only when the new ticktime is
    /// strictly greater, so the first write wins at a tie. The device-wide
    /// `ticktime` field advances whenever any metric changed and the incoming
    /// ticktime is at least the stored one. Replaying the same record is a
    /// no-op. Returns whether any metric changed.
    pub async fn update_lgv(
        &mut self,
        devid: u32,
        state: &DevState,
        ticktime_ms: u64,
    ) -> Result<bool> {
        let key = key_lgv(devid);
        let epoch = clock::epoch_secs(ticktime_ms);
        let mut modified = false;

        for metric in &state.metrics {
            let gate_field = format!("{}_ticktime", metric.id);
            let stored: Option<u64> = self
                .index
                .hash_get(&key, &gate_field)
                .and_then(|raw| raw.parse().ok());
            if !stored.map_or(true, |cur| epoch > cur) {
                continue;
            }

            let mut pairs = vec![
                (gate_field, epoch.to_string()),
                (format!("{}_status", metric.id), metric.status.to_string()),
                (format!("{}_value", metric.id), metric.value.to_string()),
                (format!("{}_scale", metric.id), metric.scale.to_string()),
            ];
            if let Some(timestamp) = metric.timestamp {
                pairs.push((format!("{}_timestamp", metric.id), timestamp.to_string()));
            }
            self.index.hash_set_many(&key, &pairs).await?;
            modified = true;
        }

        if modified {
            let global: Option<u64> = self
                .index
                .hash_get(&key, LGV_GLOBAL_TICKTIME)
                .and_then(|raw| raw.parse().ok());
            if global.map_or(true, |cur| epoch >= cur) {
                self.index
                    .hash_set(&key, LGV_GLOBAL_TICKTIME, epoch.to_string())
                    .await?;
            }
        }
        Ok(modified)
    }

    /// Records a block as archived for a device.
    pub async fn mark_device_block_archived(&mut self, devid: u32, block: i64) -> Result<()> {
        self.index
            .set_add(&key_archived_blocks(devid), block)
            .await?;
        Ok(())
    }

    /// Removes a block from a device's live-block set.
    pub async fn remove_device_block_index(&mut self, devid: u32, block: i64) -> Result<()> {
        self.index.set_remove(&key_live_blocks(devid), block).await?;
        Ok(())
    }

    /// Returns all known device ids, ascending.
    pub fn devices(&self) -> Vec<u32> {
        self.index
            .set_members(KEY_DEVICES)
            .into_iter()
            .filter_map(|id| u32::try_from(id).ok())
            .collect()
    }

    /// Returns a device's live blocks, ascending.
    pub fn live_blocks(&self, devid: u32) -> Vec<i64> {
        self.index.set_members(&key_live_blocks(devid))
    }

    /// Returns a device's live blocks, descending.
    pub fn live_blocks_desc(&self, devid: u32) -> Vec<i64> {
        self.index.set_members_desc(&key_live_blocks(devid))
    }

    /// Returns a device's archived blocks, ascending.
    pub fn archived_blocks(&self, devid: u32) -> Vec<i64> {
        self.index.set_members(&key_archived_blocks(devid))
    }

    /// Returns a device's archived blocks, descending.
    pub fn archived_blocks_desc(&self, devid: u32) -> Vec<i64> {
        self.index.set_members_desc(&key_archived_blocks(devid))
    }

    /// Returns the number of live blocks a device has.
    pub fn live_block_count(&self, devid: u32) -> usize {
        self.index.set_len(&key_live_blocks(devid))
    }

    /// Returns live blocks strictly after the given block, ascending.
    pub fn future_live_blocks(&self, devid: u32, block: i64) -> Vec<i64> {
        self.index.set_range_above(&key_live_blocks(devid), block)
    }

    /// Returns the `n` oldest live blocks, ascending.
    pub fn oldest_live_blocks(&self, devid: u32, n: usize) -> Vec<i64> {
        self.index.set_lowest(&key_live_blocks(devid), n)
    }

    /// Returns whether a block is recorded as archived for a device.
    pub fn is_block_archived(&self, devid: u32, block: i64) -> bool {
        self.index.set_contains(&key_archived_blocks(devid), block)
    }

    /// Parses the device's last-good-value hash.
    ///
    /// Fields that fail to parse are skipped with a warning rather than
    /// failing the read.
    pub fn last_good_value(&self, devid: u32) -> Option<LastGoodValue> {
        let hash = self.index.hash_all(&key_lgv(devid))?;
        let last_ticktime = hash.get(LGV_GLOBAL_TICKTIME)?.parse().ok()?;

        #[derive(Default)]
        struct Partial {
            ticktime: Option<u64>,
            status: Option<i32>,
            value: Option<i32>,
            scale: Option<i32>,
            timestamp: Option<u32>,
        }

        let mut partials: BTreeMap<u32, Partial> = BTreeMap::new();
        for (field, raw) in hash {
            if field.as_str() == LGV_GLOBAL_TICKTIME {
                continue;
            }
            let Some((id_str, suffix)) = field.split_once('_') else {
                warn!(devid, field = %field, "unrecognized last-good-value field");
                continue;
            };
            let Ok(id) = id_str.parse::<u32>() else {
                warn!(devid, field = %field, "unrecognized last-good-value field");
                continue;
            };
            let slot = partials.entry(id).or_default();
            match suffix {
                "ticktime" => slot.ticktime = raw.parse().ok(),
                "status" => slot.status = raw.parse().ok(),
                "value" => slot.value = raw.parse().ok(),
                "scale" => slot.scale = raw.parse().ok(),
                "timestamp" => slot.timestamp = raw.parse().ok(),
                _ => warn!(devid, field = %field, "unrecognized last-good-value field"),
            }
        }

        let mut metrics = Vec::with_capacity(partials.len());
        for (id, partial) in partials {
            match (partial.ticktime, partial.status, partial.value, partial.scale) {
                (Some(ticktime), Some(status), Some(value), Some(scale)) => {
                    metrics.push(LgvMetric {
                        id,
                        ticktime,
                        status,
                        value,
                        scale,
                        timestamp: partial.timestamp,
                    });
                }
                _ => warn!(devid, id, "incomplete last-good-value tuple, skipping"),
            }
        }

        Some(LastGoodValue {
            last_ticktime,
            metrics,
        })
    }

    /// Returns the known time span of a device in epoch milliseconds.
    ///
    /// The minimum is the start of the oldest indexed block, archived or
    /// live. The maximum is the last-good-value ticktime, falling back to
    /// the end of the newest indexed block.
    pub fn device_time_span(&self, devid: u32) -> Option<(u64, u64)> {
        let live_key = key_live_blocks(devid);
        let archived_key = key_archived_blocks(devid);

        let oldest = match (
            self.index.set_first(&archived_key),
            self.index.set_first(&live_key),
        ) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        let min = clock::block_start_ms(oldest, self.block_hours)?;

        let lgv_ticktime = self
            .index
            .hash_get(&key_lgv(devid), LGV_GLOBAL_TICKTIME)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let max = match lgv_ticktime {
            Some(ms) => ms,
            None => {
                let newest = self
                    .index
                    .set_last(&live_key)
                    .into_iter()
                    .chain(self.index.set_last(&archived_key))
                    .max()?;
                clock::block_end_ms(newest, self.block_hours)?
            }
        };

        Some((min, max))
    }

    /// Returns the byte length of the index log.
    pub fn index_log_len(&self) -> u64 {
        self.index.log_len()
    }

    /// Compacts the index log from live state.
    pub async fn compact_index(&mut self) -> Result<()> {
        self.index.compact().await
    }
}
