//! The store facade: owns the index and exposes the public operations.

use crate::config::StoreConfig;
use crate::error::{FmError, Result};
use crate::housekeeping::{self, HousekeepingOptions, HousekeepingReport};
use crate::index::IndexStore;
use crate::keeper::{IndexKeeper, LastGoodValue};
use crate::layout::StoreLayout;
use crate::projection::{self, ProjectedMetric};
use crate::record::DevState;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

/// A device-fleet state store rooted at one data directory.
///
/// All operations take `&mut self`: the store is single-writer and relies on
/// the embedding process to serialize calls, matching the cooperative model
/// it is designed for. Operations suspend at file, index, and subprocess
/// boundaries and run to completion once started.
#[derive(Debug)]
pub struct FleetStore {
    config: StoreConfig,
    keeper: IndexKeeper,
}

impl FleetStore {
    /// Opens a store, creating the data root and replaying the index log.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_root).await?;
        let layout = StoreLayout::new(&config.data_root);
        let index = IndexStore::open(&layout.index_dir(), config.sync_mode).await?;
        let keeper = IndexKeeper::new(index, layout, config.block_hours, config.sync_mode);
        Ok(Self { config, keeper })
    }

    /// Returns the configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Persists a device state at the given ticktime.
    ///
    /// Returns `true` when a new record file was created, `false` on an
    /// overwrite of the same ticktime.
    pub async fn put_device_state(
        &mut self,
        devid: u32,
        ticktime_ms: u64,
        state: &DevState,
    ) -> Result<bool> {
        self.keeper.put_device_state(devid, ticktime_ms, state).await
    }

    /// Reconstructs the freshest value of each requested metric as of
    /// `time_ms`. An empty `metric_ids` returns all metrics of the single
    /// freshest record.
    pub async fn project_metrics(
        &mut self,
        devid: u32,
        time_ms: u64,
        metric_ids: &[u32],
    ) -> Result<Vec<ProjectedMetric>> {
        projection::project(
            &mut self.keeper,
            self.config.live_travel_max,
            self.config.archive_travel_max,
            devid,
            time_ms,
            metric_ids,
        )
        .await
    }

    /// Returns the known time span of a device in epoch milliseconds, or
    /// `None` for unknown devices.
    pub fn get_device_time_span(&self, devid: u32) -> Option<(u64, u64)> {
        self.keeper.device_time_span(devid)
    }

    /// Returns the parsed last-good-value state of a device.
    pub fn get_device_last_good_value(&self, devid: u32) -> Option<LastGoodValue> {
        self.keeper.last_good_value(devid)
    }

    /// Returns all known device ids, ascending.
    pub fn devices(&self) -> Vec<u32> {
        self.keeper.devices()
    }

    /// Returns a device's live blocks, ascending.
    pub fn live_blocks(&self, devid: u32) -> Vec<i64> {
        self.keeper.live_blocks(devid)
    }

    /// Returns a device's archived blocks, ascending.
    pub fn archived_blocks(&self, devid: u32) -> Vec<i64> {
        self.keeper.archived_blocks(devid)
    }

    /// Runs housekeeping against the current wall clock.
    pub async fn housekeeping(&mut self, opts: &HousekeepingOptions) -> Result<HousekeepingReport> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| FmError::Config(format!("system clock before epoch: {err}")))?
            .as_millis() as u64;
        self.housekeeping_at(opts, now_ms).await
    }

    /// Runs housekeeping against an explicit wall-clock instant.
    ///
    /// Deterministic entry point for embedders that manage their own clock.
    pub async fn housekeeping_at(
        &mut self,
        opts: &HousekeepingOptions,
        now_ms: u64,
    ) -> Result<HousekeepingReport> {
        housekeeping::run(
            &mut self.keeper,
            opts,
            now_ms,
            self.config.index_compact_threshold,
        )
        .await
    }
}
