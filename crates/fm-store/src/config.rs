//! Store configuration and environment parsing.

use crate::error::{FmError, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable selecting the hour width of a block.
pub const ENV_HOURS_PER_BLOCK: &str = "FM_HOURS_PER_BLOCK";

/// Environment variable requesting console logging from the embedder.
pub const ENV_LOG_CONSOLE: &str = "FM_LOG_CONSOLE";

/// Default hour width of a block.
pub const DEFAULT_BLOCK_HOURS: u8 = 2;

/// Default number of archived blocks the projection may open.
pub const DEFAULT_ARCHIVE_TRAVEL_MAX: usize = 2;

/// Index log size above which housekeeping compacts it (4 MB).
pub const DEFAULT_INDEX_COMPACT_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Sync mode for index log durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync after each append (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

/// Configuration for a [`crate::FleetStore`].
///
/// `block_hours` is fixed for the lifetime of a store: block indexes computed
/// with one width do not line up with directories created under another.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for live blocks, archives, and the index log.
    pub data_root: PathBuf,
    /// Hour width of a block, in `1..=24`.
    pub block_hours: u8,
    /// Maximum number of live blocks the projection walks.
    pub live_travel_max: usize,
    /// Maximum number of archived blocks the projection walks.
    pub archive_travel_max: usize,
    /// Sync mode for the index log.
    pub sync_mode: SyncMode,
    /// Index log size that triggers compaction during housekeeping.
    pub index_compact_threshold: u64,
    /// Whether the embedder was asked to also log to stderr.
    pub log_console: bool,
}

impl StoreConfig {
    /// Creates a configuration with defaults for the given data root.
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
            block_hours: DEFAULT_BLOCK_HOURS,
            live_travel_max: default_live_travel_max(DEFAULT_BLOCK_HOURS),
            archive_travel_max: DEFAULT_ARCHIVE_TRAVEL_MAX,
            sync_mode: SyncMode::default(),
            index_compact_threshold: DEFAULT_INDEX_COMPACT_THRESHOLD,
            log_console: false,
        }
    }

    /// Creates a configuration for the given data root, reading overrides
    /// from the environment.
    ///
    /// # Errors
    ///
    /// Returns `FmError::Config` when `FM_HOURS_PER_BLOCK` is set to a value
    /// outside `1..=24` or fails to parse.
    pub fn from_env(data_root: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::new(data_root);

        if let Ok(raw) = env::var(ENV_HOURS_PER_BLOCK) {
            let hours: u8 = raw.parse().map_err(|_| {
                FmError::Config(format!("{ENV_HOURS_PER_BLOCK} is not an integer: '{raw}'"))
            })?;
            config = config.with_block_hours(hours)?;
        }

        if let Ok(raw) = env::var(ENV_LOG_CONSOLE) {
            config.log_console = is_truthy(&raw);
        }

        Ok(config)
    }

    /// Sets the block width, recomputing the live travel limit for it.
    ///
    /// Call before any custom [`StoreConfig::live_travel_max`] assignment.
    ///
    /// # Errors
    ///
    /// Returns `FmError::Config` when `hours` is outside `1..=24`.
    pub fn with_block_hours(mut self, hours: u8) -> Result<Self> {
        if !(1..=24).contains(&hours) {
            return Err(FmError::Config(format!(
                "hours per block must be in 1..=24, got {hours}"
            )));
        }
        self.block_hours = hours;
        self.live_travel_max = default_live_travel_max(hours);
        Ok(self)
    }

    /// Sets the index log sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

/// Default live travel limit: two days of blocks.
pub fn default_live_travel_max(block_hours: u8) -> usize {
    (48 / block_hours.max(1)) as usize
}

fn is_truthy(raw: &str) -> bool {
    !matches!(raw.trim(), "" | "0" | "false" | "no" | "off")
}
