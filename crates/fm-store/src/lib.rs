//! FleetMetrics Store - time-series state storage for device fleets.
//!
//! Devices periodically publish a [`DevState`]: a capture timestamp plus a
//! set of metrics. This crate persists those states on local disk, indexes
//! them by device and by logical time, and manages retention through
//! archival and pruning.
//!
//! # Components
//!
//! - [`FleetStore`]: the facade owning one data root
//! - [`record`]: checksummed record codec
//! - [`index`]: embedded ordered-set / hash index with a durability log
//! - [`projection`]: backward walk reconstructing latest metric values
//! - [`housekeeping`]: future-block pruning and aged-block archival
//!
//! # Example
//!
//! ```rust,ignore
//! use fm_store::{DevState, FleetStore, Metric, StoreConfig};
//!
//! let config = StoreConfig::from_env("/var/lib/fm")?;
//! let mut store = FleetStore::open(config).await?;
//!
//! // Persist one state at a caller-chosen ticktime.
//! store.put_device_state(7, ticktime_ms, &state).await?;
//!
//! // Latest values of metrics 1 and 2 as of a reference instant.
//! let values = store.project_metrics(7, reference_ms, &[1, 2]).await?;
//!
//! // Keep the two newest blocks live, archive the rest.
//! store.housekeeping(&HousekeepingOptions { level1_blocks: 2 }).await?;
//! ```

#![deny(missing_docs)]

pub mod archive;
pub mod clock;
pub mod config;
pub mod error;
pub mod housekeeping;
pub mod index;
pub mod keeper;
pub mod layout;
pub mod loader;
pub mod projection;
pub mod record;
pub mod store;
pub mod writer;

pub use config::{StoreConfig, SyncMode};
pub use error::{FmError, Result};
pub use housekeeping::{HousekeepingOptions, HousekeepingReport};
pub use keeper::{LastGoodValue, LgvMetric};
pub use projection::ProjectedMetric;
pub use record::{DevState, Metric};
pub use store::FleetStore;
