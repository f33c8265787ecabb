//! Atomic single-record writes.
//!
//! A record is staged to `<record>.dat.tmp` in the destination directory and
//! committed with a same-directory rename. The rename is the commit point:
//! a crash before it leaves at most a stale temp file, a crash after it
//! leaves a fully written record. Overwrites of the same ticktime go through
//! the same path and are equally atomic.

use crate::config::SyncMode;
use crate::error::Result;
use crate::layout::StoreLayout;
use crate::record::{self, DevState};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Writes one record, returning `true` when the file did not exist before.
pub async fn write_record(
    layout: &StoreLayout,
    devid: u32,
    block: i64,
    ticktime_ms: u64,
    state: &DevState,
    sync_mode: SyncMode,
) -> Result<bool> {
    let frame = record::encode_record(state);

    let path = layout.record_path(devid, block, ticktime_ms);
    let tmp = layout.tmp_path(&path);
    let new_file = !fs::try_exists(&path).await?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&frame).await?;
    match sync_mode {
        SyncMode::Fsync => file.sync_all().await?,
        SyncMode::Fdatasync => file.sync_data().await?,
        SyncMode::None => {}
    }
    drop(file);

    fs::rename(&tmp, &path).await?;
    Ok(new_file)
}
