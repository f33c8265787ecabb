//! Block loader: opens a device block, materializing archives on demand.

use crate::archive;
use crate::error::Result;
use crate::keeper::IndexKeeper;
use crate::layout::RecordFile;
use tokio::fs;

/// Returns the record files of a device block, ascending by epoch.
///
/// A block listed in the archived set with no live directory is extracted
/// first. The materialized copy is not re-packed after the read; it stays on
/// disk until a later archival run sweeps it.
pub async fn open_block(keeper: &mut IndexKeeper, devid: u32, block: i64) -> Result<Vec<RecordFile>> {
    if keeper.is_block_archived(devid, block) {
        let live_dir = keeper.layout().device_block_dir(devid, block);
        if !fs::try_exists(&live_dir).await? {
            archive::extract_device_block(keeper.layout(), devid, block).await?;
        }
    }
    keeper.layout().list_record_files(devid, block).await
}
