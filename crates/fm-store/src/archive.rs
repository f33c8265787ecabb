//! Block archival through the system `tar` tool.
//!
//! An archive is a compressed tarball of one device's block directory,
//! created and extracted with `-C <dataRoot>` so the member path inside the
//! tarball is the `<block>/<devid>/` subtree relative to the data root.
//!
//! Archival is at-least-once: the tarball is written before the live copy is
//! unindexed and removed. A failure after the tarball exists leaves the live
//! copy behind; a retry overwrites the tarball and finishes the removal.

use crate::error::{FmError, Result};
use crate::keeper::IndexKeeper;
use crate::layout::StoreLayout;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, error};

/// Archives one device block: tarball, unindex, remove live copy, mark.
///
/// # Errors
///
/// Returns `FmError::Archive` when the archive tool exits non-zero; the
/// block then stays live and indexed. Failures after the tarball is written
/// propagate without rolling the tarball back.
pub async fn archive_device_block(keeper: &mut IndexKeeper, devid: u32, block: i64) -> Result<()> {
    let layout = keeper.layout().clone();
    fs::create_dir_all(layout.archive_dir(devid)).await?;

    let archive = layout.archive_path(devid, block).to_string_lossy().into_owned();
    let root = layout.data_root().to_string_lossy().into_owned();
    let member = layout.archive_member(devid, block);
    run_tar(&layout, &["-czf", &archive, "-C", &root, &member]).await?;

    keeper.remove_device_block_index(devid, block).await?;
    fs::remove_dir_all(layout.device_block_dir(devid, block)).await?;
    // The parent block directory goes too once no other device uses it.
    let _ = fs::remove_dir(layout.block_dir(block)).await;

    keeper.mark_device_block_archived(devid, block).await?;
    debug!(devid, block, "archived device block");
    Ok(())
}

/// Extracts one device block's archive back under the data root.
///
/// # Errors
///
/// Returns `FmError::NotFound` when no archive exists for the block, and
/// `FmError::Archive` when the archive tool fails.
pub async fn extract_device_block(layout: &StoreLayout, devid: u32, block: i64) -> Result<()> {
    let archive = layout.archive_path(devid, block);
    if !fs::try_exists(&archive).await? {
        return Err(FmError::NotFound(format!(
            "archive for device {devid} block {block}"
        )));
    }

    let archive = archive.to_string_lossy().into_owned();
    let root = layout.data_root().to_string_lossy().into_owned();
    run_tar(layout, &["-xzf", &archive, "-C", &root]).await?;
    debug!(devid, block, "materialized archived block");
    Ok(())
}

async fn run_tar(layout: &StoreLayout, args: &[&str]) -> Result<()> {
    let output = Command::new("tar").args(args).output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(
            data_root = %layout.data_root().display(),
            stderr = %stderr,
            "archive tool failed"
        );
        return Err(FmError::Archive {
            status: output.status.code().unwrap_or(-1),
            stderr,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::index::IndexStore;
    use tempfile::TempDir;

    fn keeper(root: &std::path::Path) -> IndexKeeper {
        IndexKeeper::new(
            IndexStore::in_memory(),
            StoreLayout::new(root),
            2,
            SyncMode::None,
        )
    }

    async fn seed_block(keeper: &mut IndexKeeper, devid: u32, epoch: u64) {
        keeper
            .put_device_state(
                devid,
                epoch * 1000,
                &crate::record::DevState {
                    devid,
                    timestamp: epoch as u32,
                    metrics: vec![],
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_archive_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let mut keeper = keeper(temp_dir.path());
        seed_block(&mut keeper, 4, 1_700_000_000).await;
        let block = keeper.live_blocks(4)[0];

        archive_device_block(&mut keeper, 4, block).await.unwrap();

        let layout = keeper.layout().clone();
        assert!(layout.archive_path(4, block).exists());
        assert!(!layout.device_block_dir(4, block).exists());
        assert!(keeper.live_blocks(4).is_empty());
        assert_eq!(keeper.archived_blocks(4), vec![block]);

        extract_device_block(&layout, 4, block).await.unwrap();
        let files = layout.list_record_files(4, block).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].epoch_secs, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_archive_missing_block_fails_closed() {
        let temp_dir = TempDir::new().unwrap();
        let mut keeper = keeper(temp_dir.path());
        keeper.mark_device_block_archived(4, 1).await.unwrap();

        let result = archive_device_block(&mut keeper, 4, 2023111411).await;
        assert!(matches!(result, Err(FmError::Archive { .. })));
        // Nothing was unindexed by the failed attempt.
        assert!(!keeper.is_block_archived(4, 2023111411));
    }

    #[tokio::test]
    async fn test_extract_without_archive() {
        let temp_dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(temp_dir.path());
        let result = extract_device_block(&layout, 4, 2023111411).await;
        assert!(matches!(result, Err(FmError::NotFound(_))));
    }
}
