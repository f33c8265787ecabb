//! Integration tests for pruning, archival, and archive-transparent reads.

use fm_store::{DevState, FleetStore, HousekeepingOptions, Metric, StoreConfig, SyncMode};
use tempfile::TempDir;

fn config(root: &std::path::Path) -> StoreConfig {
    StoreConfig::new(root).with_sync_mode(SyncMode::None)
}

fn state(devid: u32, timestamp: u32, value: i32) -> DevState {
    DevState {
        devid,
        timestamp,
        metrics: vec![Metric {
            id: 1,
            status: 0,
            value,
            scale: 0,
            timestamp: None,
        }],
    }
}

/// 2024-01-01T00:00:00Z in milliseconds.
const NOW_2024: u64 = 1_704_067_200_000;

#[tokio::test]
async fn test_future_blocks_are_pruned() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FleetStore::open(config(temp_dir.path())).await.unwrap();

    // 2023-01-01T00:00:00Z and 2099-01-01T00:00:00Z.
    store
        .put_device_state(9, 1_672_531_200_000, &state(9, 1_672_531_200, 1))
        .await
        .unwrap();
    store
        .put_device_state(9, 4_070_908_800_000, &state(9, 4_070_908_800 as u32, 2))
        .await
        .unwrap();
    assert_eq!(store.live_blocks(9), vec![2023010100, 2099010100]);

    let report = store
        .housekeeping_at(&HousekeepingOptions::default(), NOW_2024)
        .await
        .unwrap();

    assert_eq!(report.pruned_blocks, 1);
    assert_eq!(store.live_blocks(9), vec![2023010100]);
    assert!(!temp_dir.path().join("2099010100").exists());
    assert!(temp_dir.path().join("2023010100/9").exists());
}

#[tokio::test]
async fn test_archive_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FleetStore::open(config(temp_dir.path())).await.unwrap();

    // Six consecutive 2h blocks for device 4, values 0..=5.
    let base = 1_672_531_200u64; // 2023-01-01T00:00:00Z
    for i in 0..6u64 {
        let epoch = base + i * 7200;
        store
            .put_device_state(4, epoch * 1000, &state(4, epoch as u32, i as i32))
            .await
            .unwrap();
    }
    let all_blocks = store.live_blocks(4);
    assert_eq!(all_blocks.len(), 6);

    let report = store
        .housekeeping_at(&HousekeepingOptions { level1_blocks: 2 }, NOW_2024)
        .await
        .unwrap();
    assert_eq!(report.archived_blocks, 4);

    // The four oldest are archived, the two newest stay live.
    assert_eq!(store.live_blocks(4), all_blocks[4..].to_vec());
    assert_eq!(store.archived_blocks(4), all_blocks[..4].to_vec());
    for block in &all_blocks[..4] {
        let tgz = temp_dir.path().join(format!("archive/4/4-{block}.tgz"));
        assert!(tgz.exists(), "missing archive {tgz:?}");
        assert!(!temp_dir.path().join(format!("{block}/4")).exists());
    }

    // A projection referenced inside an archived block extracts it and
    // serves the value written there.
    let reference_ms = (base + 7200 + 60) * 1000; // inside the second block
    let projected = store.project_metrics(4, reference_ms, &[1]).await.unwrap();
    assert_eq!(projected.len(), 1);
    assert_eq!(projected[0].value, 1);
    assert_eq!(projected[0].ticktime, base + 7200);
}

#[tokio::test]
async fn test_rearchive_after_materialization() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FleetStore::open(config(temp_dir.path())).await.unwrap();

    let base = 1_672_531_200u64;
    for i in 0..3u64 {
        let epoch = base + i * 7200;
        store
            .put_device_state(4, epoch * 1000, &state(4, epoch as u32, i as i32))
            .await
            .unwrap();
    }
    store
        .housekeeping_at(&HousekeepingOptions { level1_blocks: 1 }, NOW_2024)
        .await
        .unwrap();
    let archived = store.archived_blocks(4);
    assert_eq!(archived.len(), 2);

    // Reading materializes the oldest archived block back onto disk.
    store
        .project_metrics(4, (base + 60) * 1000, &[1])
        .await
        .unwrap();
    assert!(temp_dir.path().join(format!("{}/4", archived[0])).exists());

    // The next archival run re-packs the materialized copy and removes it,
    // without touching the live index.
    let report = store
        .housekeeping_at(&HousekeepingOptions { level1_blocks: 1 }, NOW_2024)
        .await
        .unwrap();
    assert_eq!(report.archived_blocks, 0);
    assert_eq!(report.swept_blocks, 1);
    assert!(!temp_dir.path().join(format!("{}/4", archived[0])).exists());
    assert_eq!(store.archived_blocks(4), archived);

    // The data is still readable from the refreshed archive.
    let projected = store
        .project_metrics(4, (base + 60) * 1000, &[1])
        .await
        .unwrap();
    assert_eq!(projected[0].value, 0);
}

#[tokio::test]
async fn test_housekeeping_compacts_large_index_log() {
    let temp_dir = TempDir::new().unwrap();
    let mut cfg = config(temp_dir.path());
    cfg.index_compact_threshold = 64;
    let mut store = FleetStore::open(cfg).await.unwrap();

    store
        .put_device_state(9, 1_672_531_200_000, &state(9, 1_672_531_200, 1))
        .await
        .unwrap();

    let report = store
        .housekeeping_at(&HousekeepingOptions::default(), NOW_2024)
        .await
        .unwrap();
    assert!(report.compacted_index);

    // State is intact after compaction and a reopen.
    drop(store);
    let store = FleetStore::open(config(temp_dir.path())).await.unwrap();
    assert_eq!(store.devices(), vec![9]);
    assert_eq!(store.live_blocks(9), vec![2023010100]);
}
