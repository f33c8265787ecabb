//! Integration tests for the backward projection walk.

use fm_store::{DevState, FleetStore, Metric, StoreConfig, SyncMode};
use tempfile::TempDir;

fn config(root: &std::path::Path) -> StoreConfig {
    StoreConfig::new(root).with_sync_mode(SyncMode::None)
}

fn metric(id: u32, value: i32) -> Metric {
    Metric {
        id,
        status: 0,
        value,
        scale: 0,
        timestamp: None,
    }
}

async fn put(store: &mut FleetStore, devid: u32, epoch: u64, metrics: Vec<Metric>) {
    store
        .put_device_state(
            devid,
            epoch * 1000,
            &DevState {
                devid,
                timestamp: epoch as u32,
                metrics,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_walks_backward_across_blocks() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FleetStore::open(config(temp_dir.path())).await.unwrap();

    let base = 1_672_531_200u64; // 2023-01-01T00:00:00Z
    put(&mut store, 7, base, vec![metric(1, 10), metric(2, 20)]).await;
    put(&mut store, 7, base + 7200, vec![metric(1, 11)]).await;
    put(&mut store, 7, base + 14_400, vec![metric(1, 12)]).await;
    assert_eq!(store.live_blocks(7).len(), 3);

    let projected = store
        .project_metrics(7, (base + 20_000) * 1000, &[1, 2])
        .await
        .unwrap();
    assert_eq!(projected.len(), 2);
    assert_eq!(projected[0].id, 1);
    assert_eq!(projected[0].value, 12);
    assert_eq!(projected[0].ticktime, base + 14_400);
    assert_eq!(projected[1].id, 2);
    assert_eq!(projected[1].value, 20);
    assert_eq!(projected[1].ticktime, base);
}

#[tokio::test]
async fn test_corrupt_file_skipped_others_served() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FleetStore::open(config(temp_dir.path())).await.unwrap();

    let base = 1_672_531_200u64;
    put(&mut store, 5, base, vec![metric(1, 10)]).await;
    put(&mut store, 5, base + 60, vec![metric(1, 11)]).await;

    // Flip a payload byte in the fresher record.
    let block = store.live_blocks(5)[0];
    let path = temp_dir
        .path()
        .join(format!("{block}/5/{}.dat", base + 60));
    let mut frame = std::fs::read(&path).unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    std::fs::write(&path, &frame).unwrap();

    let projected = store
        .project_metrics(5, (base + 120) * 1000, &[1])
        .await
        .unwrap();
    assert_eq!(projected.len(), 1);
    assert_eq!(projected[0].value, 10);
    assert_eq!(projected[0].ticktime, base);
}

#[tokio::test]
async fn test_travel_limits_bound_history() {
    let temp_dir = TempDir::new().unwrap();
    let mut cfg = config(temp_dir.path());
    cfg.live_travel_max = 2;
    cfg.archive_travel_max = 0;
    let mut store = FleetStore::open(cfg).await.unwrap();

    let base = 1_672_531_200u64;
    put(&mut store, 7, base, vec![metric(2, 20)]).await;
    put(&mut store, 7, base + 7200, vec![metric(1, 11)]).await;
    put(&mut store, 7, base + 14_400, vec![metric(1, 12)]).await;

    // Metric 2 lives three blocks back, beyond the travel limit.
    let projected = store
        .project_metrics(7, (base + 20_000) * 1000, &[1, 2])
        .await
        .unwrap();
    assert_eq!(projected.len(), 1);
    assert_eq!(projected[0].id, 1);
}

#[tokio::test]
async fn test_empty_filter_serves_freshest_record() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FleetStore::open(config(temp_dir.path())).await.unwrap();

    let base = 1_672_531_200u64;
    put(&mut store, 7, base, vec![metric(1, 10), metric(2, 20)]).await;
    put(&mut store, 7, base + 60, vec![metric(1, 11)]).await;

    let projected = store
        .project_metrics(7, (base + 120) * 1000, &[])
        .await
        .unwrap();
    assert_eq!(projected.len(), 1);
    assert_eq!(projected[0].id, 1);
    assert_eq!(projected[0].value, 11);
}

#[tokio::test]
async fn test_future_records_invisible() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FleetStore::open(config(temp_dir.path())).await.unwrap();

    let base = 1_672_531_200u64;
    put(&mut store, 7, base + 600, vec![metric(1, 99)]).await;

    let projected = store
        .project_metrics(7, (base + 60) * 1000, &[1])
        .await
        .unwrap();
    assert!(projected.is_empty());
}
