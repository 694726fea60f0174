use async_trait::async_trait;
use lidar_prospect::config::PathsConfig;
use lidar_prospect::io::artifact::ArtifactStore;
use lidar_prospect::io::download::{DownloadParams, TileDownloader, TileOutcome, TileTransport};
use lidar_prospect::io::tile_index::{StaticTileIndex, TileIndexEntry, TileIndexSource};
use lidar_prospect::types::{BoundingBox, LidarError, LidarResult, StageStatus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// In-memory transport with per-URL fault injection and concurrency tracking
#[derive(Default)]
struct MockTransport {
    fail: HashSet<String>,
    fail_midstream: HashSet<String>,
    empty: HashSet<String>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl TileTransport for MockTransport {
    async fn fetch(&self, url: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> LidarResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.fail.contains(url) {
            Err(LidarError::TileDownload {
                tile_id: url.to_string(),
                reason: "HTTP 503 Service Unavailable".to_string(),
            })
        } else if self.empty.contains(url) {
            Ok(0)
        } else {
            let body = format!("LASF point data for {}", url);
            sink.write_all(body.as_bytes()).await?;
            if self.fail_midstream.contains(url) {
                Err(LidarError::TileDownload {
                    tile_id: url.to_string(),
                    reason: "connection reset".to_string(),
                })
            } else {
                Ok(body.len() as u64)
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn aoi() -> BoundingBox {
    BoundingBox::from_wsen(-4.2, 36.7, -4.0, 36.9)
}

fn url(id: &str) -> String {
    format!("https://tiles.example/{}.laz", id)
}

/// `n` tiles inside the AOI, ids `t0`..`t{n-1}`
fn index_of(n: usize) -> Arc<dyn TileIndexSource> {
    let entries = (0..n)
        .map(|i| {
            let id = format!("t{}", i);
            TileIndexEntry {
                url: url(&id),
                tile_id: id,
                footprint: BoundingBox::from_wsen(-4.15, 36.75, -4.05, 36.85),
            }
        })
        .collect();
    Arc::new(StaticTileIndex::new(entries))
}

fn setup() -> (TempDir, ArtifactStore) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = ArtifactStore::new(PathsConfig::default().rooted_at(dir.path()));
    (dir, store)
}

fn files_in(store: &ArtifactStore) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(store.tiles_dir())
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn test_failed_tile_does_not_affect_others() {
    let (_dir, store) = setup();
    let transport = Arc::new(MockTransport {
        fail: [url("t2")].into_iter().collect(),
        ..Default::default()
    });
    let downloader = TileDownloader::with_transport(store.clone(), transport, DownloadParams::default());

    let report = downloader.run(index_of(5), &aoi(), 10).await.expect("Download run failed");

    assert_eq!(report.attempted(), 5);
    assert_eq!(report.succeeded(), 4);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.status(), StageStatus::Partial);
    assert!(matches!(report.results[2].outcome, TileOutcome::Failed { .. }));
    assert_eq!(files_in(&store), vec!["t0.laz", "t1.laz", "t3.laz", "t4.laz"]);
}

#[tokio::test]
async fn test_interrupted_and_empty_transfers_leave_no_file() {
    let (_dir, store) = setup();
    let transport = Arc::new(MockTransport {
        fail_midstream: [url("t0")].into_iter().collect(),
        empty: [url("t1")].into_iter().collect(),
        ..Default::default()
    });
    let downloader = TileDownloader::with_transport(store.clone(), transport, DownloadParams::default());

    let report = downloader.run(index_of(3), &aoi(), 10).await.expect("Download run failed");

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 2);
    // Neither the final name nor a staging file survives a failed transfer.
    assert_eq!(files_in(&store), vec!["t2.laz"]);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let (_dir, store) = setup();
    let transport = Arc::new(MockTransport {
        delay: Duration::from_millis(40),
        ..Default::default()
    });
    let downloader =
        TileDownloader::with_transport(store.clone(), transport.clone(), DownloadParams::default());

    let report = downloader.run(index_of(15), &aoi(), 15).await.expect("Download run failed");

    let peak = transport.max_in_flight.load(Ordering::SeqCst);
    println!("Peak concurrent transfers: {}", peak);
    assert_eq!(report.succeeded(), 15);
    assert!(peak <= 6, "{} transfers in flight", peak);
    assert!(peak > 1, "transfers did not overlap");
}

#[tokio::test]
async fn test_max_downloads_caps_selection() {
    let (_dir, store) = setup();
    let transport = Arc::new(MockTransport::default());
    let downloader =
        TileDownloader::with_transport(store.clone(), transport.clone(), DownloadParams::default());

    let report = downloader.run(index_of(8), &aoi(), 3).await.expect("Download run failed");

    assert_eq!(report.matched, 8);
    assert_eq!(report.selected(), 3);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    assert_eq!(files_in(&store), vec!["t0.laz", "t1.laz", "t2.laz"]);
}

#[tokio::test]
async fn test_present_tiles_are_not_refetched() {
    let (_dir, store) = setup();
    std::fs::create_dir_all(store.tiles_dir()).expect("Failed to create tiles dir");
    std::fs::write(store.tile_path("t1"), b"earlier run").expect("Failed to seed tile");

    let transport = Arc::new(MockTransport::default());
    let downloader =
        TileDownloader::with_transport(store.clone(), transport.clone(), DownloadParams::default());
    let report = downloader.run(index_of(3), &aoi(), 10).await.expect("Download run failed");

    assert_eq!(report.already_present(), 1);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(store.tile_path("t1")).unwrap(), b"earlier run");
    assert_eq!(report.status(), StageStatus::Success);
}

#[tokio::test]
async fn test_stage_timeout_stops_dispatch() {
    let (_dir, store) = setup();
    let transport = Arc::new(MockTransport {
        delay: Duration::from_millis(300),
        ..Default::default()
    });
    let params = DownloadParams {
        max_concurrent: 1,
        stage_timeout: Duration::from_millis(100),
        ..DownloadParams::default()
    };
    let downloader = TileDownloader::with_transport(store.clone(), transport.clone(), params);

    let report = downloader.run(index_of(4), &aoi(), 10).await.expect("Download run failed");

    // The first transfer holds the only slot past the deadline and still finishes.
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.not_dispatched(), 3);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(files_in(&store), vec!["t0.laz"]);
    assert_eq!(report.status(), StageStatus::Partial);
}

#[tokio::test]
async fn test_invalid_aoi_rejected_before_index() {
    let (_dir, store) = setup();
    let downloader = TileDownloader::with_transport(
        store,
        Arc::new(MockTransport::default()),
        DownloadParams::default(),
    );
    let inverted = BoundingBox::from_wsen(-4.0, 36.7, -4.2, 36.9);
    let result = downloader.run(index_of(1), &inverted, 10).await;
    assert!(matches!(result, Err(LidarError::InvalidAoi(_))));
}

#[tokio::test]
async fn test_no_intersecting_tiles_is_failed_status() {
    let (_dir, store) = setup();
    let downloader = TileDownloader::with_transport(
        store,
        Arc::new(MockTransport::default()),
        DownloadParams::default(),
    );
    let elsewhere = BoundingBox::from_wsen(2.0, 41.0, 2.1, 41.1);
    let report = downloader.run(index_of(3), &elsewhere, 10).await.expect("Download run failed");
    assert_eq!(report.matched, 0);
    assert_eq!(report.status(), StageStatus::Failed);
}

/// Index whose load alone outlasts a short stage budget
struct SlowIndex {
    inner: Arc<dyn TileIndexSource>,
    delay: Duration,
}

impl TileIndexSource for SlowIndex {
    fn load(&self) -> LidarResult<Vec<TileIndexEntry>> {
        std::thread::sleep(self.delay);
        self.inner.load()
    }
}

#[tokio::test]
async fn test_slow_index_spends_stage_budget() {
    let (_dir, store) = setup();
    let transport = Arc::new(MockTransport::default());
    let params = DownloadParams {
        stage_timeout: Duration::from_millis(100),
        ..DownloadParams::default()
    };
    let downloader = TileDownloader::with_transport(store.clone(), transport.clone(), params);
    let index = Arc::new(SlowIndex {
        inner: index_of(4),
        delay: Duration::from_millis(300),
    });

    let report = downloader.run(index, &aoi(), 10).await.expect("Download run failed");

    assert_eq!(report.matched, 4);
    assert_eq!(report.not_dispatched(), 4);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert!(files_in(&store).is_empty());
    assert_eq!(report.status(), StageStatus::Failed);
}
