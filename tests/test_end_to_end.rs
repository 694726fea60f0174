use async_trait::async_trait;
use lidar_prospect::config::{AoiConfig, PipelineConfig};
use lidar_prospect::core::state::{Stage, StageState};
use lidar_prospect::io::download::{DownloadParams, TileDownloader, TileTransport};
use lidar_prospect::io::tile_index::{StaticTileIndex, TileIndexEntry, TileIndexSource};
use lidar_prospect::types::{BoundingBox, LidarResult, StageStatus};
use lidar_prospect::Pipeline;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};

struct EchoTransport;

#[async_trait]
impl TileTransport for EchoTransport {
    async fn fetch(&self, url: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> LidarResult<u64> {
        sink.write_all(url.as_bytes()).await?;
        Ok(url.len() as u64)
    }
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        aoi: AoiConfig {
            name: "Test".to_string(),
            bbox: [-4.2, 36.7, -4.0, 36.9],
            utm_zone: "30N".to_string(),
            max_downloads: 2,
        },
        paths: Default::default(),
        index: Default::default(),
        model: Default::default(),
    }
}

fn entry(id: &str, w: f64, s: f64, e: f64, n: f64) -> TileIndexEntry {
    TileIndexEntry {
        url: format!("https://tiles.example/{}.laz", id),
        tile_id: id.to_string(),
        footprint: BoundingBox::from_wsen(w, s, e, n),
    }
}

#[tokio::test]
async fn test_download_to_terrain_readiness() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().expect("Failed to create temp directory");
    let pipeline = Pipeline::with_root(test_config(), dir.path());
    let never_run = pipeline.status();

    assert!(!pipeline.state().stage_ready(Stage::TerrainModel));

    let entries = vec![
        entry("0001", -4.19, 36.71, -4.15, 36.75),
        entry("9999", 2.0, 41.0, 2.1, 41.1),
        entry("0002", -4.10, 36.80, -4.05, 36.85),
        entry("0003", -4.05, 36.85, -3.95, 36.95),
    ];
    let index: Arc<dyn TileIndexSource> = Arc::new(StaticTileIndex::new(entries.clone()));
    let downloader = TileDownloader::with_transport(
        pipeline.store().clone(),
        Arc::new(EchoTransport),
        DownloadParams::default(),
    );

    let report = pipeline
        .download_with(&downloader, index)
        .await
        .expect("Download stage failed");

    println!(
        "matched {}, attempted {}, succeeded {}",
        report.matched,
        report.attempted(),
        report.succeeded()
    );
    assert_eq!(report.matched, 3);
    assert_eq!(report.attempted(), 2);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.status(), StageStatus::Success);

    let aoi = pipeline.config().aoi.bounding_box();
    let ids: Vec<&str> = report.results.iter().map(|r| r.tile_id.as_str()).collect();
    assert_eq!(ids, vec!["0001", "0002"]);
    assert!(report.results.iter().all(|r| r.path.exists()));
    assert!(pipeline.store().list_tiles().len() <= 2);
    for result in &report.results {
        let listed = entries
            .iter()
            .find(|e| e.tile_id == result.tile_id)
            .expect("Downloaded tile not in index");
        assert!(listed.footprint.intersects(&aoi));
    }

    let status = pipeline.status();
    assert_eq!(status.get(Stage::Download), StageState::Complete);
    assert_eq!(status.get(Stage::TerrainModel), StageState::ReadyToRun);
    assert!(pipeline.state().stage_ready(Stage::TerrainModel));

    let reset = pipeline.reset();
    assert!(reset.is_clean());
    assert_eq!(pipeline.status(), never_run);
}

#[test]
fn test_stages_refuse_to_run_without_inputs() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let pipeline = Pipeline::with_root(test_config(), dir.path());

    assert!(pipeline.terrain_model().is_err());
    assert!(pipeline.derivatives().is_err());
    // Nothing was created as a side effect.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
