//! Stage driver
//!
//! Every stage entry point checks its prerequisites against the artifact
//! store first and fails with [`MissingArtifact`](crate::types::LidarError::MissingArtifact) without side
//! effects when they are absent.

use crate::config::PipelineConfig;
use crate::core::derivatives::{DerivativeEngine, DerivativeReport};
use crate::core::detector::{AnomalyDetector, DetectionReport};
use crate::core::state::{PipelineState, Stage, StageVector};
use crate::core::terrain::TerrainModelStage;
use crate::io::artifact::{ArtifactStore, ResetReport};
use crate::io::download::{DownloadReport, TileDownloader};
use crate::io::gemini::{GeminiClient, GenerativeModel};
use crate::io::tile_index::{TileIndexSource, VectorTileIndex};
use crate::types::LidarResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Pipeline {
    config: PipelineConfig,
    state: PipelineState,
}

impl Pipeline {
    /// Pipeline over the artifact layout in `config.paths`
    pub fn new(config: PipelineConfig) -> Self {
        let store = ArtifactStore::new(config.paths.clone());
        Self {
            config,
            state: PipelineState::new(store),
        }
    }

    /// Same, with relative artifact paths resolved against `root`
    pub fn with_root(mut config: PipelineConfig, root: &Path) -> Self {
        config.paths = config.paths.rooted_at(root);
        Self::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        self.state.store()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn status(&self) -> StageVector {
        self.state.readiness()
    }

    /// Download from the configured tile index over HTTP
    pub async fn download(&self) -> LidarResult<DownloadReport> {
        let downloader = TileDownloader::new(self.store().clone())?;
        let index: Arc<dyn TileIndexSource> = Arc::new(VectorTileIndex::new(self.config.index.clone()));
        self.download_with(&downloader, index).await
    }

    pub async fn download_with(
        &self,
        downloader: &TileDownloader,
        index: Arc<dyn TileIndexSource>,
    ) -> LidarResult<DownloadReport> {
        self.state.ensure_ready(Stage::Download)?;
        let aoi = self.config.aoi.bounding_box();
        downloader.run(index, &aoi, self.config.aoi.max_downloads).await
    }

    pub fn terrain_model(&self) -> LidarResult<PathBuf> {
        self.state.ensure_ready(Stage::TerrainModel)?;
        TerrainModelStage::new(self.store().clone()).run()
    }

    pub fn derivatives(&self) -> LidarResult<DerivativeReport> {
        self.derivatives_with(DerivativeEngine::new(self.store().clone()))
    }

    pub fn derivatives_with(&self, engine: DerivativeEngine) -> LidarResult<DerivativeReport> {
        self.state.ensure_ready(Stage::Derivatives)?;
        engine.run()
    }

    /// Detect with the configured Gemini model.
    ///
    /// The credential is checked before anything else, so a missing key
    /// fails with [`MissingCredential`](crate::types::LidarError::MissingCredential) without touching disk.
    pub async fn detect(&self) -> LidarResult<DetectionReport> {
        let client = GeminiClient::from_env(&self.config.model)?;
        self.detect_with(Arc::new(client)).await
    }

    pub async fn detect_with(&self, model: Arc<dyn GenerativeModel>) -> LidarResult<DetectionReport> {
        self.state.ensure_ready(Stage::Detection)?;
        AnomalyDetector::new(self.store().clone(), model, self.config.aoi.clone())
            .with_timeout(self.config.model.timeout())
            .run()
            .await
    }

    pub fn reset(&self) -> ResetReport {
        self.state.reset()
    }
}
