//! Terrain-model stage
//!
//! DEM generation is delegated to a PDAL pipeline; this stage only invokes it
//! and checks the artifact it produces.

use crate::io::artifact::{ArtifactRole, ArtifactStore, StagedFile};
use crate::io::external::run_tool;
use crate::types::{LidarError, LidarResult};
use std::path::PathBuf;

/// Terrain-model stage parameters
#[derive(Debug, Clone)]
pub struct TerrainModelParams {
    pub tool: String,
    /// Pipeline stage whose `filename` option is redirected to the staging file
    pub writer_stage: String,
}

impl Default for TerrainModelParams {
    fn default() -> Self {
        Self {
            tool: "pdal".to_string(),
            writer_stage: "writers.gdal".to_string(),
        }
    }
}

pub struct TerrainModelStage {
    store: ArtifactStore,
    params: TerrainModelParams,
}

impl TerrainModelStage {
    pub fn new(store: ArtifactStore) -> Self {
        Self::with_params(store, TerrainModelParams::default())
    }

    pub fn with_params(store: ArtifactStore, params: TerrainModelParams) -> Self {
        Self { store, params }
    }

    /// Run the PDAL pipeline and publish the terrain model
    pub fn run(&self) -> LidarResult<PathBuf> {
        self.store.require(ArtifactRole::Tiles)?;

        let pipeline = &self.store.paths().pdal_pipeline;
        if !pipeline.is_file() {
            return Err(LidarError::MissingArtifact {
                role: "PDAL pipeline".to_string(),
                path: pipeline.clone(),
            });
        }

        log::info!(
            "Generating terrain model from {} tiles with {}",
            self.store.list_tiles().len(),
            pipeline.display()
        );

        let staged = StagedFile::new(self.store.terrain_model_path())?;
        let filename_override = format!(
            "--{}.filename={}",
            self.params.writer_stage,
            staged.path().display()
        );
        let args = vec![
            "pipeline".to_string(),
            pipeline.to_string_lossy().to_string(),
            filename_override,
        ];

        let output = run_tool(&self.params.tool, &args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            log::debug!("{} output: {}", self.params.tool, stdout.trim());
        }

        if !staged.path().is_file() {
            return Err(LidarError::ToolFailed {
                tool: self.params.tool.clone(),
                status: "exit status: 0".to_string(),
                stderr: format!("pipeline wrote no raster to {}", staged.path().display()),
            });
        }

        let path = staged.commit()?;
        log::info!("✓ Terrain model generated: {}", path.display());
        Ok(path)
    }
}
