//! Pipeline configuration (YAML)
//!
//! Only the `aoi` section is required; every other section falls back to the
//! default on-disk layout:
//!
//! ```yaml
//! aoi:
//!   name: Vélez-Málaga
//!   bbox: [-4.2, 36.7, -4.0, 36.9]
//!   utm_zone: "30N"
//!   max_downloads: 20
//! ```

use crate::types::{BoundingBox, LidarError, LidarResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default PNOA-LiDAR tile index, a zipped shapefile read through GDAL's VSI layer
pub const DEFAULT_INDEX_URL: &str =
    "/vsizip//vsicurl/https://centrodedescargas.cnig.es/CentroDescargas/documentos/PDT_LIDAR3_2025.zip";

/// Area of interest, immutable for the duration of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiConfig {
    pub name: String,
    /// `[west, south, east, north]`
    pub bbox: [f64; 4],
    /// CRS zone identifier, e.g. "30N"
    pub utm_zone: String,
    pub max_downloads: usize,
}

impl AoiConfig {
    pub fn bounding_box(&self) -> BoundingBox {
        let [w, s, e, n] = self.bbox;
        BoundingBox::from_wsen(w, s, e, n)
    }

    pub fn validate(&self) -> LidarResult<()> {
        if self.name.trim().is_empty() {
            return Err(LidarError::InvalidAoi("name must not be blank".to_string()));
        }
        self.bounding_box().validate()
    }
}

/// Artifact locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub tiles_dir: PathBuf,
    pub terrain_model: PathBuf,
    pub derivatives_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// PDAL pipeline definition used by the terrain-model stage
    pub pdal_pipeline: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tiles_dir: PathBuf::from("data/laz"),
            terrain_model: PathBuf::from("data/dem.tif"),
            derivatives_dir: PathBuf::from("data/deriv"),
            outputs_dir: PathBuf::from("outputs"),
            pdal_pipeline: PathBuf::from("pipelines/laz2dem.json"),
        }
    }
}

impl PathsConfig {
    /// Resolve relative paths against `root`
    pub fn rooted_at(&self, root: &Path) -> Self {
        let join = |p: &PathBuf| if p.is_absolute() { p.clone() } else { root.join(p) };
        Self {
            tiles_dir: join(&self.tiles_dir),
            terrain_model: join(&self.terrain_model),
            derivatives_dir: join(&self.derivatives_dir),
            outputs_dir: join(&self.outputs_dir),
            pdal_pipeline: join(&self.pdal_pipeline),
        }
    }
}

/// Remote tile index location and attribute names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Any dataset path GDAL/OGR can open, including `/vsicurl/` URLs
    pub url: String,
    pub url_field: String,
    pub id_field: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_INDEX_URL.to_string(),
            url_field: "URL_DESCARGA".to_string(),
            id_field: "HOJA".to_string(),
        }
    }
}

/// Generative model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-2.5-pro".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub aoi: AoiConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

impl PipelineConfig {
    /// Load and validate a YAML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> LidarResult<Self> {
        log::info!("Loading configuration from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> LidarResult<Self> {
        let config: PipelineConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        log::debug!("Configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> LidarResult<()> {
        self.aoi.validate()?;
        if self.model.timeout_secs == 0 {
            return Err(LidarError::Config("model.timeout_secs must be positive".to_string()));
        }
        if self.index.url.trim().is_empty() {
            return Err(LidarError::Config("index.url must not be blank".to_string()));
        }
        Ok(())
    }
}
