use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 2D elevation or derivative grid (rows x cols)
pub type RasterGrid = Array2<f32>;

/// Geospatial bounding box in geographic coordinates (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build from the `[west, south, east, north]` order used in configuration
    pub fn from_wsen(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            min_lon: west,
            max_lon: east,
            min_lat: south,
            max_lat: north,
        }
    }

    /// Returns `[west, south, east, north]`
    pub fn to_wsen(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// Reject inverted, degenerate or non-finite boxes
    pub fn validate(&self) -> LidarResult<()> {
        let all_finite = self.to_wsen().iter().all(|v| v.is_finite());
        if !all_finite {
            return Err(LidarError::InvalidAoi(format!(
                "bounding box has non-finite coordinates: {:?}",
                self.to_wsen()
            )));
        }
        if self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(LidarError::InvalidAoi(format!(
                "bounding box must satisfy west < east and south < north, got {:?}",
                self.to_wsen()
            )));
        }
        Ok(())
    }

    /// Closed-interval intersection test (shared edges count as intersecting)
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    /// Center as (lon, lat)
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self {
            top_left_x: coefficients[0],
            pixel_width: coefficients[1],
            rotation_x: coefficients[2],
            top_left_y: coefficients[3],
            rotation_y: coefficients[4],
            pixel_height: coefficients[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map a pixel corner (col, row) to projected coordinates
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }
}

/// A single-band raster with its georeferencing
#[derive(Debug, Clone)]
pub struct Raster {
    pub data: RasterGrid,
    pub geo_transform: GeoTransform,
    /// Projection as WKT; empty when the source carried none
    pub projection: String,
    pub no_data: Option<f64>,
}

impl Raster {
    pub fn new(data: RasterGrid, geo_transform: GeoTransform, projection: String) -> Self {
        Self {
            data,
            geo_transform,
            projection,
            no_data: None,
        }
    }

    /// Same grid and georeferencing, new pixel values
    pub fn with_data(&self, data: RasterGrid) -> Self {
        Self {
            data,
            geo_transform: self.geo_transform,
            projection: self.projection.clone(),
            no_data: self.no_data,
        }
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn is_no_data(&self, value: f32) -> bool {
        if !value.is_finite() {
            return true;
        }
        match self.no_data {
            Some(nd) if nd.is_nan() => value.is_nan(),
            Some(nd) => (value as f64 - nd).abs() < f64::EPSILON,
            None => false,
        }
    }
}

/// User-facing outcome of one stage invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Success,
    /// Some items failed; the stage output exists but is incomplete
    Partial,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Success => write!(f, "success"),
            StageStatus::Partial => write!(f, "partial success"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Broad failure classes, used by the driver to decide what to tell the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing prerequisite artifact, missing credential or invalid input
    Precondition,
    /// Network, timeout or tool runtime failure; re-running the stage may succeed
    Transient,
    /// An external executable is not installed
    ToolUnavailable,
    /// Unparsable model output, unreadable raster or malformed index
    DataValidity,
}

/// Error types for the pipeline
#[derive(Debug, thiserror::Error)]
pub enum LidarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid area of interest: {0}")]
    InvalidAoi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing {role} artifact: {}", path.display())]
    MissingArtifact { role: String, path: PathBuf },

    #[error("Missing credential: {0} is not set")]
    MissingCredential(String),

    #[error("Tile index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Download of {tile_id} failed: {reason}")]
    TileDownload { tile_id: String, reason: String },

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Model service returned HTTP {status}: {body}")]
    ModelService { status: u16, body: String },

    #[error("Invalid model response: {reason} (response excerpt: {excerpt:?})")]
    InvalidResponse { reason: String, excerpt: String },

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl LidarError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LidarError::InvalidAoi(_)
            | LidarError::Config(_)
            | LidarError::Yaml(_)
            | LidarError::MissingArtifact { .. }
            | LidarError::MissingCredential(_) => ErrorClass::Precondition,
            LidarError::ToolNotFound(_) => ErrorClass::ToolUnavailable,
            LidarError::Io(_)
            | LidarError::Http(_)
            | LidarError::IndexUnavailable(_)
            | LidarError::TileDownload { .. }
            | LidarError::ToolFailed { .. }
            | LidarError::Timeout { .. }
            | LidarError::ModelService { .. } => ErrorClass::Transient,
            LidarError::Gdal(_)
            | LidarError::Json(_)
            | LidarError::Image(_)
            | LidarError::InvalidResponse { .. }
            | LidarError::InvalidFormat(_)
            | LidarError::Processing(_) => ErrorClass::DataValidity,
        }
    }

    /// Whether re-invoking the stage unchanged could succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::DataValidity)
    }
}

/// Result type for pipeline operations
pub type LidarResult<T> = Result<T, LidarError>;
