//! lidar-prospect: LiDAR terrain analysis for archaeological prospection
//!
//! Downloads point-cloud tiles for an area of interest, builds a bare-earth
//! terrain model, derives relief visualizations (multi-azimuth hillshade and
//! sky view factor) and asks a multimodal model to flag candidate anomalies.
//! Stage progress is tracked purely by artifact presence on disk.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{AoiConfig, PipelineConfig};
pub use crate::core::{Anomaly, AnomalyCategory, AnomalyCollection, PipelineState, Stage, StageState};
pub use crate::io::{ArtifactRole, ArtifactStore};
pub use pipeline::Pipeline;
pub use types::{BoundingBox, ErrorClass, LidarError, LidarResult, Raster, StageStatus};
