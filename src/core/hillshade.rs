use crate::io::artifact::{ArtifactStore, StagedFile};
use crate::io::external::run_tool;
use crate::types::{LidarError, LidarResult};
use std::path::{Path, PathBuf};

/// Illumination azimuths, in generation order
pub const HILLSHADE_AZIMUTHS: [u32; 8] = [45, 90, 135, 180, 225, 270, 315, 360];

/// Multi-azimuth hillshade parameters
#[derive(Debug, Clone)]
pub struct HillshadeParams {
    pub azimuths: Vec<u32>,
    /// Sun altitude in degrees
    pub altitude: f64,
    /// Compute border pixels instead of leaving them as no-data
    pub compute_edges: bool,
    /// Executable providing `<tool> hillshade`
    pub tool: String,
}

impl Default for HillshadeParams {
    fn default() -> Self {
        Self {
            azimuths: HILLSHADE_AZIMUTHS.to_vec(),
            altitude: 45.0,
            compute_edges: true,
            tool: "gdaldem".to_string(),
        }
    }
}

/// Result for one azimuth
#[derive(Debug, Clone)]
pub struct HillshadeResult {
    pub azimuth: u32,
    /// Published path, or the failure message
    pub result: Result<PathBuf, String>,
}

/// Runs the external relief tool once per azimuth
pub struct HillshadeGenerator {
    params: HillshadeParams,
}

impl Default for HillshadeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl HillshadeGenerator {
    pub fn new() -> Self {
        Self {
            params: HillshadeParams::default(),
        }
    }

    pub fn with_params(params: HillshadeParams) -> Self {
        Self { params }
    }

    fn arguments(&self, azimuth: u32, dem: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "hillshade".to_string(),
            "-az".to_string(),
            azimuth.to_string(),
            "-alt".to_string(),
            self.params.altitude.to_string(),
        ];
        if self.params.compute_edges {
            args.push("-compute_edges".to_string());
        }
        args.push(dem.to_string_lossy().to_string());
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Generate one hillshade per azimuth from `dem`.
    ///
    /// A failing azimuth is recorded and the next one is tried. A missing tool
    /// aborts the whole set with [`LidarError::ToolNotFound`].
    pub fn generate(&self, dem: &Path, store: &ArtifactStore) -> LidarResult<Vec<HillshadeResult>> {
        log::info!("Generating hillshade derivatives for {} azimuths", self.params.azimuths.len());
        let mut results = Vec::with_capacity(self.params.azimuths.len());

        for &azimuth in &self.params.azimuths {
            let staged = StagedFile::new(store.hillshade_path(azimuth))?;
            let args = self.arguments(azimuth, dem, staged.path());

            let result = match run_tool(&self.params.tool, &args) {
                Ok(_) => staged.commit().map_err(|e| e.to_string()),
                Err(LidarError::ToolNotFound(tool)) => {
                    log::error!("✗ {} not found. Make sure GDAL is installed.", tool);
                    return Err(LidarError::ToolNotFound(tool));
                }
                Err(e) => Err(e.to_string()),
            };

            match &result {
                Ok(_) => log::info!("✓ Generated hillshade azimuth {}°", azimuth),
                Err(e) => log::warn!("✗ Error generating hillshade {}°: {}", azimuth, e),
            }
            results.push(HillshadeResult { azimuth, result });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_follow_gdaldem_layout() {
        let generator = HillshadeGenerator::new();
        let args = generator.arguments(135, Path::new("data/dem.tif"), Path::new("data/deriv/.hill_135.partial.tif"));
        assert_eq!(
            args,
            vec![
                "hillshade",
                "-az",
                "135",
                "-alt",
                "45",
                "-compute_edges",
                "data/dem.tif",
                "data/deriv/.hill_135.partial.tif"
            ]
        );
    }

    #[test]
    fn test_default_azimuths() {
        assert_eq!(HillshadeParams::default().azimuths, HILLSHADE_AZIMUTHS.to_vec());
    }
}
