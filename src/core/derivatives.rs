use crate::core::hillshade::{HillshadeGenerator, HillshadeResult};
use crate::core::svf::SkyViewFactor;
use crate::io::artifact::{ArtifactRole, ArtifactStore, REFERENCE_AZIMUTH};
use crate::io::raster::RasterIo;
use crate::types::{LidarResult, StageStatus};
use std::path::PathBuf;

/// Outcome of one derivative-stage run
#[derive(Debug, Clone)]
pub struct DerivativeReport {
    pub hillshades: Vec<HillshadeResult>,
    /// Published SVF path, or the failure message
    pub svf: Result<PathBuf, String>,
}

impl DerivativeReport {
    pub fn hillshades_succeeded(&self) -> usize {
        self.hillshades.iter().filter(|h| h.result.is_ok()).count()
    }

    pub fn failed_azimuths(&self) -> Vec<u32> {
        self.hillshades
            .iter()
            .filter(|h| h.result.is_err())
            .map(|h| h.azimuth)
            .collect()
    }

    pub fn status(&self) -> StageStatus {
        let reference_ok = self
            .hillshades
            .iter()
            .any(|h| h.azimuth == REFERENCE_AZIMUTH && h.result.is_ok());
        let all_ok = self.svf.is_ok() && self.hillshades.iter().all(|h| h.result.is_ok());

        if all_ok {
            StageStatus::Success
        } else if reference_ok || self.svf.is_ok() || self.hillshades_succeeded() > 0 {
            StageStatus::Partial
        } else {
            StageStatus::Failed
        }
    }
}

/// Computes hillshades and SVF from the terrain model
pub struct DerivativeEngine {
    store: ArtifactStore,
    hillshade: HillshadeGenerator,
    svf: SkyViewFactor,
}

impl DerivativeEngine {
    pub fn new(store: ArtifactStore) -> Self {
        Self::with_processors(store, HillshadeGenerator::new(), SkyViewFactor::new())
    }

    pub fn with_processors(store: ArtifactStore, hillshade: HillshadeGenerator, svf: SkyViewFactor) -> Self {
        Self { store, hillshade, svf }
    }

    /// Run the hillshade set, then the SVF.
    ///
    /// Fails outright only when the terrain model is missing or the hillshade
    /// tool is not installed; everything else is reported per output.
    pub fn run(&self) -> LidarResult<DerivativeReport> {
        self.store.require(ArtifactRole::TerrainModel)?;
        let dem = self.store.terrain_model_path().to_path_buf();
        std::fs::create_dir_all(self.store.derivatives_dir())?;

        let hillshades = self.hillshade.generate(&dem, &self.store)?;
        let svf = self.sky_view_factor().map_err(|e| {
            log::error!("✗ Error calculating SVF: {}", e);
            e.to_string()
        });
        if svf.is_ok() {
            log::info!("✓ Sky View Factor calculated");
        }

        let report = DerivativeReport { hillshades, svf };
        log::info!(
            "Derivatives finished ({}): {}/{} hillshades",
            report.status(),
            report.hillshades_succeeded(),
            report.hillshades.len()
        );
        Ok(report)
    }

    /// Compute and publish the SVF raster only
    pub fn sky_view_factor(&self) -> LidarResult<PathBuf> {
        let dem = RasterIo::read(self.store.terrain_model_path())?;
        let svf = self.svf.compute_raster(&dem);
        RasterIo::write(&svf, self.store.svf_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hill(azimuth: u32, ok: bool) -> HillshadeResult {
        HillshadeResult {
            azimuth,
            result: if ok {
                Ok(PathBuf::from(format!("hill_{}.tif", azimuth)))
            } else {
                Err("exit status: 1".to_string())
            },
        }
    }

    #[test]
    fn test_report_status() {
        let all_good = DerivativeReport {
            hillshades: vec![hill(45, true), hill(90, true)],
            svf: Ok(PathBuf::from("svf.tif")),
        };
        assert_eq!(all_good.status(), StageStatus::Success);

        let one_bad = DerivativeReport {
            hillshades: vec![hill(45, true), hill(90, false)],
            svf: Ok(PathBuf::from("svf.tif")),
        };
        assert_eq!(one_bad.status(), StageStatus::Partial);
        assert_eq!(one_bad.failed_azimuths(), vec![90]);

        let nothing = DerivativeReport {
            hillshades: vec![hill(45, false), hill(90, false)],
            svf: Err("unreadable".to_string()),
        };
        assert_eq!(nothing.status(), StageStatus::Failed);
    }
}
