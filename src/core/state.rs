//! Artifact-presence state machine
//!
//! Stage state is derived from the filesystem on every query; nothing is
//! cached, so repeated queries without artifact changes always agree.

use crate::io::artifact::{ArtifactRole, ArtifactStore, ResetReport, REFERENCE_AZIMUTH};
use crate::types::{LidarError, LidarResult};
use std::fmt;
use std::str::FromStr;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Download,
    TerrainModel,
    Derivatives,
    Detection,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Download,
        Stage::TerrainModel,
        Stage::Derivatives,
        Stage::Detection,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::TerrainModel => "terrain_model",
            Stage::Derivatives => "derivatives",
            Stage::Detection => "detection",
        }
    }

    /// Artifacts that must exist before the stage may run
    pub fn requires(&self) -> &'static [ArtifactRole] {
        match self {
            Stage::Download => &[],
            Stage::TerrainModel => &[ArtifactRole::Tiles],
            Stage::Derivatives => &[ArtifactRole::TerrainModel],
            // Derivatives improve detection but are not required for it.
            Stage::Detection => &[ArtifactRole::TerrainModel],
        }
    }

    /// Artifacts whose presence marks the stage complete
    pub fn produces(&self) -> &'static [ArtifactRole] {
        match self {
            Stage::Download => &[ArtifactRole::Tiles],
            Stage::TerrainModel => &[ArtifactRole::TerrainModel],
            Stage::Derivatives => &[
                ArtifactRole::Hillshade(REFERENCE_AZIMUTH),
                ArtifactRole::SkyViewFactor,
            ],
            Stage::Detection => &[ArtifactRole::Anomalies],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Stage {
    type Err = LidarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "download" => Ok(Stage::Download),
            "terrain_model" | "terrain" | "dem" => Ok(Stage::TerrainModel),
            "derivatives" | "derive" => Ok(Stage::Derivatives),
            "detection" | "detect" => Ok(Stage::Detection),
            other => Err(LidarError::Config(format!("unknown stage: {}", other))),
        }
    }
}

/// Derived state of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    NotStarted,
    ReadyToRun,
    Complete,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageState::NotStarted => write!(f, "not started"),
            StageState::ReadyToRun => write!(f, "ready to run"),
            StageState::Complete => write!(f, "complete"),
        }
    }
}

/// Snapshot of every stage's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageVector {
    pub states: [(Stage, StageState); 4],
}

impl StageVector {
    pub fn get(&self, stage: Stage) -> StageState {
        self.states
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, state)| *state)
            .unwrap_or(StageState::NotStarted)
    }
}

impl fmt::Display for StageVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (stage, state)) in self.states.iter().enumerate() {
            writeln!(f, "{}. {:<14} {}", i + 1, stage.name(), state)?;
        }
        Ok(())
    }
}

/// Readiness view over an artifact store
#[derive(Debug, Clone)]
pub struct PipelineState {
    store: ArtifactStore,
}

impl PipelineState {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// True iff every predecessor artifact of `stage` exists
    pub fn stage_ready(&self, stage: Stage) -> bool {
        stage.requires().iter().all(|role| self.store.exists(*role))
    }

    /// True iff every output artifact of `stage` exists
    pub fn stage_complete(&self, stage: Stage) -> bool {
        stage.produces().iter().all(|role| self.store.exists(*role))
    }

    pub fn stage_state(&self, stage: Stage) -> StageState {
        if self.stage_complete(stage) {
            StageState::Complete
        } else if self.stage_ready(stage) {
            StageState::ReadyToRun
        } else {
            StageState::NotStarted
        }
    }

    pub fn readiness(&self) -> StageVector {
        StageVector {
            states: Stage::ALL.map(|stage| (stage, self.stage_state(stage))),
        }
    }

    /// Error naming the first missing prerequisite of `stage`
    pub fn ensure_ready(&self, stage: Stage) -> LidarResult<()> {
        for role in stage.requires() {
            self.store.require(*role)?;
        }
        Ok(())
    }

    /// Remove every stage output. Must not run concurrently with a stage.
    pub fn reset(&self) -> ResetReport {
        self.store.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("terrain-model".parse::<Stage>().unwrap(), Stage::TerrainModel);
        assert!("render".parse::<Stage>().is_err());
    }

    #[test]
    fn test_only_download_has_no_prerequisites() {
        assert!(Stage::Download.requires().is_empty());
        for stage in &Stage::ALL[1..] {
            assert!(!stage.requires().is_empty());
        }
    }
}
