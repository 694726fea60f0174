//! Filesystem-backed artifact store
//!
//! An artifact's presence is the only record of stage completion, so every
//! write goes through a hidden staging file in the destination directory and
//! becomes visible under its final name by a single rename.

use crate::config::PathsConfig;
use crate::types::{LidarError, LidarResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of raw point-cloud tiles
pub const TILE_EXTENSION: &str = "laz";

/// Azimuth whose hillshade stands in for the whole derivative set
pub const REFERENCE_AZIMUTH: u32 = 45;

/// Logical role of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    Tiles,
    TerrainModel,
    Hillshade(u32),
    SkyViewFactor,
    Anomalies,
}

impl std::fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactRole::Tiles => write!(f, "LiDAR tiles"),
            ArtifactRole::TerrainModel => write!(f, "terrain model"),
            ArtifactRole::Hillshade(az) => write!(f, "hillshade {}°", az),
            ArtifactRole::SkyViewFactor => write!(f, "sky view factor"),
            ArtifactRole::Anomalies => write!(f, "anomaly collection"),
        }
    }
}

/// Outcome of a reset
#[derive(Debug, Clone, Default)]
pub struct ResetReport {
    pub removed: Vec<PathBuf>,
    /// Paths that could not be removed, with the reason
    pub remaining: Vec<(PathBuf, String)>,
}

impl ResetReport {
    pub fn is_clean(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// A file being written under a hidden name next to its destination.
///
/// Dropping it without calling [`StagedFile::commit`] removes the staging file,
/// so an interrupted write never leaves anything under the final name.
#[derive(Debug)]
pub struct StagedFile {
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Reserve a staging path for `target`, creating the parent directory
    pub fn new<P: AsRef<Path>>(target: P) -> LidarResult<Self> {
        let target = target.as_ref().to_path_buf();
        let parent = parent_dir(&target);
        fs::create_dir_all(&parent)?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| LidarError::Processing(format!("no file name in {}", target.display())))?;
        // Keep the extension last so tools that infer the format from it still work.
        let staging_name = match target.extension() {
            Some(ext) => {
                let stem = target.file_stem().unwrap_or_default().to_string_lossy();
                format!(".{}.partial.{}", stem, ext.to_string_lossy())
            }
            None => format!(".{}.partial", file_name),
        };
        let staging = parent.join(staging_name);
        if staging.exists() {
            log::debug!("Removing stale staging file: {}", staging.display());
            fs::remove_file(&staging)?;
        }

        Ok(Self {
            staging,
            target,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.staging
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Publish the staged content under the final name
    pub fn commit(mut self) -> LidarResult<PathBuf> {
        let size = fs::metadata(&self.staging)?.len();
        if size == 0 {
            return Err(LidarError::Processing(format!(
                "refusing to publish empty artifact {}",
                self.target.display()
            )));
        }
        fs::rename(&self.staging, &self.target)?;
        self.committed = true;
        log::debug!("Published {} ({} bytes)", self.target.display(), size);
        Ok(self.target.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed && self.staging.exists() {
            if let Err(e) = fs::remove_file(&self.staging) {
                log::warn!("Could not remove staging file {}: {}", self.staging.display(), e);
            }
        }
    }
}

/// Write `bytes` to `path` so that readers see either the old content or the
/// complete new content
pub fn write_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> LidarResult<()> {
    let path = path.as_ref();
    let parent = parent_dir(path);
    fs::create_dir_all(&parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(&parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| LidarError::Io(e.error))?;
    Ok(())
}

/// True when `path` is a regular, non-empty file
pub fn is_present<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path.as_ref())
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Filesystem layout of every pipeline artifact
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: PathsConfig,
}

impl ArtifactStore {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    pub fn tiles_dir(&self) -> &Path {
        &self.paths.tiles_dir
    }

    /// Final path of a tile; identifiers are reduced to a safe file name
    pub fn tile_path(&self, tile_id: &str) -> PathBuf {
        let safe: String = tile_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.paths.tiles_dir.join(format!("{}.{}", safe, TILE_EXTENSION))
    }

    pub fn terrain_model_path(&self) -> &Path {
        &self.paths.terrain_model
    }

    pub fn derivatives_dir(&self) -> &Path {
        &self.paths.derivatives_dir
    }

    pub fn hillshade_path(&self, azimuth: u32) -> PathBuf {
        self.paths.derivatives_dir.join(format!("hill_{}.tif", azimuth))
    }

    pub fn svf_path(&self) -> PathBuf {
        self.paths.derivatives_dir.join("svf.tif")
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.paths.outputs_dir
    }

    pub fn anomalies_path(&self) -> PathBuf {
        self.paths.outputs_dir.join("anomalies.geojson")
    }

    pub fn preview_path(&self, name: &str) -> PathBuf {
        self.paths.outputs_dir.join(format!("{}_preview.png", name))
    }

    /// Path of the artifact playing `role`; tiles resolve to their directory
    pub fn path_for(&self, role: ArtifactRole) -> PathBuf {
        match role {
            ArtifactRole::Tiles => self.paths.tiles_dir.clone(),
            ArtifactRole::TerrainModel => self.paths.terrain_model.clone(),
            ArtifactRole::Hillshade(az) => self.hillshade_path(az),
            ArtifactRole::SkyViewFactor => self.svf_path(),
            ArtifactRole::Anomalies => self.anomalies_path(),
        }
    }

    /// Published, non-empty tiles in directory order; staging files are ignored
    pub fn list_tiles(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.paths.tiles_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut tiles: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let hidden = p
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with('.'))
                    .unwrap_or(true);
                let is_tile = p
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(TILE_EXTENSION))
                    .unwrap_or(false);
                !hidden && is_tile && is_present(p)
            })
            .collect();
        tiles.sort();
        tiles
    }

    /// Whether the artifact playing `role` exists and is non-empty
    pub fn exists(&self, role: ArtifactRole) -> bool {
        match role {
            ArtifactRole::Tiles => !self.list_tiles().is_empty(),
            other => is_present(self.path_for(other)),
        }
    }

    /// Error unless the artifact playing `role` is present
    pub fn require(&self, role: ArtifactRole) -> LidarResult<()> {
        if self.exists(role) {
            Ok(())
        } else {
            Err(LidarError::MissingArtifact {
                role: role.to_string(),
                path: self.path_for(role),
            })
        }
    }

    /// Remove every derived artifact, most-downstream first.
    ///
    /// Stops at the first removal that fails. That path and every upstream
    /// path still on disk are reported in [`ResetReport::remaining`], so an
    /// incomplete reset never leaves a completed stage whose inputs are gone.
    pub fn reset(&self) -> ResetReport {
        log::info!("Resetting pipeline artifacts");
        let mut report = ResetReport::default();

        let targets: [(&Path, bool); 4] = [
            (&self.paths.outputs_dir, true),
            (&self.paths.derivatives_dir, true),
            (&self.paths.terrain_model, false),
            (&self.paths.tiles_dir, true),
        ];

        for (i, &(path, is_dir)) in targets.iter().enumerate() {
            if !path.exists() {
                continue;
            }
            let result = if is_dir {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            match result {
                Ok(()) => {
                    log::info!("Removed {}", path.display());
                    report.removed.push(path.to_path_buf());
                }
                Err(e) => {
                    log::error!("Could not remove {}: {}", path.display(), e);
                    report.remaining.push((path.to_path_buf(), e.to_string()));
                    for &(upstream, _) in &targets[i + 1..] {
                        if upstream.exists() {
                            report.remaining.push((
                                upstream.to_path_buf(),
                                format!("kept because {} could not be removed", path.display()),
                            ));
                        }
                    }
                    log::warn!("Reset stopped; {} path(s) left in place", report.remaining.len());
                    break;
                }
            }
        }

        report
    }
}
