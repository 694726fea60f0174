//! Bounded-concurrency LiDAR tile downloader
//!
//! Tiles are fetched on the tokio runtime with at most
//! [`MAX_CONCURRENT_DOWNLOADS`] transfers in flight. Every tile gets its own
//! result; a failing tile is logged and skipped without affecting the rest.

use crate::io::artifact::{is_present, ArtifactStore, StagedFile};
use crate::io::tile_index::TileIndexSource;
use crate::types::{BoundingBox, LidarError, LidarResult, StageStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Concurrency limit for tile transfers
pub const MAX_CONCURRENT_DOWNLOADS: usize = 6;

/// Downloader parameters
#[derive(Debug, Clone)]
pub struct DownloadParams {
    pub max_concurrent: usize,
    /// Per-request timeout, enforced by the transport
    pub request_timeout: Duration,
    /// Whole-stage budget; once spent, no new transfers are started
    pub stage_timeout: Duration,
}

impl Default for DownloadParams {
    fn default() -> Self {
        Self {
            max_concurrent: MAX_CONCURRENT_DOWNLOADS,
            request_timeout: Duration::from_secs(300),
            stage_timeout: Duration::from_secs(600),
        }
    }
}

/// Moves the bytes behind a tile URL into a sink
#[async_trait]
pub trait TileTransport: Send + Sync {
    /// Stream the resource at `url` into `sink`, returning the byte count
    async fn fetch(&self, url: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> LidarResult<u64>;
}

/// HTTP transport backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> LidarResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("lidar-prospect/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TileTransport for HttpTransport {
    async fn fetch(&self, url: &str, sink: &mut (dyn AsyncWrite + Unpin + Send)) -> LidarResult<u64> {
        let mut response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(LidarError::TileDownload {
                tile_id: url.to_string(),
                reason: format!(
                    "HTTP {} {}",
                    response.status().as_u16(),
                    response.status().canonical_reason().unwrap_or("")
                ),
            });
        }

        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }
}

/// What happened to one selected tile
#[derive(Debug, Clone, PartialEq)]
pub enum TileOutcome {
    Downloaded { bytes: u64 },
    /// Published by an earlier run; not re-fetched
    AlreadyPresent,
    Failed { reason: String },
    /// The stage timeout expired before this tile got a slot
    NotDispatched,
}

#[derive(Debug, Clone)]
pub struct TileResult {
    pub tile_id: String,
    pub path: PathBuf,
    pub outcome: TileOutcome,
}

/// Summary of a download run
#[derive(Debug, Clone)]
pub struct DownloadReport {
    /// Tiles in the index intersecting the AOI
    pub matched: usize,
    pub results: Vec<TileResult>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl DownloadReport {
    fn count(&self, pred: impl Fn(&TileOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// Tiles selected after the max-download cap
    pub fn selected(&self) -> usize {
        self.results.len()
    }

    /// Transfers actually started
    pub fn attempted(&self) -> usize {
        self.succeeded() + self.failed()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, TileOutcome::Downloaded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TileOutcome::Failed { .. }))
    }

    pub fn already_present(&self) -> usize {
        self.count(|o| matches!(o, TileOutcome::AlreadyPresent))
    }

    pub fn not_dispatched(&self) -> usize {
        self.count(|o| matches!(o, TileOutcome::NotDispatched))
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match r.outcome {
                TileOutcome::Downloaded { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn status(&self) -> StageStatus {
        let available = self.succeeded() + self.already_present();
        if available == 0 {
            StageStatus::Failed
        } else if self.failed() > 0 || self.not_dispatched() > 0 {
            StageStatus::Partial
        } else {
            StageStatus::Success
        }
    }
}

/// Fetches the AOI's tiles into the artifact store
pub struct TileDownloader {
    store: ArtifactStore,
    transport: Arc<dyn TileTransport>,
    params: DownloadParams,
}

impl TileDownloader {
    /// Downloader using HTTP with default parameters
    pub fn new(store: ArtifactStore) -> LidarResult<Self> {
        let params = DownloadParams::default();
        let transport = HttpTransport::new(params.request_timeout)?;
        Ok(Self::with_transport(store, Arc::new(transport), params))
    }

    pub fn with_transport(
        store: ArtifactStore,
        transport: Arc<dyn TileTransport>,
        params: DownloadParams,
    ) -> Self {
        Self {
            store,
            transport,
            params,
        }
    }

    /// Download at most `max_tiles` tiles intersecting `aoi`.
    ///
    /// Only a failure to read the index is returned as an error; per-tile
    /// failures are recorded in the report.
    pub async fn run(
        &self,
        index: Arc<dyn TileIndexSource>,
        aoi: &BoundingBox,
        max_tiles: usize,
    ) -> LidarResult<DownloadReport> {
        aoi.validate()?;
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + self.params.stage_timeout;

        let query = *aoi;
        let candidates = tokio::task::spawn_blocking(move || index.intersecting(&query))
            .await
            .map_err(|e| LidarError::IndexUnavailable(format!("index loader panicked: {}", e)))??;

        let matched = candidates.len();
        let selected: Vec<_> = candidates.into_iter().take(max_tiles).collect();
        log::info!(
            "{} index tiles intersect the AOI, downloading {}",
            matched,
            selected.len()
        );
        if selected.is_empty() {
            log::warn!("No tiles found for the specified bounding box");
        }

        tokio::fs::create_dir_all(self.store.tiles_dir()).await?;

        let semaphore = Arc::new(Semaphore::new(self.params.max_concurrent.max(1)));
        let mut results: Vec<TileResult> = Vec::with_capacity(selected.len());
        let mut handles = Vec::new();
        let mut expired = false;

        for entry in selected {
            let path = self.store.tile_path(&entry.tile_id);
            let slot = results.len();
            results.push(TileResult {
                tile_id: entry.tile_id.clone(),
                path: path.clone(),
                outcome: TileOutcome::NotDispatched,
            });

            if is_present(&path) {
                log::info!("Tile {} already downloaded, skipping", entry.tile_id);
                results[slot].outcome = TileOutcome::AlreadyPresent;
                continue;
            }
            if expired {
                continue;
            }
            // `timeout_at` would still hand out a free permit after the deadline.
            if Instant::now() >= deadline {
                log::warn!(
                    "Download stage timeout of {:?} reached, not starting further tiles",
                    self.params.stage_timeout
                );
                expired = true;
                continue;
            }

            let permit = match tokio::time::timeout_at(deadline, semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    expired = true;
                    continue;
                }
                Err(_) => {
                    log::warn!(
                        "Download stage timeout of {:?} reached, not starting further tiles",
                        self.params.stage_timeout
                    );
                    expired = true;
                    continue;
                }
            };

            let transport = Arc::clone(&self.transport);
            handles.push((
                slot,
                tokio::spawn(async move {
                    let _permit = permit;
                    download_tile(transport.as_ref(), &entry.url, &entry.tile_id, &path).await
                }),
            ));
        }

        for (slot, handle) in handles {
            let tile_id = results[slot].tile_id.clone();
            results[slot].outcome = match handle.await {
                Ok(Ok(bytes)) => {
                    log::info!("✓ Downloaded {} ({} bytes)", tile_id, bytes);
                    TileOutcome::Downloaded { bytes }
                }
                Ok(Err(e)) => {
                    log::warn!("✗ Failed to download {}: {}", tile_id, e);
                    TileOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    log::error!("✗ Download task for {} aborted: {}", tile_id, e);
                    TileOutcome::Failed {
                        reason: format!("download task aborted: {}", e),
                    }
                }
            };
        }

        let report = DownloadReport {
            matched,
            results,
            started_at,
            elapsed: start.elapsed(),
        };
        log::info!(
            "Download finished ({}): {} attempted, {} succeeded, {} failed, {} already present, {} not started",
            report.status(),
            report.attempted(),
            report.succeeded(),
            report.failed(),
            report.already_present(),
            report.not_dispatched()
        );
        Ok(report)
    }
}

/// Stream one tile into a staging file and publish it on success
async fn download_tile(
    transport: &dyn TileTransport,
    url: &str,
    tile_id: &str,
    path: &Path,
) -> LidarResult<u64> {
    let staged = StagedFile::new(path)?;
    let mut file = tokio::fs::File::create(staged.path()).await?;

    let bytes = transport.fetch(url, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if bytes == 0 {
        return Err(LidarError::TileDownload {
            tile_id: tile_id.to_string(),
            reason: "empty response body".to_string(),
        });
    }
    staged.commit()?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(outcomes: Vec<TileOutcome>) -> DownloadReport {
        DownloadReport {
            matched: outcomes.len(),
            results: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| TileResult {
                    tile_id: i.to_string(),
                    path: PathBuf::from(format!("{}.laz", i)),
                    outcome,
                })
                .collect(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_report_counts_and_status() {
        let report = report_with(vec![
            TileOutcome::Downloaded { bytes: 10 },
            TileOutcome::Failed {
                reason: "HTTP 503".to_string(),
            },
            TileOutcome::AlreadyPresent,
            TileOutcome::NotDispatched,
        ]);
        assert_eq!(report.selected(), 4);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.already_present(), 1);
        assert_eq!(report.not_dispatched(), 1);
        assert_eq!(report.bytes_downloaded(), 10);
        assert_eq!(report.status(), StageStatus::Partial);
    }

    #[test]
    fn test_report_status_edges() {
        assert_eq!(report_with(vec![]).status(), StageStatus::Failed);
        assert_eq!(
            report_with(vec![TileOutcome::Failed {
                reason: "timeout".to_string()
            }])
            .status(),
            StageStatus::Failed
        );
        assert_eq!(
            report_with(vec![TileOutcome::Downloaded { bytes: 1 }, TileOutcome::AlreadyPresent]).status(),
            StageStatus::Success
        );
    }
}
