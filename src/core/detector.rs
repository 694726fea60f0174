//! AI-assisted anomaly detection stage

use crate::config::AoiConfig;
use crate::core::anomaly::{excerpt, parse_model_response, AnomalyCollection, ValidationFlag, EXCERPT_CHARS};
use crate::core::prompt::{build_prompt, PreviewKind};
use crate::io::artifact::{ArtifactRole, ArtifactStore};
use crate::io::gemini::{GenerativeModel, ImagePart, ModelRequest};
use crate::io::preview::{render_preview, Preview};
use crate::types::{LidarError, LidarResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on the whole model call
pub const DETECTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of one detection run
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub collection: AnomalyCollection,
    pub flags: Vec<ValidationFlag>,
    /// Previews attached to the request, in order
    pub images_sent: Vec<PreviewKind>,
    /// Previews that could not be rendered
    pub skipped: Vec<(PreviewKind, String)>,
    pub path: PathBuf,
}

impl DetectionReport {
    pub fn dropped(&self) -> usize {
        self.flags
            .iter()
            .filter(|f| matches!(f, ValidationFlag::DroppedFeature { .. }))
            .count()
    }
}

pub struct AnomalyDetector {
    store: ArtifactStore,
    model: Arc<dyn GenerativeModel>,
    aoi: AoiConfig,
    timeout: Duration,
    previews: Vec<PreviewKind>,
}

impl AnomalyDetector {
    pub fn new(store: ArtifactStore, model: Arc<dyn GenerativeModel>, aoi: AoiConfig) -> Self {
        Self {
            store,
            model,
            aoi,
            timeout: DETECTION_TIMEOUT,
            previews: PreviewKind::DEFAULT_SET.to_vec(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render every available preview. The terrain model is mandatory;
    /// derivative previews are skipped when missing or unreadable.
    fn render_previews(&self) -> LidarResult<(Vec<(PreviewKind, Preview)>, Vec<(PreviewKind, String)>)> {
        let mut rendered = Vec::new();
        let mut skipped = Vec::new();

        for kind in &self.previews {
            let role = kind.role();
            if !self.store.exists(role) {
                if role == ArtifactRole::TerrainModel {
                    self.store.require(role)?;
                }
                log::info!("{} not available, skipping its preview", role);
                skipped.push((*kind, format!("{} not available", role)));
                continue;
            }

            match render_preview(self.store.path_for(role), kind.range()) {
                Ok(preview) => {
                    if let Err(e) = preview.save(self.store.preview_path(&kind.preview_name())) {
                        log::warn!("Could not save {} preview: {}", role, e);
                    }
                    rendered.push((*kind, preview));
                }
                Err(e) if role == ArtifactRole::TerrainModel => return Err(e),
                Err(e) => {
                    log::warn!("✗ Error creating preview for {}: {}", role, e);
                    skipped.push((*kind, e.to_string()));
                }
            }
        }

        Ok((rendered, skipped))
    }

    /// Run detection and persist the validated collection.
    ///
    /// Nothing is written unless the model answered and at least the
    /// collection structure validated.
    pub async fn run(&self) -> LidarResult<DetectionReport> {
        log::info!("Starting anomaly detection for {}", self.aoi.name);
        self.store.require(ArtifactRole::TerrainModel)?;

        let (rendered, skipped) = self.render_previews()?;
        let images_sent: Vec<PreviewKind> = rendered.iter().map(|(k, _)| *k).collect();
        let request = ModelRequest {
            prompt: build_prompt(&self.aoi, &images_sent),
            images: rendered
                .into_iter()
                .map(|(_, preview)| ImagePart {
                    mime_type: Preview::MIME_TYPE.to_string(),
                    data: preview.png,
                })
                .collect(),
        };

        log::info!("Analyzing {} image(s) with the model", request.images.len());
        let text = tokio::time::timeout(self.timeout, self.model.generate(&request))
            .await
            .map_err(|_| LidarError::Timeout {
                operation: "model request".to_string(),
                seconds: self.timeout.as_secs(),
            })??;

        let parsed = parse_model_response(&text, Some(&self.aoi.bounding_box())).map_err(|e| {
            log::error!("✗ No valid JSON found in model response");
            log::debug!("Response: {}", excerpt(&text, EXCERPT_CHARS));
            e
        })?;

        let path = self.store.anomalies_path();
        parsed.collection.save(&path)?;
        log::info!("✅ Detected {} anomalies", parsed.collection.len());

        Ok(DetectionReport {
            collection: parsed.collection,
            flags: parsed.flags,
            images_sent,
            skipped,
            path,
        })
    }
}
