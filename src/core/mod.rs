//! Stage logic: readiness, terrain model, derivatives and detection

pub mod anomaly;
pub mod derivatives;
pub mod detector;
pub mod hillshade;
pub mod prompt;
pub mod state;
pub mod svf;
pub mod terrain;

// Re-export main types
pub use anomaly::{parse_model_response, Anomaly, AnomalyCategory, AnomalyCollection, ParsedResponse, ValidationFlag};
pub use derivatives::{DerivativeEngine, DerivativeReport};
pub use detector::{AnomalyDetector, DetectionReport};
pub use hillshade::{HillshadeGenerator, HillshadeParams, HILLSHADE_AZIMUTHS};
pub use prompt::{build_prompt, PreviewKind};
pub use state::{PipelineState, Stage, StageState, StageVector};
pub use svf::{SkyViewFactor, SvfParams};
pub use terrain::{TerrainModelParams, TerrainModelStage};
