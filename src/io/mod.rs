//! Filesystem, network and external-tool access

pub mod artifact;
pub mod download;
pub mod external;
pub mod gemini;
pub mod preview;
pub mod raster;
pub mod tile_index;

pub use artifact::{ArtifactRole, ArtifactStore, ResetReport, StagedFile};
pub use download::{DownloadParams, DownloadReport, TileDownloader, TileOutcome, TileTransport};
pub use gemini::{GeminiClient, GenerativeModel, ImagePart, ModelRequest};
pub use preview::{Preview, PreviewRange};
pub use raster::RasterIo;
pub use tile_index::{StaticTileIndex, TileIndexEntry, TileIndexSource, VectorTileIndex};
