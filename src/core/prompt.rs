//! Prompt composition for anomaly detection

use crate::config::AoiConfig;
use crate::core::anomaly::{AnomalyCategory, MAX_ANOMALIES};
use crate::io::artifact::{ArtifactRole, REFERENCE_AZIMUTH};
use crate::io::preview::PreviewRange;
use std::fmt::Write;

/// Raster rendered into a preview and attached to the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    TerrainModel,
    Hillshade(u32),
    SkyViewFactor,
}

impl PreviewKind {
    /// Previews attempted for every detection run, in attachment order
    pub const DEFAULT_SET: [PreviewKind; 3] = [
        PreviewKind::TerrainModel,
        PreviewKind::Hillshade(REFERENCE_AZIMUTH),
        PreviewKind::SkyViewFactor,
    ];

    pub fn role(&self) -> ArtifactRole {
        match self {
            PreviewKind::TerrainModel => ArtifactRole::TerrainModel,
            PreviewKind::Hillshade(az) => ArtifactRole::Hillshade(*az),
            PreviewKind::SkyViewFactor => ArtifactRole::SkyViewFactor,
        }
    }

    pub fn range(&self) -> PreviewRange {
        match self {
            PreviewKind::TerrainModel => PreviewRange::TERRAIN,
            PreviewKind::Hillshade(_) => PreviewRange::HILLSHADE,
            PreviewKind::SkyViewFactor => PreviewRange::SKY_VIEW_FACTOR,
        }
    }

    /// File-name stem of the saved preview
    pub fn preview_name(&self) -> String {
        match self {
            PreviewKind::TerrainModel => "dem".to_string(),
            PreviewKind::Hillshade(az) => format!("hill_{}", az),
            PreviewKind::SkyViewFactor => "svf".to_string(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            PreviewKind::TerrainModel => {
                "Digital terrain model, bare-earth elevation (brighter is higher, 0-300 m)".to_string()
            }
            PreviewKind::Hillshade(az) => format!(
                "Hillshade lit from azimuth {}°, emphasizes relief through shading",
                az
            ),
            PreviewKind::SkyViewFactor => {
                "Sky view factor, darker cells are enclosed micro-depressions (0.5-1.0)".to_string()
            }
        }
    }
}

fn category_line(category: &AnomalyCategory) -> &'static str {
    match category {
        AnomalyCategory::Wall => "wall or linear bank",
        AnomalyCategory::Mound => "burial mound or tumulus",
        AnomalyCategory::Pit => "pit, ditch or moat",
        AnomalyCategory::Path => "ancient road or track",
        AnomalyCategory::Other(_) => "other",
    }
}

/// Build the detection prompt for `aoi`, describing `attached` in order
pub fn build_prompt(aoi: &AoiConfig, attached: &[PreviewKind]) -> String {
    let [west, south, east, north] = aoi.bbox;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are an archaeologist experienced in LiDAR terrain analysis. Study the terrain imagery of {}.",
        aoi.name
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Attached images:");
    for (i, kind) in attached.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", i + 1, kind.description());
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Your task:");
    let _ = writeln!(
        prompt,
        "1. Identify up to {} topographic anomalies that could be buried archaeological structures.",
        MAX_ANOMALIES
    );
    let _ = writeln!(prompt, "2. Classify each one with exactly one \"tipo\" value:");
    for category in &AnomalyCategory::KNOWN {
        let _ = writeln!(prompt, "   - \"{}\": {}", category.wire_name(), category_line(category));
    }
    let _ = writeln!(
        prompt,
        "3. Estimate its coordinates as [longitude, latitude] in WGS84 inside the study area \
         (west {}, south {}, east {}, north {}).",
        west, south, east, north
    );
    let _ = writeln!(prompt, "4. Give a confidence \"score\" between 0.0 and 1.0.");
    let _ = writeln!(
        prompt,
        "5. Give a short \"justificacion\" explaining what makes it anomalous."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Return ONLY one valid JSON object, with no markdown and no additional text, in exactly this shape:"
    );
    prompt.push_str(
        r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "geometry": {"type": "Point", "coordinates": [longitude, latitude]},
      "properties": {
        "tipo": "muro|túmulo|fossa|camino",
        "score": 0.0,
        "justificacion": "short description"
      }
    }
  ]
}
"#,
    );
    prompt
}
