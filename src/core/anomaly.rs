//! Anomaly collection and model-output validation
//!
//! Model output is untrusted. Parsing happens in two phases: the span from the
//! first `{` to the last `}` is taken as the candidate payload, then that JSON
//! is validated feature by feature with coercion rules:
//!
//! - coordinates must be a finite `[longitude, latitude]` pair, otherwise the
//!   feature is dropped;
//! - an unknown category is kept verbatim and flagged;
//! - scores are coerced to a number and clamped into `[0, 1]`.

use crate::io::artifact::write_atomic;
use crate::types::{BoundingBox, LidarError, LidarResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

/// Longest raw-response excerpt carried in diagnostics
pub const EXCERPT_CHARS: usize = 500;

/// Anomalies requested from the model
pub const MAX_ANOMALIES: usize = 10;

/// Anomaly category; wire names are the Spanish terms used in the artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnomalyCategory {
    Wall,
    Mound,
    Pit,
    Path,
    /// Outside the fixed vocabulary, kept as the model wrote it
    Other(String),
}

impl AnomalyCategory {
    pub const KNOWN: [AnomalyCategory; 4] = [
        AnomalyCategory::Wall,
        AnomalyCategory::Mound,
        AnomalyCategory::Pit,
        AnomalyCategory::Path,
    ];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "muro" | "wall" => AnomalyCategory::Wall,
            "túmulo" | "tumulo" | "mound" => AnomalyCategory::Mound,
            "fossa" | "fosa" | "pit" => AnomalyCategory::Pit,
            "camino" | "path" => AnomalyCategory::Path,
            _ => AnomalyCategory::Other(raw.trim().to_string()),
        }
    }

    pub fn wire_name(&self) -> &str {
        match self {
            AnomalyCategory::Wall => "muro",
            AnomalyCategory::Mound => "túmulo",
            AnomalyCategory::Pit => "fossa",
            AnomalyCategory::Path => "camino",
            AnomalyCategory::Other(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, AnomalyCategory::Other(_))
    }
}

impl fmt::Display for AnomalyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// One candidate anomaly
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub lon: f64,
    pub lat: f64,
    pub category: AnomalyCategory,
    /// Confidence in `[0, 1]`
    pub score: f64,
    pub justification: String,
}

/// Something validation had to repair or could not accept
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFlag {
    UnknownCategory { feature: usize, value: String },
    ScoreClamped { feature: usize, original: f64 },
    ScoreCoerced { feature: usize, raw: String },
    ScoreMissing { feature: usize },
    MissingJustification { feature: usize },
    OutsideAoi { feature: usize, lon: f64, lat: f64 },
    DroppedFeature { feature: usize, reason: String },
    TooManyFeatures { count: usize },
}

impl fmt::Display for ValidationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFlag::UnknownCategory { feature, value } => {
                write!(f, "feature {}: category {:?} outside the known vocabulary", feature, value)
            }
            ValidationFlag::ScoreClamped { feature, original } => {
                write!(f, "feature {}: score {} clamped into [0, 1]", feature, original)
            }
            ValidationFlag::ScoreCoerced { feature, raw } => {
                write!(f, "feature {}: score {:?} coerced to a number", feature, raw)
            }
            ValidationFlag::ScoreMissing { feature } => {
                write!(f, "feature {}: score missing, set to 0", feature)
            }
            ValidationFlag::MissingJustification { feature } => {
                write!(f, "feature {}: no justification", feature)
            }
            ValidationFlag::OutsideAoi { feature, lon, lat } => {
                write!(f, "feature {}: ({}, {}) lies outside the AOI", feature, lon, lat)
            }
            ValidationFlag::DroppedFeature { feature, reason } => {
                write!(f, "feature {} dropped: {}", feature, reason)
            }
            ValidationFlag::TooManyFeatures { count } => {
                write!(f, "{} features returned, {} requested", count, MAX_ANOMALIES)
            }
        }
    }
}

// Serialized artifact shape.

#[derive(Debug, Serialize, Deserialize)]
struct FeatureCollectionDoc {
    #[serde(rename = "type")]
    kind: String,
    features: Vec<FeatureDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FeatureDoc {
    #[serde(rename = "type")]
    kind: String,
    geometry: PointDoc,
    properties: PropertiesDoc,
}

#[derive(Debug, Serialize, Deserialize)]
struct PointDoc {
    #[serde(rename = "type")]
    kind: String,
    coordinates: [f64; 2],
}

#[derive(Debug, Serialize, Deserialize)]
struct PropertiesDoc {
    tipo: String,
    score: f64,
    justificacion: String,
}

/// The full anomaly set of one detection run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyCollection {
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyCollection {
    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Anomaly count per category wire name
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for anomaly in &self.anomalies {
            *counts.entry(anomaly.category.wire_name().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Serialize as a GeoJSON FeatureCollection of points
    pub fn to_geojson(&self) -> LidarResult<String> {
        let doc = FeatureCollectionDoc {
            kind: "FeatureCollection".to_string(),
            features: self
                .anomalies
                .iter()
                .map(|a| FeatureDoc {
                    kind: "Feature".to_string(),
                    geometry: PointDoc {
                        kind: "Point".to_string(),
                        coordinates: [a.lon, a.lat],
                    },
                    properties: PropertiesDoc {
                        tipo: a.category.wire_name().to_string(),
                        score: a.score,
                        justificacion: a.justification.clone(),
                    },
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Replace the artifact at `path` with this collection in one step
    pub fn save<P: AsRef<Path>>(&self, path: P) -> LidarResult<()> {
        let json = self.to_geojson()?;
        write_atomic(path.as_ref(), json.as_bytes())?;
        log::info!("✅ GeoJSON saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Read a previously persisted collection
    pub fn load<P: AsRef<Path>>(path: P) -> LidarResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let doc: FeatureCollectionDoc = serde_json::from_str(&text)?;
        Ok(Self {
            anomalies: doc
                .features
                .into_iter()
                .map(|f| Anomaly {
                    lon: f.geometry.coordinates[0],
                    lat: f.geometry.coordinates[1],
                    category: AnomalyCategory::parse(&f.properties.tipo),
                    score: f.properties.score,
                    justification: f.properties.justificacion,
                })
                .collect(),
        })
    }
}

/// Validated model output
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub collection: AnomalyCollection,
    pub flags: Vec<ValidationFlag>,
}

impl ParsedResponse {
    pub fn dropped(&self) -> usize {
        self.flags
            .iter()
            .filter(|f| matches!(f, ValidationFlag::DroppedFeature { .. }))
            .count()
    }

    pub fn unknown_categories(&self) -> usize {
        self.flags
            .iter()
            .filter(|f| matches!(f, ValidationFlag::UnknownCategory { .. }))
            .count()
    }
}

/// First `{` through last `}`, if the text has such a span
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// At most `max_chars` characters of `text`, for diagnostics
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push('…');
    }
    out
}

/// Extract, parse and validate a model response.
///
/// Returns [`LidarError::InvalidResponse`] when no JSON object can be found or
/// parsed, when it has no `features` array, or when features were returned but
/// none survived validation.
pub fn parse_model_response(text: &str, aoi: Option<&BoundingBox>) -> LidarResult<ParsedResponse> {
    let invalid = |reason: String| LidarError::InvalidResponse {
        reason,
        excerpt: excerpt(text, EXCERPT_CHARS),
    };

    let span = extract_json_span(text).ok_or_else(|| invalid("no JSON object found".to_string()))?;
    let value: Value =
        serde_json::from_str(span).map_err(|e| invalid(format!("JSON parse error: {}", e)))?;

    validate_feature_collection(&value, aoi).map_err(invalid)
}

/// Semantic validation of an already-parsed payload
pub fn validate_feature_collection(
    value: &Value,
    aoi: Option<&BoundingBox>,
) -> Result<ParsedResponse, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "payload is not a JSON object".to_string())?;
    match object.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") | None => {}
        Some(other) => return Err(format!("expected a FeatureCollection, got type {:?}", other)),
    }
    let features = object
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing \"features\" array".to_string())?;

    let mut flags = Vec::new();
    if features.len() > MAX_ANOMALIES {
        flags.push(ValidationFlag::TooManyFeatures {
            count: features.len(),
        });
    }

    let mut anomalies = Vec::with_capacity(features.len());
    for (index, feature) in features.iter().enumerate() {
        match validate_feature(index, feature, aoi, &mut flags) {
            Ok(anomaly) => anomalies.push(anomaly),
            Err(reason) => flags.push(ValidationFlag::DroppedFeature {
                feature: index,
                reason,
            }),
        }
    }

    if !features.is_empty() && anomalies.is_empty() {
        return Err(format!("none of the {} features passed validation", features.len()));
    }

    for flag in &flags {
        log::warn!("Model output: {}", flag);
    }

    Ok(ParsedResponse {
        collection: AnomalyCollection { anomalies },
        flags,
    })
}

fn validate_feature(
    index: usize,
    feature: &Value,
    aoi: Option<&BoundingBox>,
    flags: &mut Vec<ValidationFlag>,
) -> Result<Anomaly, String> {
    let coordinates = feature
        .pointer("/geometry/coordinates")
        .and_then(Value::as_array)
        .ok_or_else(|| "no geometry.coordinates array".to_string())?;
    if coordinates.len() != 2 {
        return Err(format!("expected 2 coordinates, got {}", coordinates.len()));
    }
    let lon = coerce_number(&coordinates[0]).ok_or_else(|| "longitude is not a number".to_string())?;
    let lat = coerce_number(&coordinates[1]).ok_or_else(|| "latitude is not a number".to_string())?;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("({}, {}) is not a longitude/latitude pair", lon, lat));
    }
    if let Some(bbox) = aoi {
        if !bbox.contains(lon, lat) {
            flags.push(ValidationFlag::OutsideAoi { feature: index, lon, lat });
        }
    }

    let properties = feature.get("properties").cloned().unwrap_or(Value::Null);

    let raw_category = properties.get("tipo").and_then(Value::as_str).unwrap_or("");
    let category = AnomalyCategory::parse(raw_category);
    if !category.is_known() {
        flags.push(ValidationFlag::UnknownCategory {
            feature: index,
            value: raw_category.to_string(),
        });
    }

    let score = match properties.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let parsed = parse_score_text(s);
            if parsed.is_some() {
                flags.push(ValidationFlag::ScoreCoerced {
                    feature: index,
                    raw: s.clone(),
                });
            }
            parsed
        }
        _ => None,
    };
    let score = match score {
        Some(s) if (0.0..=1.0).contains(&s) => s,
        Some(s) => {
            flags.push(ValidationFlag::ScoreClamped {
                feature: index,
                original: s,
            });
            s.clamp(0.0, 1.0)
        }
        None => {
            flags.push(ValidationFlag::ScoreMissing { feature: index });
            0.0
        }
    };

    let justification = properties
        .get("justificacion")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if justification.is_empty() {
        flags.push(ValidationFlag::MissingJustification { feature: index });
    }

    Ok(Anomaly {
        lon,
        lat,
        category,
        score,
        justification,
    })
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Leading number of a score string; a trailing `%` scales it by 1/100
fn parse_score_text(text: &str) -> Option<f64> {
    static SCORE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = SCORE
        .get_or_init(|| Regex::new(r"^\s*([-+]?\d+(?:\.\d+)?|[-+]?\.\d+)\s*(%)?").ok())
        .as_ref()?;
    let caps = re.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(if caps.get(2).is_some() { value / 100.0 } else { value })
}
