use lidar_prospect::config::IndexConfig;
use lidar_prospect::io::tile_index::{TileIndexSource, VectorTileIndex};
use lidar_prospect::types::BoundingBox;
use std::path::Path;
use tempfile::TempDir;

/// Index in ETRS89 / UTM 30N, the CRS the PNOA index ships in
const UTM_INDEX: &str = r#"{
  "type": "FeatureCollection",
  "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::25830"}},
  "features": [
    {"type": "Feature",
     "properties": {"HOJA": "0001", "URL_DESCARGA": "https://tiles.example/0001.laz"},
     "geometry": {"type": "Polygon", "coordinates": [[[400000, 4071000], [404000, 4071000], [404000, 4075000], [400000, 4075000], [400000, 4071000]]]}},
    {"type": "Feature",
     "properties": {"HOJA": "0002"},
     "geometry": {"type": "Polygon", "coordinates": [[[402000, 4072000], [403000, 4072000], [403000, 4073000], [402000, 4073000], [402000, 4072000]]]}},
    {"type": "Feature",
     "properties": {"HOJA": "0003", "URL_DESCARGA": "https://tiles.example/0003.laz"},
     "geometry": {"type": "Polygon", "coordinates": [[[498000, 4426000], [502000, 4426000], [502000, 4430000], [498000, 4430000], [498000, 4426000]]]}},
    {"type": "Feature",
     "properties": {"HOJA": " 0004 ", "URL_DESCARGA": "https://tiles.example/0004.laz"},
     "geometry": {"type": "Polygon", "coordinates": [[[405000, 4077000], [408000, 4077000], [408000, 4080000], [405000, 4080000], [405000, 4077000]]]}}
  ]
}"#;

/// Geographic index with a diamond whose envelope overlaps the AOI corner
/// while the polygon itself stays clear of it
const DIAMOND_INDEX: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature",
     "properties": {"HOJA": "diamond", "URL_DESCARGA": "https://tiles.example/diamond.laz"},
     "geometry": {"type": "Polygon", "coordinates": [[[-4.01, 36.95], [-3.95, 36.89], [-3.89, 36.95], [-3.95, 37.01], [-4.01, 36.95]]]}},
    {"type": "Feature",
     "properties": {"HOJA": "inside", "URL_DESCARGA": "https://tiles.example/inside.laz"},
     "geometry": {"type": "Polygon", "coordinates": [[[-4.15, 36.75], [-4.05, 36.75], [-4.05, 36.85], [-4.15, 36.85], [-4.15, 36.75]]]}}
  ]
}"#;

fn aoi() -> BoundingBox {
    BoundingBox::from_wsen(-4.2, 36.7, -4.0, 36.9)
}

fn index_at(dir: &Path, name: &str, contents: &str) -> VectorTileIndex {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write index fixture");
    VectorTileIndex::new(IndexConfig {
        url: path.to_string_lossy().to_string(),
        ..IndexConfig::default()
    })
}

fn contains(bbox: &BoundingBox, lon: f64, lat: f64) -> bool {
    bbox.min_lon < lon && lon < bbox.max_lon && bbox.min_lat < lat && lat < bbox.max_lat
}

#[test]
fn test_projected_index_is_read_in_lon_lat() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let index = index_at(dir.path(), "index.geojson", UTM_INDEX);

    let entries = index.load().expect("Failed to read tile index");
    for e in &entries {
        println!("{} {:?}", e.tile_id, e.footprint);
    }

    // 0002 has no download URL and is skipped; the rest keep index order.
    let ids: Vec<&str> = entries.iter().map(|e| e.tile_id.as_str()).collect();
    assert_eq!(ids, vec!["0001", "0003", "0004"]);
    assert_eq!(entries[0].url, "https://tiles.example/0001.laz");

    // (lon, lat) order: a swapped axis would put ~36.8 on the longitude.
    assert!(contains(&entries[0].footprint, -4.1, 36.8));
    assert!(contains(&entries[1].footprint, -3.0, 40.0));
    assert!(contains(&entries[2].footprint, -4.05, 36.85));

    // A 4 km square is about 0.045° wide at this latitude.
    let width = entries[0].footprint.max_lon - entries[0].footprint.min_lon;
    let height = entries[0].footprint.max_lat - entries[0].footprint.min_lat;
    assert!(width > 0.04 && width < 0.05, "width {}", width);
    assert!(height > 0.03 && height < 0.04, "height {}", height);
}

#[test]
fn test_projected_index_selection() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let index = index_at(dir.path(), "index.geojson", UTM_INDEX);

    let hits = index.intersecting(&aoi()).expect("Failed to query tile index");
    let ids: Vec<&str> = hits.iter().map(|e| e.tile_id.as_str()).collect();
    assert_eq!(ids, vec!["0001", "0004"]);
}

#[test]
fn test_selection_uses_footprint_not_envelope() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let index = index_at(dir.path(), "diamond.geojson", DIAMOND_INDEX);

    let all = index.load().expect("Failed to read tile index");
    assert_eq!(all.len(), 2);
    assert!(all[0].footprint.intersects(&aoi()));

    let hits = index.intersecting(&aoi()).expect("Failed to query tile index");
    let ids: Vec<&str> = hits.iter().map(|e| e.tile_id.as_str()).collect();
    assert_eq!(ids, vec!["inside"]);
}
