//! Remote LiDAR tile index
//!
//! The index is any vector dataset OGR can open (the PNOA index is a zipped
//! shapefile served over HTTP). Each feature carries a download URL, a tile
//! identifier and a footprint polygon. Entries keep the WGS84 envelope of the
//! footprint; AOI selection tests the reprojected polygon itself, with the
//! envelope only as a prefilter.

use crate::config::IndexConfig;
use crate::types::{BoundingBox, LidarError, LidarResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;

/// One row of the tile index
#[derive(Debug, Clone, PartialEq)]
pub struct TileIndexEntry {
    pub url: String,
    pub tile_id: String,
    /// Geographic envelope of the tile footprint
    pub footprint: BoundingBox,
}

/// Source of tile index entries, in the order the index lists them
pub trait TileIndexSource: Send + Sync {
    fn load(&self) -> LidarResult<Vec<TileIndexEntry>>;

    /// Entries whose footprint intersects `aoi`, in index order.
    ///
    /// No re-sorting is applied, so a download cap keeps the first entries
    /// the index lists. The default tests the stored envelopes.
    fn intersecting(&self, aoi: &BoundingBox) -> LidarResult<Vec<TileIndexEntry>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|e| e.footprint.intersects(aoi))
            .collect())
    }
}

/// Tile index read through GDAL/OGR
#[derive(Debug, Clone)]
pub struct VectorTileIndex {
    config: IndexConfig,
}

impl VectorTileIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    fn wgs84() -> LidarResult<SpatialRef> {
        let srs = SpatialRef::from_epsg(4326)?;
        // Keep (lon, lat) order regardless of the EPSG axis definition.
        srs.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        Ok(srs)
    }

    fn aoi_polygon(aoi: &BoundingBox) -> LidarResult<Geometry> {
        let wkt = format!(
            "POLYGON (({w} {s}, {e} {s}, {e} {n}, {w} {n}, {w} {s}))",
            w = aoi.min_lon,
            s = aoi.min_lat,
            e = aoi.max_lon,
            n = aoi.max_lat
        );
        Ok(Geometry::from_wkt(&wkt)?)
    }

    /// Read the index, keeping only footprints that meet `aoi` when given
    fn read_entries(&self, aoi: Option<&BoundingBox>) -> LidarResult<Vec<TileIndexEntry>> {
        let dataset = Dataset::open(&self.config.url)?;
        let mut layer = dataset.layer(0)?;

        let transform = match layer.spatial_ref() {
            Some(source) => {
                source.set_axis_mapping_strategy(
                    gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
                );
                Some(CoordTransform::new(&source, &Self::wgs84()?)?)
            }
            None => {
                log::warn!("Tile index has no spatial reference, assuming WGS84");
                None
            }
        };
        let aoi_polygon = aoi.map(Self::aoi_polygon).transpose()?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;

        for feature in layer.features() {
            let url = feature.field_as_string_by_name(&self.config.url_field)?;
            let tile_id = feature.field_as_string_by_name(&self.config.id_field)?;
            let (url, tile_id) = match (url, tile_id) {
                (Some(u), Some(id)) if !u.trim().is_empty() && !id.trim().is_empty() => (u, id),
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            let geometry = match feature.geometry() {
                Some(g) => g,
                None => {
                    skipped += 1;
                    continue;
                }
            };
            let reprojected;
            let footprint = match &transform {
                Some(ct) => {
                    reprojected = geometry.transform(ct)?;
                    &reprojected
                }
                None => geometry,
            };
            let envelope = footprint.envelope();
            let bounds = BoundingBox {
                min_lon: envelope.MinX,
                max_lon: envelope.MaxX,
                min_lat: envelope.MinY,
                max_lat: envelope.MaxY,
            };

            if let (Some(aoi), Some(polygon)) = (aoi, &aoi_polygon) {
                if !bounds.intersects(aoi) || !footprint.intersects(polygon) {
                    continue;
                }
            }

            entries.push(TileIndexEntry {
                url: url.trim().to_string(),
                tile_id: tile_id.trim().to_string(),
                footprint: bounds,
            });
        }

        if skipped > 0 {
            log::warn!(
                "Skipped {} index features without {}/{} or geometry",
                skipped,
                self.config.url_field,
                self.config.id_field
            );
        }
        Ok(entries)
    }

    fn unavailable(&self, e: LidarError) -> LidarError {
        LidarError::IndexUnavailable(format!("{}: {}", self.config.url, e))
    }
}

impl TileIndexSource for VectorTileIndex {
    fn load(&self) -> LidarResult<Vec<TileIndexEntry>> {
        log::info!("Reading tile index: {}", self.config.url);
        let entries = self.read_entries(None).map_err(|e| self.unavailable(e))?;
        log::info!("Tile index lists {} tiles", entries.len());
        Ok(entries)
    }

    fn intersecting(&self, aoi: &BoundingBox) -> LidarResult<Vec<TileIndexEntry>> {
        log::info!("Reading tile index: {}", self.config.url);
        let entries = self.read_entries(Some(aoi)).map_err(|e| self.unavailable(e))?;
        log::info!("{} index footprints intersect the AOI", entries.len());
        Ok(entries)
    }
}

/// Fixed in-memory index
#[derive(Debug, Clone, Default)]
pub struct StaticTileIndex {
    entries: Vec<TileIndexEntry>,
}

impl StaticTileIndex {
    pub fn new(entries: Vec<TileIndexEntry>) -> Self {
        Self { entries }
    }
}

impl TileIndexSource for StaticTileIndex {
    fn load(&self) -> LidarResult<Vec<TileIndexEntry>> {
        Ok(self.entries.clone())
    }
}
