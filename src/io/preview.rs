//! 8-bit grayscale previews of elevation and derivative rasters

use crate::io::artifact::write_atomic;
use crate::io::raster::RasterIo;
use crate::types::{LidarError, LidarResult, Raster};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::path::Path;

/// Value window mapped linearly onto 0..=255
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewRange {
    pub min: f64,
    pub max: f64,
}

impl PreviewRange {
    /// Terrain elevation in meters
    pub const TERRAIN: PreviewRange = PreviewRange { min: 0.0, max: 300.0 };
    pub const HILLSHADE: PreviewRange = PreviewRange { min: 0.0, max: 255.0 };
    pub const SKY_VIEW_FACTOR: PreviewRange = PreviewRange { min: 0.5, max: 1.0 };

    pub fn new(min: f64, max: f64) -> LidarResult<Self> {
        if !(min.is_finite() && max.is_finite()) || max <= min {
            return Err(LidarError::Config(format!(
                "preview range must satisfy min < max, got [{}, {}]",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    /// Map one value into the 8-bit range, clipping outside the window
    pub fn rescale(&self, value: f64) -> u8 {
        let scaled = (value - self.min) / (self.max - self.min) * 255.0;
        scaled.clamp(0.0, 255.0) as u8
    }
}

impl Default for PreviewRange {
    fn default() -> Self {
        Self::TERRAIN
    }
}

/// Encoded preview image
#[derive(Debug, Clone)]
pub struct Preview {
    pub width: u32,
    pub height: u32,
    /// PNG bytes
    pub png: Vec<u8>,
}

impl Preview {
    pub const MIME_TYPE: &'static str = "image/png";

    pub fn save<P: AsRef<Path>>(&self, path: P) -> LidarResult<()> {
        write_atomic(path.as_ref(), &self.png)?;
        log::info!("✓ Created preview: {}", path.as_ref().display());
        Ok(())
    }
}

/// Row-major 8-bit pixels; no-data cells render black
pub fn rescale_to_u8(raster: &Raster, range: PreviewRange) -> Vec<u8> {
    raster
        .data
        .iter()
        .map(|&v| if raster.is_no_data(v) { 0 } else { range.rescale(v as f64) })
        .collect()
}

/// Encode grayscale pixels as PNG
pub fn encode_png(pixels: &[u8], width: u32, height: u32) -> LidarResult<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new(&mut buf);
    encoder.write_image(pixels, width, height, ExtendedColorType::L8)?;
    Ok(buf)
}

/// Render an in-memory raster
pub fn render_raster(raster: &Raster, range: PreviewRange) -> LidarResult<Preview> {
    let (rows, cols) = raster.dim();
    let width = u32::try_from(cols)
        .map_err(|_| LidarError::InvalidFormat(format!("raster too wide for a preview: {}", cols)))?;
    let height = u32::try_from(rows)
        .map_err(|_| LidarError::InvalidFormat(format!("raster too tall for a preview: {}", rows)))?;

    let pixels = rescale_to_u8(raster, range);
    let png = encode_png(&pixels, width, height)?;
    Ok(Preview { width, height, png })
}

/// Read the raster at `path` and render it
pub fn render_preview<P: AsRef<Path>>(path: P, range: PreviewRange) -> LidarResult<Preview> {
    let raster = RasterIo::read(path.as_ref())?;
    render_raster(&raster, range)
}
