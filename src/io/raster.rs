use crate::io::artifact::StagedFile;
use crate::types::{GeoTransform, LidarError, LidarResult, Raster};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Single-band GeoTIFF reader/writer
pub struct RasterIo;

impl RasterIo {
    /// Read band 1 of any GDAL-readable raster as `f32`
    pub fn read<P: AsRef<Path>>(path: P) -> LidarResult<Raster> {
        let path = path.as_ref();
        log::info!("Reading raster from: {}", path.display());

        let dataset = Dataset::open(path)?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("Raster size: {}x{}", width, height);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        if width == 0 || height == 0 {
            return Err(LidarError::InvalidFormat(format!(
                "raster {} has no pixels",
                path.display()
            )));
        }

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let data = Array2::from_shape_vec((height, width), band_data.data).map_err(|e| {
            LidarError::Processing(format!("Failed to reshape raster data: {}", e))
        })?;

        let mut raster = Raster::new(data, GeoTransform::from_gdal(geo_transform), dataset.projection());
        raster.no_data = no_data;
        Ok(raster)
    }

    /// Write a `f32` GeoTIFF; nothing appears at `output_path` unless the
    /// whole dataset was written and closed
    pub fn write<P: AsRef<Path>>(raster: &Raster, output_path: P) -> LidarResult<PathBuf> {
        let output_path = output_path.as_ref();
        log::info!("Saving raster as GeoTIFF: {}", output_path.display());

        let staged = StagedFile::new(output_path)?;
        {
            let driver = DriverManager::get_driver_by_name("GTiff")?;
            let (height, width) = raster.dim();

            let mut dataset = driver.create_with_band_type::<f32, _>(
                staged.path(),
                width as isize,
                height as isize,
                1,
            )?;
            dataset.set_geo_transform(&raster.geo_transform.to_gdal())?;
            if !raster.projection.is_empty() {
                dataset.set_projection(&raster.projection)?;
            }

            let mut rasterband = dataset.rasterband(1)?;
            let flat_data: Vec<f32> = raster.data.iter().cloned().collect();
            let buffer = Buffer::new((width, height), flat_data);
            rasterband.write((0, 0), (width, height), &buffer)?;
            if let Some(no_data) = raster.no_data {
                rasterband.set_no_data_value(Some(no_data))?;
            }
            // Dataset is flushed and closed here, before the rename.
        }

        staged.commit()
    }
}
