use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ExtractConfig;
use crate::dem::{write_geotiff, BoundingBox, RasterSource, Window};
use crate::error::{MapError, Result, Stage};
use crate::projection::{Crs, GeoPoint, PlanarPoint, GEODETIC_EPSG};

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::extract;
    use crate::config::ExtractConfig;
    use crate::dem::{write_geotiff, GeoTiffSource, GeoTransform, RasterSource};
    use crate::error::MapError;
    use crate::projection::GeoPoint;
    use crate::test::{ramp_grid, with_temp_dir};
    use crate::utils::partial_path;

    const JAY_PEAK: GeoPoint = GeoPoint {
        lat: 44.924384,
        lon: -72.511729,
    };

    /// 200 x 200 cells of 10 m around Jay Peak in Vermont state plane.
    fn vermont_raster(dir: &Path, epsg: Option<u16>) -> GeoTiffSource<std::io::BufReader<std::fs::File>> {
        let grid = ramp_grid(200, 200, GeoTransform::north_up(498_300.0, 270_400.0, 10.0), Some(-9999.0));
        let path = dir.join("source.tif");
        write_geotiff(&path, &grid, epsg).unwrap();
        GeoTiffSource::open(&path).unwrap()
    }

    fn config(buffer: f64) -> ExtractConfig {
        ExtractConfig {
            buffer,
            ..ExtractConfig::default()
        }
    }

    #[test]
    fn window_inside_the_raster_has_the_requested_size() {
        with_temp_dir(|dir| {
            let mut source = vermont_raster(dir, Some(32145));
            let output = dir.join("region.tif");
            let report = extract(&mut source, JAY_PEAK, &config(500.0), &output).unwrap();

            // 1000 m at 10 m per cell, plus at most one cell of outward rounding
            assert!(report.window.width == 100 || report.window.width == 101);
            assert_eq!(report.window.width, report.window.height);
            assert_eq!(report.crs.epsg(), 32145);
            assert!(!report.clipped);

            let mut region = GeoTiffSource::open(&output).unwrap();
            let meta = region.metadata().clone();
            assert_eq!((meta.width, meta.height), (report.window.width, report.window.height));
            assert_eq!(meta.epsg, Some(32145));
            assert_eq!(meta.no_data, Some(-9999.0));
            assert_eq!(
                meta.transform,
                source.metadata().transform.translated(report.window.col_start(), report.window.row_start())
            );
            assert_eq!(report.bytes, std::fs::metadata(&output).unwrap().len());

            // the region starts with the source cell at the window origin
            let first = region.read_window(&crate::dem::Window::new(0, 0, 1, 1)).unwrap();
            let expected = (report.window.col_start() + 1000 * report.window.row_start()) as f32;
            assert_eq!(first.z(0, 0), expected);

            // outward rounding moves the centre by at most a cell
            assert!((report.center.lat - JAY_PEAK.lat).abs() < 1e-4, "{}", report.center);
            assert!((report.center.lon - JAY_PEAK.lon).abs() < 1e-4, "{}", report.center);
        });
    }

    #[test]
    fn out_of_bounds_request_writes_nothing() {
        with_temp_dir(|dir| {
            let mut source = vermont_raster(dir, Some(32145));
            let output = dir.join("region.tif");
            let far_away = GeoPoint { lat: 44.0, lon: -72.5 };

            let res = extract(&mut source, far_away, &config(500.0), &output);
            assert!(matches!(res, Err(MapError::OutOfBounds { .. })));
            assert!(!output.exists());
            assert!(!partial_path(&output).exists());
        });
    }

    #[test]
    fn window_over_the_edge_is_clipped() {
        with_temp_dir(|dir| {
            let mut source = vermont_raster(dir, Some(32145));
            let output = dir.join("region.tif");
            let report = extract(&mut source, JAY_PEAK, &config(1500.0), &output).unwrap();

            assert!(report.clipped);
            assert!(report.window.width <= 200 && report.window.height <= 200);
            assert!(output.is_file());
        });
    }

    #[test]
    fn raster_without_reference_system_needs_an_override() {
        with_temp_dir(|dir| {
            let mut source = vermont_raster(dir, None);
            let output = dir.join("region.tif");

            let res = extract(&mut source, JAY_PEAK, &config(500.0), &output);
            assert!(matches!(res, Err(MapError::Reprojection { .. })));

            let overridden = ExtractConfig {
                crs: Some("EPSG:32145".to_string()),
                ..config(500.0)
            };
            let report = extract(&mut source, JAY_PEAK, &overridden, &output).unwrap();
            assert_eq!(report.crs.epsg(), 32145);
        });
    }

    #[test]
    fn geographic_raster_is_rejected() {
        with_temp_dir(|dir| {
            let mut source = vermont_raster(dir, Some(4326));
            let res = extract(&mut source, JAY_PEAK, &config(500.0), &dir.join("region.tif"));
            assert!(matches!(res, Err(MapError::Reprojection { .. })));
        });
    }
}

/// What an extraction did, for progress output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractReport {
    pub crs: Crs,
    pub planar: PlanarPoint,
    /// centre of the extracted window, back in latitude and longitude
    pub center: GeoPoint,
    pub bbox: BoundingBox,
    pub window: Window,
    /// whether the window had to be cut down to the raster
    pub clipped: bool,
    pub elevation_range: Option<(f32, f32)>,
    /// size of the written file
    pub bytes: u64,
    pub path: PathBuf,
}

impl ExtractReport {
    /// Size of the raw float32 samples read from the source.
    pub fn raw_bytes(&self) -> usize {
        self.window.pixel_count() * std::mem::size_of::<f32>()
    }
}

/// Reference system the point is projected into: the explicit override, or
/// whatever the raster declares.
pub fn source_crs(source: &dyn RasterSource, config: &ExtractConfig) -> Result<Crs> {
    match (&config.crs, source.metadata().epsg) {
        (Some(identifier), _) => identifier.parse(),
        (None, Some(epsg)) => Crs::from_epsg(epsg),
        (None, None) => Err(MapError::Reprojection {
            from: format!("EPSG:{}", GEODETIC_EPSG),
            to: source.location().to_string(),
            reason: "the raster declares no reference system, pass one explicitly".to_string(),
        }),
    }
}

/// Cuts the square of side `2 * buffer` around `poi` out of `source` and
/// stores it at `output` as a self-contained BigTIFF.
pub fn extract(
    source: &mut dyn RasterSource,
    poi: GeoPoint,
    config: &ExtractConfig,
    output: &Path,
) -> Result<ExtractReport> {
    let crs = source_crs(source, config)?;
    let planar = crs.project(&poi)?;
    tracing::debug!(%poi, x = planar.x, y = planar.y, crs = %crs, "projected point of interest");

    let meta = source.metadata().clone();
    let bbox = BoundingBox::around(planar.x, planar.y, config.buffer);
    let requested = Window::from_bounds(&bbox, &meta.transform)?;
    let window = requested.clip_to(meta.width, meta.height, &bbox)?;

    let grid = source.read_window(&window)?;
    let (x, y) = meta.transform.apply(
        window.col_start() as f64 + window.width as f64 / 2.0,
        window.row_start() as f64 + window.height as f64 / 2.0,
    );
    let center = crs.unproject(&PlanarPoint { x, y })?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MapError::Write {
            stage: Stage::Extract,
            path: output.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    let bytes = write_geotiff(output, &grid, Some(crs.epsg()))?;

    Ok(ExtractReport {
        crs,
        planar,
        center,
        bbox,
        window,
        clipped: window != requested,
        elevation_range: grid.elevation_range(),
        bytes,
        path: output.to_path_buf(),
    })
}
