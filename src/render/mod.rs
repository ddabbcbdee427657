//! Map rendering: downsample, mask, classify, contour, find peaks, draw.

mod classify;
mod contours;
mod downsample;
mod draw;
mod mask;
mod peaks;

use std::path::Path;

use image::{DynamicImage, RgbaImage};
use tiny_skia::Pixmap;

use crate::config::RenderConfig;
use crate::dem::{ElevationGrid, GeoTiffSource, RasterMetadata, RasterSource};
use crate::error::{MapError, Result};
use crate::utils::encode_png;

pub use classify::{Classification, ColorClass};
pub use contours::{contour_levels, isolines, ContourLevels, Isoline};
pub use downsample::{downsample, downsample_source};
pub use draw::{draw_map, Scene, Viewport};
pub use mask::{mask, MaskRule};
pub use peaks::{find_peaks, Peak, PeakOrder};

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{render, render_grid};
    use crate::config::{RenderConfig, StyleConfig};
    use crate::dem::write_geotiff;
    use crate::error::MapError;
    use crate::test::{flat_grid, gaussian_peak_grid, with_temp_dir};

    fn config() -> RenderConfig {
        RenderConfig {
            downsample: 1,
            style: StyleConfig {
                width: 300,
                height: 300,
                scale: 1.0,
                ..StyleConfig::default()
            },
            ..RenderConfig::default()
        }
    }

    #[test]
    fn single_gaussian_summit() {
        with_temp_dir(|dir| {
            let grid = gaussian_peak_grid(100, (50.0, 50.0), 1200.0, 15.0, 5, 10.0);
            let input = dir.join("summit.tif");
            write_geotiff(&input, &grid, Some(32145)).unwrap();

            let mut loaded = None;
            let map = render(&input, &config(), |meta, grid| {
                loaded = Some(((meta.width, meta.height), grid.dimensions()));
            })
            .unwrap();

            assert_eq!(loaded, Some(((100, 100), (100, 100))));

            assert_eq!(map.peaks.len(), 1);
            assert_eq!((map.peaks[0].col, map.peaks[0].row), (50, 50));
            assert_eq!(map.levels.levels.len(), 21);
            assert_eq!(map.levels.levels.first(), Some(&600.0));
            assert_eq!(map.levels.top, Some(1200.0));

            let classification = &config().classification;
            assert_eq!(classification.band_of(1200.0), Some(classification.classes().len() - 1));
            assert_eq!(map.elevation_range.1, 1200.0);
            assert_eq!(map.image.width(), 300);
            assert!(map.labels > 0);

            let png = dir.join("summit.png");
            let bytes = map.save_png(&png).unwrap();
            assert_eq!(bytes, fs::metadata(&png).unwrap().len());
        });
    }

    #[test]
    fn grid_entirely_below_min_elevation_is_empty() {
        let grid = flat_grid(20, 20, 350.0);
        let res = render_grid(grid, &config());
        match res {
            Err(MapError::EmptyGrid { min_elevation, range, .. }) => {
                assert_eq!(min_elevation, 400.0);
                assert_eq!(range, Some((350.0, 350.0)));
            }
            other => panic!("expected EmptyGrid, got {:?}", other.map(|m| m.peaks)),
        }
    }

    #[test]
    fn range_without_levels_still_renders() {
        // 400..590 m: no level reaches 600 m
        let grid = gaussian_peak_grid(30, (15.0, 15.0), 590.0, 4.0, 0, 10.0);
        let map = render_grid(grid, &config()).unwrap();
        assert!(map.levels.is_empty());
        assert_eq!(map.labels, 0);
        assert_eq!(map.peaks.len(), 1);
    }

    #[test]
    fn scale_multiplies_the_canvas() {
        let grid = gaussian_peak_grid(30, (15.0, 15.0), 900.0, 4.0, 0, 10.0);
        let mut config = config();
        config.style.width = 120;
        config.style.height = 100;
        config.style.scale = 2.0;
        let map = render_grid(grid, &config).unwrap();
        assert_eq!((map.image.width(), map.image.height()), (240, 200));
    }

    #[test]
    fn missing_input_is_reported() {
        let mut called = false;
        let res = render(std::path::Path::new("/nonexistent/region.tif"), &config(), |_, _| called = true);
        assert!(res.is_err());
        assert!(!called);
    }
}

/// A finished map plus what went into it.
pub struct RenderedMap {
    pub image: Pixmap,
    pub elevation_range: (f32, f32),
    pub levels: ContourLevels,
    pub peaks: Vec<Peak>,
    pub labels: usize,
}

impl RenderedMap {
    pub fn to_image(&self) -> Result<DynamicImage> {
        let bytes: Vec<u8> = self
            .image
            .pixels()
            .iter()
            .flat_map(|p| {
                let c = p.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect();

        RgbaImage::from_raw(self.image.width(), self.image.height(), bytes)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| MapError::InvalidRaster("canvas size does not match its pixels".to_string()))
    }

    /// Writes the map as PNG, returns the file size.
    pub fn save_png(&self, path: &Path) -> Result<u64> {
        encode_png(path, &self.to_image()?)
    }
}

/// Renders the raster at `path`, reading it band by band. `loaded` sees the
/// source metadata and the downsampled grid before rendering starts.
pub fn render<F>(path: &Path, config: &RenderConfig, loaded: F) -> Result<RenderedMap>
where
    F: FnOnce(&RasterMetadata, &ElevationGrid),
{
    let mut source = GeoTiffSource::open(path)?;
    let grid = downsample_source(&mut source, config.downsample)?;
    loaded(source.metadata(), &grid);
    render_grid(grid, config)
}

/// Everything after loading: mask, classify, contour, find peaks, draw.
pub fn render_grid(grid: ElevationGrid, config: &RenderConfig) -> Result<RenderedMap> {
    let before = grid.elevation_range();
    let rule = MaskRule::new(grid.no_data(), config.min_elevation);
    let masked = mask(&grid, &rule);

    let (min, max) = masked.elevation_range().ok_or(MapError::EmptyGrid {
        width: masked.width(),
        height: masked.height(),
        range: before,
        no_data: rule.no_data,
        floor: rule.floor,
        min_elevation: rule.min_elevation,
    })?;
    tracing::info!(
        ?before,
        after = ?(min, max),
        valid = masked.valid_count(),
        "elevation range after masking"
    );

    let levels = contour_levels(min, max, config.contour_interval, config.min_contour);
    let lines = if levels.is_empty() {
        tracing::info!(min, max, "no contour level in range, skipping contours");
        Vec::new()
    } else {
        isolines(&masked, &levels.levels, config.contour_interval)?
    };

    let (major, minor): (Vec<Isoline>, Vec<Isoline>) = lines
        .iter()
        .cloned()
        .partition(|line| levels.major.contains(&line.level));
    let top: Vec<Isoline> = lines
        .into_iter()
        .filter(|line| Some(line.level) == levels.top)
        .collect();

    let peaks = find_peaks(&masked, config.peak_drop, config.peak_separation, config.peak_order);

    let scene = Scene {
        classification: &config.classification,
        max_elevation: max,
        top_margin: config.top_margin,
        minor: &minor,
        major: &major,
        top: &top,
        peaks: &peaks,
    };
    let (image, labels) = draw_map(&masked, &scene, &config.style)?;

    Ok(RenderedMap {
        image,
        elevation_range: (min, max),
        levels,
        peaks,
        labels,
    })
}
