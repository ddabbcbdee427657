use std::fmt::{Display, Formatter};

use crate::dem::GeoTransform;
use crate::error::{MapError, Result};


/// Axis aligned rectangle in planar coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Square of side `2 * buffer` centered on `(x, y)`.
    pub fn around(x: f64, y: f64, buffer: f64) -> Self {
        BoundingBox {
            min_x: x - buffer,
            min_y: y - buffer,
            max_x: x + buffer,
            max_y: y + buffer,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.max_y),
            (self.max_x, self.max_y),
            (self.max_x, self.min_y),
            (self.min_x, self.min_y),
        ]
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.1}, {:.1}, {:.1}, {:.1}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Pixel space rectangle. Offsets are signed because a window derived from
/// planar bounds may start before the raster; `clip_to` turns it into a
/// readable one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub col_off: i64,
    pub row_off: i64,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Window {
            col_off: col_off as i64,
            row_off: row_off as i64,
            width,
            height,
        }
    }

    /// Smallest whole-pixel window containing `bbox`. All four corners go
    /// through the inverse transform, so rotated and sheared rasters work too.
    pub fn from_bounds(bbox: &BoundingBox, transform: &GeoTransform) -> Result<Self> {
        let inverse = transform.inverse().ok_or_else(|| {
            MapError::InvalidRaster(format!("geo transform {} is not invertible", transform))
        })?;

        let pixels: Vec<(f64, f64)> = bbox
            .corners()
            .iter()
            .map(|(x, y)| inverse.apply(*x, *y))
            .collect();

        let min_col = pixels.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let max_col = pixels.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let min_row = pixels.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_row = pixels.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

        // absorb floating point noise before rounding outwards
        let snap = |v: f64| if (v - v.round()).abs() < 1e-6 { v.round() } else { v };

        let col_start = snap(min_col).floor();
        let row_start = snap(min_row).floor();
        let col_end = snap(max_col).ceil();
        let row_end = snap(max_row).ceil();

        Ok(Window {
            col_off: col_start as i64,
            row_off: row_start as i64,
            width: (col_end - col_start).max(0.0) as usize,
            height: (row_end - row_start).max(0.0) as usize,
        })
    }

    pub fn col_end(&self) -> i64 {
        self.col_off + self.width as i64
    }

    pub fn row_end(&self) -> i64 {
        self.row_off + self.height as i64
    }

    /// Intersection with `[0, raster_width) x [0, raster_height)`.
    pub fn clip_to(&self, raster_width: usize, raster_height: usize, bbox: &BoundingBox) -> Result<Window> {
        let col_start = self.col_off.max(0);
        let row_start = self.row_off.max(0);
        let col_end = self.col_end().min(raster_width as i64);
        let row_end = self.row_end().min(raster_height as i64);

        if col_end <= col_start || row_end <= row_start {
            return Err(MapError::OutOfBounds {
                window: *self,
                bbox: *bbox,
                raster_width,
                raster_height,
            });
        }

        let clipped = Window {
            col_off: col_start,
            row_off: row_start,
            width: (col_end - col_start) as usize,
            height: (row_end - row_start) as usize,
        };

        if clipped != *self {
            tracing::warn!(
                requested = %self,
                clipped = %clipped,
                "window extends past the raster, clipping"
            );
        }

        Ok(clipped)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn col_start(&self) -> usize {
        self.col_off.max(0) as usize
    }

    pub fn row_start(&self) -> usize {
        self.row_off.max(0) as usize
    }
}

impl Display for Window {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} px at col {}, row {}",
            self.width, self.height, self.col_off, self.row_off
        )
    }
}
