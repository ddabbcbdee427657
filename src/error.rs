use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use crate::dem::{BoundingBox, Window};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{MapError, Stage};

    #[test]
    fn empty_grid_reports_the_range_before_masking() {
        let e = MapError::EmptyGrid {
            width: 20,
            height: 20,
            range: Some((350.0, 350.0)),
            no_data: None,
            floor: -100.0,
            min_elevation: 400.0,
        };
        let message = e.to_string();
        assert!(message.starts_with("[render]"), "{}", message);
        assert!(message.contains("elevation range 350 m - 350 m"), "{}", message);
        assert!(message.contains("min elevation 400 m"), "{}", message);
    }

    #[test]
    fn write_errors_name_their_stage() {
        let e = MapError::Write {
            stage: Stage::Extract,
            path: PathBuf::from("/out/region.tif"),
            reason: "disk full".to_string(),
        };
        assert_eq!(e.to_string(), "[extract] could not write /out/region.tif: disk full");
    }
}

/// Everything that can make one of the two stages fail. Every error is fatal
/// for the stage that raised it, there is no recovery inside the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    #[error("[extract] cannot reproject from {from} to {to}: {reason}")]
    Reprojection {
        from: String,
        to: String,
        reason: String,
    },

    #[error(
        "[extract] requested window {window} (bbox {bbox}) lies outside the raster extent of {raster_width}x{raster_height} pixels"
    )]
    OutOfBounds {
        window: Window,
        bbox: BoundingBox,
        raster_width: usize,
        raster_height: usize,
    },

    #[error(
        "[render] no valid elevation left in {width}x{height} grid after masking (elevation range {}, no-data {no_data:?}, floor {floor} m, min elevation {min_elevation} m)",
        describe_range(.range)
    )]
    EmptyGrid {
        width: usize,
        height: usize,
        /// range of the valid cells before masking
        range: Option<(f32, f32)>,
        no_data: Option<f32>,
        floor: f32,
        min_elevation: f32,
    },

    #[error("[extract] reading {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("[{}] could not write {}: {}", .stage, .path.display(), .reason)]
    Write {
        stage: Stage,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    #[error("[render] contour generation failed: {0}")]
    Contour(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
}

pub type Result<T> = std::result::Result<T, MapError>;

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Render,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Render => write!(f, "render"),
        }
    }
}

fn describe_range(range: &Option<(f32, f32)>) -> String {
    match range {
        Some((min, max)) => format!("{} m - {} m", min, max),
        None => "empty".to_string(),
    }
}

impl From<reqwest::Error> for MapError {
    fn from(e: reqwest::Error) -> Self {
        MapError::Transport {
            url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            reason: e.to_string(),
        }
    }
}
