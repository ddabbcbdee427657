use contour::ContourBuilder;
use geojson::Value;

use crate::dem::ElevationGrid;
use crate::error::{MapError, Result};


/// Contour levels split into the line families the map draws.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContourLevels {
    /// ascending
    pub levels: Vec<f32>,
    /// every third level, starting with the lowest
    pub major: Vec<f32>,
    pub minor: Vec<f32>,
    /// the highest level, drawn on top of everything else
    pub top: Option<f32>,
}

impl ContourLevels {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Multiples of `interval` between `min` and `max` (both inclusive) that are
/// at least `min_contour`.
pub fn contour_levels(min: f32, max: f32, interval: f32, min_contour: f32) -> ContourLevels {
    let first = (min / interval).ceil() as i64;
    let last = (max / interval).floor() as i64;

    // stepping on integers keeps levels exact multiples of the interval
    let levels: Vec<f32> = (first..=last)
        .map(|k| k as f32 * interval)
        .filter(|level| *level >= min_contour)
        .collect();

    let (major, minor): (Vec<_>, Vec<_>) = levels.iter().enumerate().partition(|(i, _)| i % 3 == 0);

    ContourLevels {
        top: levels.last().copied(),
        major: major.into_iter().map(|(_, l)| *l).collect(),
        minor: minor.into_iter().map(|(_, l)| *l).collect(),
        levels,
    }
}

/// A drawable piece of a contour, in fractional (column, row) cell center
/// coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Isoline {
    pub level: f32,
    pub points: Vec<(f64, f64)>,
    pub closed: bool,
}

/// Traces every level and keeps only the pieces that run between valid
/// cells. Invalid cells are pulled `interval` below the lowest valid value
/// before tracing, so rings close around them, and those closing edges are
/// dropped afterwards along with the edges on the grid border.
pub fn isolines(grid: &ElevationGrid, levels: &[f32], interval: f32) -> Result<Vec<Isoline>> {
    let (min, _) = match grid.elevation_range() {
        Some(range) => range,
        None => return Ok(Vec::new()),
    };
    if levels.is_empty() {
        return Ok(Vec::new());
    }

    let sink = (min - interval.abs().max(1.0)) as f64;
    let values: Vec<f64> = grid
        .values()
        .iter()
        .zip(grid.validity())
        .map(|(&z, &ok)| if ok { z as f64 } else { sink })
        .collect();
    let thresholds: Vec<f64> = levels.iter().map(|l| *l as f64).collect();

    let (width, height) = grid.dimensions();
    let builder = ContourBuilder::new(width as u32, height as u32, true);
    let features = builder
        .contours(&values, &thresholds)
        .map_err(|e| MapError::Contour(e.to_string()))?;

    let mut lines = Vec::new();
    for (feature, level) in features.iter().zip(levels) {
        let polygons = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::MultiPolygon(polygons)) => polygons,
            _ => continue,
        };

        for ring in polygons.iter().flatten() {
            // ring coordinates put cell (c, r) at (c + 0.5, r + 0.5)
            let points: Vec<(f64, f64)> = ring
                .iter()
                .filter(|p| p.len() >= 2)
                .map(|p| (p[0] - 0.5, p[1] - 0.5))
                .collect();
            split_ring(grid, *level, &points, &mut lines);
        }
    }

    Ok(lines)
}

/// Whether the edge from `p` to `q` lies between valid cells only.
fn edge_is_drawable(grid: &ElevationGrid, p: (f64, f64), q: (f64, f64)) -> bool {
    let mid = ((p.0 + q.0) / 2.0, (p.1 + q.1) / 2.0);
    let (width, height) = grid.dimensions();

    let cols = [mid.0.floor(), mid.0.ceil()];
    let rows = [mid.1.floor(), mid.1.ceil()];
    cols.iter().all(|&c| {
        rows.iter().all(|&r| {
            c >= 0.0
                && r >= 0.0
                && (c as usize) < width
                && (r as usize) < height
                && grid.is_valid(c as usize, r as usize)
        })
    })
}

fn split_ring(grid: &ElevationGrid, level: f32, ring: &[(f64, f64)], lines: &mut Vec<Isoline>) {
    if ring.len() < 2 {
        return;
    }

    let edges = ring.len() - 1;
    let drawable: Vec<bool> = (0..edges)
        .map(|i| edge_is_drawable(grid, ring[i], ring[i + 1]))
        .collect();

    if drawable.iter().all(|d| *d) {
        lines.push(Isoline {
            level,
            points: ring.to_vec(),
            closed: true,
        });
        return;
    }

    // start right after a gap so runs never wrap around the ring's end
    let start = match drawable.iter().position(|d| !d) {
        Some(gap) => gap + 1,
        None => 0,
    };

    let mut run: Vec<(f64, f64)> = Vec::new();
    for step in 0..edges {
        let i = (start + step) % edges;
        if drawable[i] {
            if run.is_empty() {
                run.push(ring[i]);
            }
            run.push(ring[i + 1]);
        } else if run.len() >= 2 {
            lines.push(Isoline {
                level,
                points: std::mem::take(&mut run),
                closed: false,
            });
        } else {
            run.clear();
        }
    }

    if run.len() >= 2 {
        lines.push(Isoline {
            level,
            points: run,
            closed: false,
        });
    }
}
