use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::dem::ElevationGrid;


const NEIGHBOUR_CELLS: [(i64, i64); 8] = [(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, -1), (1, 0), (1, 1)];

/// An accepted summit, at the center of its cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub x: f64,
    pub y: f64,
    pub elevation: f32,
    pub col: usize,
    pub row: usize,
}

/// Order in which candidates compete for a spot. Both are deterministic;
/// the first candidate of a cluster wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeakOrder {
    /// highest first, scan order among equal elevations
    ElevationDescending,
    /// row by row, left to right
    ScanOrder,
}

impl Default for PeakOrder {
    fn default() -> Self {
        PeakOrder::ElevationDescending
    }
}

/// Local maxima of the 8-neighbourhood that lie within `max_drop` of the
/// highest cell, thinned so no two are closer than `min_separation`.
pub fn find_peaks(grid: &ElevationGrid, max_drop: f32, min_separation: f64, order: PeakOrder) -> Vec<Peak> {
    let max = match grid.elevation_range() {
        Some((_, max)) => max,
        None => return Vec::new(),
    };

    let candidates = local_maxima(grid)
        .into_iter()
        .filter(|p| p.elevation > max - max_drop)
        .collect::<Vec<_>>();

    let accepted = deduplicate(candidates, min_separation, order);
    tracing::debug!(peaks = accepted.len(), "accepted peaks");
    accepted
}

/// Greedily accepts candidates in `order`, skipping any closer than
/// `min_separation` to one already accepted.
fn deduplicate(mut candidates: Vec<Peak>, min_separation: f64, order: PeakOrder) -> Vec<Peak> {
    if order == PeakOrder::ElevationDescending {
        // stable, so equal elevations keep their scan order
        candidates.sort_by(|a, b| b.elevation.partial_cmp(&a.elevation).unwrap_or(Ordering::Equal));
    }

    let mut accepted: Vec<Peak> = Vec::new();
    for candidate in candidates {
        let too_close = accepted
            .iter()
            .any(|p| (p.x - candidate.x).hypot(p.y - candidate.y) < min_separation);
        if !too_close {
            accepted.push(candidate);
        }
    }
    accepted
}

/// Valid cells at least as high as every valid neighbour, in scan order.
fn local_maxima(grid: &ElevationGrid) -> Vec<Peak> {
    let (w, h) = grid.dimensions();
    let mut maxima = Vec::new();

    for row in 0..h {
        for col in 0..w {
            let elev = match grid.get(col, row) {
                Some(z) => z,
                None => continue,
            };

            let has_higher_neighbour = NEIGHBOUR_CELLS.iter().any(|(dx, dy)| {
                let c = col as i64 + dx;
                let r = row as i64 + dy;
                if c < 0 || r < 0 || c >= w as i64 || r >= h as i64 {
                    return false;
                }
                grid.get(c as usize, r as usize).map_or(false, |z| z > elev)
            });

            if !has_higher_neighbour {
                let (x, y) = grid.position(col, row);
                maxima.push(Peak {
                    x,
                    y,
                    elevation: elev,
                    col,
                    row,
                });
            }
        }
    }

    maxima
}
