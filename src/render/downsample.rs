use crate::dem::{ElevationGrid, RasterSource, Window};
use crate::error::{MapError, Result};


/// Block average: every output cell is the mean of the valid cells of a
/// `factor x factor` block, or invalid if the block has none. Rows and
/// columns that do not fill a whole block are dropped.
pub fn downsample(grid: &ElevationGrid, factor: usize) -> Result<ElevationGrid> {
    if factor == 0 {
        return Err(MapError::Config("downsample factor must be at least 1".to_string()));
    }

    let (width, height) = grid.dimensions();
    let out_width = width / factor;
    let out_height = height / factor;
    let fill = grid.no_data().unwrap_or(f32::NAN);

    let mut values = Vec::with_capacity(out_width * out_height);
    let mut valid = Vec::with_capacity(out_width * out_height);

    for out_row in 0..out_height {
        for out_col in 0..out_width {
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for row in out_row * factor..(out_row + 1) * factor {
                for col in out_col * factor..(out_col + 1) * factor {
                    if let Some(z) = grid.get(col, row) {
                        sum += z as f64;
                        count += 1;
                    }
                }
            }

            if count > 0 {
                values.push((sum / count as f64) as f32);
                valid.push(true);
            } else {
                values.push(fill);
                valid.push(false);
            }
        }
    }

    ElevationGrid::new(
        out_width,
        out_height,
        grid.transform().scaled(factor),
        grid.no_data(),
        values,
        valid,
    )
}

/// Same as [`downsample`], reading `factor` rows at a time so the full
/// resolution raster is never held in memory.
pub fn downsample_source(source: &mut dyn RasterSource, factor: usize) -> Result<ElevationGrid> {
    if factor == 0 {
        return Err(MapError::Config("downsample factor must be at least 1".to_string()));
    }

    let meta = source.metadata().clone();
    let out_width = meta.width / factor;
    let out_height = meta.height / factor;
    if out_width == 0 || out_height == 0 {
        return Err(MapError::InvalidRaster(format!(
            "{}x{} raster {} is smaller than the downsample factor {}",
            meta.width,
            meta.height,
            source.location(),
            factor
        )));
    }

    let mut values = Vec::with_capacity(out_width * out_height);
    let mut valid = Vec::with_capacity(out_width * out_height);

    for out_row in 0..out_height {
        let band = source.read_window(&Window::new(0, out_row * factor, out_width * factor, factor))?;
        let row = downsample(&band, factor)?;
        values.extend_from_slice(row.values());
        valid.extend_from_slice(row.validity());

        if out_row % 100 == 0 {
            tracing::debug!(out_row, out_height, "downsampling");
        }
    }

    ElevationGrid::new(
        out_width,
        out_height,
        meta.transform.scaled(factor),
        meta.no_data,
        values,
        valid,
    )
}
