use crate::dem::GeoTransform;
use crate::error::{MapError, Result};

#[cfg(test)]
mod tests {
    use super::ElevationGrid;
    use crate::dem::GeoTransform;

    fn grid() -> ElevationGrid {
        ElevationGrid::from_values(
            3,
            2,
            GeoTransform::north_up(100.0, 200.0, 10.0),
            Some(-9999.0),
            vec![
                1.0, 2.0, -9999.0,
                4.0, 5.0, 6.0,
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_values_masks_no_data() {
        let g = grid();
        assert_eq!(g.valid_count(), 5);
        assert!(!g.is_valid(2, 0));
        assert_eq!(g.get(2, 0), None);
        assert_eq!(g.get(1, 1), Some(5.0));
    }

    #[test]
    fn from_values_masks_nan() {
        let g = ElevationGrid::from_values(2, 1, GeoTransform::north_up(0.0, 0.0, 1.0), None, vec![f32::NAN, 3.0]).unwrap();
        assert_eq!(g.valid_count(), 1);
        assert_eq!(g.elevation_range(), Some((3.0, 3.0)));
    }

    #[test]
    fn from_values_rejects_wrong_length() {
        assert!(ElevationGrid::from_values(3, 3, GeoTransform::north_up(0.0, 0.0, 1.0), None, vec![0.0; 8]).is_err());
    }

    #[test]
    fn elevation_range_ignores_masked_cells() {
        assert_eq!(grid().elevation_range(), Some((1.0, 6.0)));
    }

    #[test]
    fn elevation_range_of_fully_masked_grid_is_none() {
        let g = grid();
        let masked = g.with_validity(vec![false; 6]);
        assert_eq!(masked.elevation_range(), None);
        // the source grid stays untouched
        assert_eq!(g.valid_count(), 5);
    }

    #[test]
    fn coordinates_are_cell_centers() {
        let g = grid();
        assert_eq!(g.position(0, 0), (105.0, 195.0));
        assert_eq!(g.position(2, 1), (125.0, 185.0));
    }
}

/// Single band elevation raster plus its validity mask.
///
/// `values` and `valid` are row-major and always the same length. Invalid
/// cells keep whatever value they had, but they never take part in range,
/// contour or peak computations.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    width: usize,
    height: usize,
    transform: GeoTransform,
    /// the magic value used for "unknown value in this cell" by the source raster
    no_data: Option<f32>,
    values: Vec<f32>,
    valid: Vec<bool>,
}

impl ElevationGrid {
    /// Builds a grid from raw raster values, marking no-data and NaN cells invalid.
    pub fn from_values(
        width: usize,
        height: usize,
        transform: GeoTransform,
        no_data: Option<f32>,
        values: Vec<f32>,
    ) -> Result<Self> {
        let valid = values
            .iter()
            .map(|v| !v.is_nan() && Some(*v) != no_data)
            .collect();

        ElevationGrid::new(width, height, transform, no_data, values, valid)
    }

    pub fn new(
        width: usize,
        height: usize,
        transform: GeoTransform,
        no_data: Option<f32>,
        values: Vec<f32>,
        valid: Vec<bool>,
    ) -> Result<Self> {
        if values.len() != width * height || valid.len() != values.len() {
            return Err(MapError::InvalidRaster(format!(
                "expected {}x{} = {} cells, got {} values and {} mask entries",
                width,
                height,
                width * height,
                values.len(),
                valid.len()
            )));
        }

        Ok(ElevationGrid {
            width,
            height,
            transform,
            no_data,
            values,
            valid,
        })
    }

    /// Same values and geometry with a different validity mask.
    pub fn with_validity(&self, valid: Vec<bool>) -> Self {
        debug_assert_eq!(valid.len(), self.values.len());
        ElevationGrid {
            valid,
            ..self.clone()
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn no_data(&self) -> Option<f32> {
        self.no_data
    }

    pub fn index(&self, col: usize, row: usize) -> usize {
        col + row * self.width
    }

    pub fn z(&self, col: usize, row: usize) -> f32 {
        self.values[self.index(col, row)]
    }

    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        self.valid[self.index(col, row)]
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        let i = self.index(col, row);
        if self.valid[i] {
            Some(self.values[i])
        } else {
            None
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn validity(&self) -> &[bool] {
        &self.valid
    }

    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values
            .iter()
            .zip(self.valid.iter())
            .filter(|(_, ok)| **ok)
            .map(|(v, _)| *v)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|ok| **ok).count()
    }

    /// Minimum and maximum over valid cells.
    pub fn elevation_range(&self) -> Option<(f32, f32)> {
        self.valid_values().fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Planar coordinates of a cell center.
    pub fn position(&self, col: usize, row: usize) -> (f64, f64) {
        self.transform.cell_center(col, row)
    }

}
