use crate::config::NO_DATA_FLOOR;
use crate::dem::ElevationGrid;

#[cfg(test)]
mod tests {
    use super::{mask, MaskRule};
    use crate::dem::{ElevationGrid, GeoTransform};

    fn grid() -> ElevationGrid {
        ElevationGrid::from_values(
            4,
            2,
            GeoTransform::north_up(0.0, 2.0, 1.0),
            None,
            vec![
                -9999.0, -150.0, 399.0, 400.0,
                650.0, -32767.0, 1200.0, f32::NAN,
            ],
        )
        .unwrap()
    }

    fn rule() -> MaskRule {
        MaskRule {
            no_data: Some(-32767.0),
            floor: -100.0,
            min_elevation: 400.0,
        }
    }

    #[test]
    fn drops_no_data_garbage_and_low_cells() {
        let masked = mask(&grid(), &rule());
        let valid: Vec<bool> = masked.validity().to_vec();
        assert_eq!(valid, vec![false, false, false, true, true, false, true, false]);
        assert_eq!(masked.elevation_range(), Some((400.0, 1200.0)));
    }

    #[test]
    fn masking_twice_changes_nothing() {
        let once = mask(&grid(), &rule());
        let twice = mask(&once, &rule());
        assert_eq!(once.validity(), twice.validity());
        assert_eq!(once.dimensions(), twice.dimensions());
    }

    #[test]
    fn floor_applies_without_min_elevation() {
        let masked = mask(
            &grid(),
            &MaskRule {
                no_data: None,
                floor: -100.0,
                min_elevation: f32::NEG_INFINITY,
            },
        );
        assert_eq!(masked.elevation_range(), Some((399.0, 1200.0)));
        assert!(!masked.is_valid(0, 0));
        assert!(!masked.is_valid(1, 0));
    }

    #[test]
    fn source_grid_is_left_alone() {
        let g = grid();
        let before = g.valid_count();
        let _ = mask(&g, &rule());
        assert_eq!(g.valid_count(), before);
    }
}

/// Which cells stop counting as terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskRule {
    pub no_data: Option<f32>,
    /// anything below is sensor garbage
    pub floor: f32,
    pub min_elevation: f32,
}

impl MaskRule {
    pub fn new(no_data: Option<f32>, min_elevation: f32) -> Self {
        MaskRule {
            no_data,
            floor: NO_DATA_FLOOR,
            min_elevation,
        }
    }

    pub fn keeps(&self, z: f32) -> bool {
        !z.is_nan() && Some(z) != self.no_data && z >= self.floor && z >= self.min_elevation
    }
}

/// New grid of the same shape in which every cell rejected by `rule` is
/// invalid. Cells that were invalid before stay invalid.
pub fn mask(grid: &ElevationGrid, rule: &MaskRule) -> ElevationGrid {
    let valid = grid
        .values()
        .iter()
        .zip(grid.validity())
        .map(|(&z, &valid)| valid && rule.keeps(z))
        .collect();

    grid.with_validity(valid)
}
