use std::fmt::{Display, Formatter};

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rstest::rstest;

    use super::GeoTransform;

    #[test]
    fn apply_maps_origin_to_upper_left_corner() {
        let t = GeoTransform::new(0.35, 0.0, 500_000.0, 0.0, -0.35, 250_000.0);
        assert_eq!(t.apply(0.0, 0.0), (500_000.0, 250_000.0));
        assert_eq!(t.apply(10.0, 20.0), (500_003.5, 249_993.0));
    }

    #[test]
    fn cell_center_is_half_a_pixel_in() {
        let t = GeoTransform::new(2.0, 0.0, 100.0, 0.0, -2.0, 50.0);
        assert_eq!(t.cell_center(0, 0), (101.0, 49.0));
        assert_eq!(t.cell_center(3, 1), (107.0, 47.0));
    }

    #[rstest]
    #[case(GeoTransform::new(0.35, 0.0, 500_000.0, 0.0, -0.35, 250_000.0))]
    #[case(GeoTransform::new(10.0, 2.0, 1_000.0, -1.5, -10.0, 9_000.0))]
    #[case(GeoTransform::new(0.0, 5.0, 0.0, 5.0, 0.0, 0.0))]
    fn inverse_undoes_apply(#[case] t: GeoTransform) {
        let inv = t.inverse().unwrap();
        for (col, row) in [(0.0, 0.0), (13.5, 2.25), (1024.0, 777.0)] {
            let (x, y) = t.apply(col, row);
            let (c, r) = inv.apply(x, y);
            assert_relative_eq!(c, col, epsilon = 1e-6);
            assert_relative_eq!(r, row, epsilon = 1e-6);
        }
    }

    #[test]
    fn singular_transform_has_no_inverse() {
        assert!(GeoTransform::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0).inverse().is_none());
    }

    #[test]
    fn translated_moves_origin_and_keeps_scale() {
        let t = GeoTransform::new(0.5, 0.0, 100.0, 0.0, -0.5, 200.0);
        let w = t.translated(10, 4);
        assert_eq!(w.resolution(), t.resolution());
        assert_eq!(w.apply(0.0, 0.0), t.apply(10.0, 4.0));
    }

    #[test]
    fn translated_respects_shear() {
        let t = GeoTransform::new(1.0, 0.5, 0.0, 0.25, -1.0, 0.0);
        let w = t.translated(8, 6);
        assert_eq!(w.apply(2.0, 3.0), t.apply(10.0, 9.0));
    }

    #[test]
    fn scaled_multiplies_pixel_size_and_keeps_origin() {
        let t = GeoTransform::new(0.35, 0.0, 500_000.0, 0.0, -0.35, 250_000.0);
        let s = t.scaled(60);
        assert_eq!(s.apply(0.0, 0.0), t.apply(0.0, 0.0));
        assert_relative_eq!(s.resolution().0, 21.0, epsilon = 1e-9);
        assert_relative_eq!(s.resolution().1, 21.0, epsilon = 1e-9);
        assert_eq!(s.apply(1.0, 1.0), t.apply(60.0, 60.0));
    }
}

/// Affine mapping from pixel space `(col, row)` to planar space `(x, y)`:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// Same parameter order as GDAL/rasterio, so north-up rasters have `b = d = 0`
/// and a negative `e`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        GeoTransform { a, b, c, d, e, f }
    }

    /// North-up transform from the upper left corner and a square pixel size.
    #[cfg(test)]
    pub fn north_up(left: f64, top: f64, pixel_size: f64) -> Self {
        GeoTransform::new(pixel_size, 0.0, left, 0.0, -pixel_size, top)
    }

    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Planar to pixel mapping. `None` for degenerate transforms.
    pub fn inverse(&self) -> Option<GeoTransform> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        let a = self.e / det;
        let b = -self.b / det;
        let d = -self.d / det;
        let e = self.a / det;

        Some(GeoTransform {
            a,
            b,
            c: -(a * self.c + b * self.f),
            d,
            e,
            f: -(d * self.c + e * self.f),
        })
    }

    /// Transform of a window starting at `(col_off, row_off)`.
    pub fn translated(&self, col_off: usize, row_off: usize) -> GeoTransform {
        let (c, f) = self.apply(col_off as f64, row_off as f64);
        GeoTransform { c, f, ..*self }
    }

    /// Transform of a grid whose cells cover `factor x factor` cells of this one.
    pub fn scaled(&self, factor: usize) -> GeoTransform {
        let s = factor as f64;
        GeoTransform {
            a: self.a * s,
            b: self.b * s,
            d: self.d * s,
            e: self.e * s,
            ..*self
        }
    }

    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Length of one pixel step along a column and along a row.
    pub fn resolution(&self) -> (f64, f64) {
        (self.a.hypot(self.d), self.b.hypot(self.e))
    }
}

impl Display for GeoTransform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "| {:.4}, {:.4}, {:.3} | {:.4}, {:.4}, {:.3} |",
            self.a, self.b, self.c, self.d, self.e, self.f
        )
    }
}
