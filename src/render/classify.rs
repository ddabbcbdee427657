use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::config::{parse_color_class, Rgb};
use crate::error::{MapError, Result};

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{Classification, ColorClass};
    use crate::config::{RenderConfig, Rgb};

    fn class(threshold: f32) -> ColorClass {
        ColorClass {
            threshold,
            color: Rgb::new(0, 0, 0),
        }
    }

    #[rstest]
    #[case(-50.0, Some(0))]
    #[case(400.0, Some(0))]
    #[case(779.9, Some(0))]
    #[case(780.0, Some(0))]
    #[case(809.99, Some(0))]
    #[case(810.0, Some(1))]
    #[case(1109.0, Some(5))]
    #[case(1110.0, Some(6))]
    #[case(1500.0, Some(6))]
    fn cells_fall_in_the_band_of_the_greatest_threshold_below(#[case] z: f32, #[case] band: Option<usize>) {
        assert_eq!(Classification::default().band_of(z), band);
    }

    #[test]
    fn nan_belongs_to_no_band() {
        assert_eq!(Classification::default().band_of(f32::NAN), None);
    }

    #[test]
    fn every_elevation_above_the_minimum_gets_exactly_one_band() {
        let classification = Classification::default();
        let min_elevation = RenderConfig::default().min_elevation;
        let mut z = min_elevation;
        while z < 1600.0 {
            assert!(classification.band_of(z).is_some(), "{} m is unclassified", z);
            z += 0.5;
        }
    }

    #[test]
    fn bands_never_decrease_with_elevation() {
        let classification = Classification::default();
        let bands: Vec<usize> = (400..1600).filter_map(|z| classification.band_of(z as f32)).collect();
        assert!(bands.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(bands.first(), Some(&0));
        assert_eq!(bands.last(), Some(&6));
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![class(100.0), class(100.0)])]
    #[case(vec![class(200.0), class(100.0)])]
    #[case(vec![class(f32::NAN)])]
    fn invalid_classifications_are_rejected(#[case] classes: Vec<ColorClass>) {
        assert!(Classification::new(classes).is_err());
    }

    #[test]
    fn color_class_parses_from_the_command_line_form() {
        let class: ColorClass = "930:#C77833".parse().unwrap();
        assert_eq!(class.threshold, 930.0);
        assert_eq!(class.color, Rgb::new(0xC7, 0x78, 0x33));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorClass {
    /// lowest elevation of the band, inclusive
    pub threshold: f32,
    pub color: Rgb,
}

impl std::str::FromStr for ColorClass {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self> {
        parse_color_class(s)
    }
}

/// Elevation bands with strictly increasing lower thresholds. The first band
/// is open towards the bottom, the last one towards the top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ColorClass>", into = "Vec<ColorClass>")]
pub struct Classification(Vec<ColorClass>);

impl Classification {
    pub fn new(classes: Vec<ColorClass>) -> Result<Self> {
        if classes.is_empty() {
            return Err(MapError::Config("classification needs at least one class".to_string()));
        }
        if classes.iter().any(|c| !c.threshold.is_finite()) {
            return Err(MapError::Config("classification thresholds must be finite".to_string()));
        }
        if let Some(pair) = classes.windows(2).find(|pair| pair[0].threshold >= pair[1].threshold) {
            return Err(MapError::Config(format!(
                "classification thresholds must increase strictly, got {} then {}",
                pair[0].threshold, pair[1].threshold
            )));
        }

        Ok(Classification(classes))
    }

    pub fn classes(&self) -> &[ColorClass] {
        &self.0
    }

    pub fn first_threshold(&self) -> f32 {
        self.0[0].threshold
    }

    /// Index of the class with the greatest threshold `<= z`. The first
    /// class also takes everything below its threshold, so every elevation
    /// that survived masking has a band; only NaN has none.
    pub fn band_of(&self, z: f32) -> Option<usize> {
        if z.is_nan() {
            return None;
        }
        let above = self.0.partition_point(|c| c.threshold <= z);
        Some(above.saturating_sub(1))
    }
}

impl Default for Classification {
    fn default() -> Self {
        let ramp = [
            (780.0, Rgb::new(0xF3, 0xEB, 0xDD)),
            (810.0, Rgb::new(0xE8, 0xD6, 0xB8)),
            (840.0, Rgb::new(0xDD, 0xBE, 0x8E)),
            (870.0, Rgb::new(0xD3, 0x9E, 0x5E)),
            (930.0, Rgb::new(0xC7, 0x78, 0x33)),
            (990.0, Rgb::new(0xB0, 0x4A, 0x1F)),
            (1110.0, Rgb::new(0x7E, 0x2A, 0x1E)),
        ];
        Classification(
            ramp.iter()
                .map(|&(threshold, color)| ColorClass { threshold, color })
                .collect(),
        )
    }
}

impl TryFrom<Vec<ColorClass>> for Classification {
    type Error = MapError;

    fn try_from(classes: Vec<ColorClass>) -> Result<Self> {
        Classification::new(classes)
    }
}

impl From<Classification> for Vec<ColorClass> {
    fn from(classification: Classification) -> Self {
        classification.0
    }
}
