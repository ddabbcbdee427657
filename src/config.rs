use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nom::{
    bytes::complete::{tag, take_while_m_n},
    character::complete::{char, space0},
    combinator::{all_consuming, map_res},
    number::complete::float,
    sequence::{delimited, preceded, separated_pair, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::projection::GeoPoint;
use crate::render::{Classification, ColorClass, PeakOrder};

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;

    use super::{parse_color_class, MapConfig, Rgb};
    use crate::error::MapError;
    use crate::render::PeakOrder;
    use crate::test::with_temp_dir;

    #[rstest]
    #[case("#F3EBDD", Rgb::new(0xF3, 0xEB, 0xDD))]
    #[case("#7e2a1e", Rgb::new(0x7E, 0x2A, 0x1E))]
    #[case("000000", Rgb::new(0, 0, 0))]
    fn hex_colors_are_parsed(#[case] input: &str, #[case] expected: Rgb) {
        assert_eq!(input.parse::<Rgb>().unwrap(), expected);
    }

    #[rstest]
    #[case("#F3EBD")]
    #[case("#GGGGGG")]
    #[case("#F3EBDD00")]
    #[case("")]
    fn malformed_hex_colors_are_rejected(#[case] input: &str) {
        assert!(input.parse::<Rgb>().is_err());
    }

    #[test]
    fn color_classes_are_parsed_from_threshold_and_color() {
        let class = parse_color_class("780:#F3EBDD").unwrap();
        assert_eq!(class.threshold, 780.0);
        assert_eq!(class.color, Rgb::new(0xF3, 0xEB, 0xDD));

        let class = parse_color_class(" 1110.5 : #7E2A1E ").unwrap();
        assert_eq!(class.threshold, 1110.5);
    }

    #[test]
    fn defaults_reproduce_the_jay_peak_map() {
        let config = MapConfig::default();
        assert_eq!(config.extract.buffer, 8000.0);
        assert_eq!(config.extract.point.lat, 44.924384);
        assert_eq!(config.extract.point.lon, -72.511729);
        assert_eq!(config.render.downsample, 60);
        assert_eq!(config.render.min_elevation, 400.0);
        assert_eq!(config.render.contour_interval, 30.0);
        assert_eq!(config.render.min_contour, 600.0);
        assert_eq!(config.render.peak_order, PeakOrder::ElevationDescending);

        let thresholds: Vec<f32> = config.render.classification.classes().iter().map(|c| c.threshold).collect();
        assert_eq!(thresholds, vec![780.0, 810.0, 840.0, 870.0, 930.0, 990.0, 1110.0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults_for_missing_fields() {
        with_temp_dir(|dir| {
            let path = dir.join("map.json");
            fs::write(
                &path,
                r##"{
                    "extract": { "buffer": 2500, "crs": "EPSG:32618" },
                    "render": {
                        "downsample": 4,
                        "peakOrder": "scanOrder",
                        "classification": [
                            { "threshold": 100, "color": "#000000" },
                            { "threshold": 200, "color": "#FFFFFF" }
                        ],
                        "style": { "width": 800 }
                    }
                }"##,
            )
            .unwrap();

            let config = MapConfig::from_file(&path).unwrap();
            assert_eq!(config.extract.buffer, 2500.0);
            assert_eq!(config.extract.crs.as_deref(), Some("EPSG:32618"));
            assert_eq!(config.render.downsample, 4);
            assert_eq!(config.render.peak_order, PeakOrder::ScanOrder);
            assert_eq!(config.render.classification.classes().len(), 2);
            assert_eq!(config.render.style.width, 800);
            assert_eq!(config.render.style.height, 2000);
            assert_eq!(config.render.contour_interval, 30.0);
        });
    }

    #[test]
    fn decreasing_classification_in_json_is_rejected() {
        with_temp_dir(|dir| {
            let path = dir.join("map.json");
            fs::write(
                &path,
                r##"{ "render": { "classification": [
                    { "threshold": 900, "color": "#000000" },
                    { "threshold": 800, "color": "#FFFFFF" }
                ] } }"##,
            )
            .unwrap();

            assert!(matches!(MapConfig::from_file(&path), Err(MapError::Config(_))));
        });
    }

    #[test]
    fn missing_config_file_is_reported() {
        let res = MapConfig::from_file(std::path::Path::new("/nonexistent/map.json"));
        assert!(matches!(res, Err(MapError::Config(_))));
    }

    #[rstest]
    #[case(|c: &mut MapConfig| c.render.downsample = 0)]
    #[case(|c: &mut MapConfig| c.render.contour_interval = 0.0)]
    #[case(|c: &mut MapConfig| c.render.contour_interval = f32::NAN)]
    #[case(|c: &mut MapConfig| c.extract.buffer = -1.0)]
    #[case(|c: &mut MapConfig| c.render.style.width = 0)]
    #[case(|c: &mut MapConfig| c.render.style.scale = 0.0)]
    #[case(|c: &mut MapConfig| c.render.peak_separation = -5.0)]
    fn invalid_values_fail_validation(#[case] break_it: fn(&mut MapConfig)) {
        let mut config = MapConfig::default();
        break_it(&mut config);
        assert!(matches!(config.validate(), Err(MapError::Config(_))));
    }
}

/// Raster the region is cut from when none is given.
pub const DEFAULT_SOURCE: &str = "/vsicurl/https://s3.us-east-2.amazonaws.com/vtopendata-prd/_Other/Projects/2023_Lidar/PreliminaryData/Northern/Northern_2023_35cm_DSMFR.tif";

/// Jay Peak, Vermont.
pub const DEFAULT_POINT: GeoPoint = GeoPoint {
    lat: 44.924384,
    lon: -72.511729,
};

/// Cells below this are sensor garbage regardless of the no-data marker.
pub const NO_DATA_FLOOR: f32 = -100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

fn hex_byte(input: &str) -> IResult<&str, u8> {
    map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()), |hex| {
        u8::from_str_radix(hex, 16)
    })(input)
}

fn hex_color(input: &str) -> IResult<&str, Rgb> {
    let (input, _) = nom::combinator::opt(tag("#"))(input)?;
    let (input, (r, g, b)) = tuple((hex_byte, hex_byte, hex_byte))(input)?;
    Ok((input, Rgb { r, g, b }))
}

impl FromStr for Rgb {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self> {
        all_consuming(delimited(space0, hex_color, space0))(s)
            .map(|(_, rgb)| rgb)
            .map_err(|_| MapError::Config(format!("'{}' is not a #RRGGBB colour", s)))
    }
}

impl TryFrom<String> for Rgb {
    type Error = MapError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(rgb: Rgb) -> Self {
        rgb.to_string()
    }
}

impl Display for Rgb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// `"<threshold>:<#RRGGBB>"`, the command line form of one colour class.
pub fn parse_color_class(input: &str) -> Result<ColorClass> {
    let parsed: IResult<&str, (f32, Rgb)> = all_consuming(delimited(
        space0,
        separated_pair(float, preceded(space0, char(':')), preceded(space0, hex_color)),
        space0,
    ))(input);

    parsed
        .map(|(_, (threshold, color))| ColorClass { threshold, color })
        .map_err(|_| MapError::Config(format!("expected '<threshold>:<#RRGGBB>', got '{}'", input)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractConfig {
    /// local path, `http(s)://` URL or `/vsicurl/` path of the source raster
    pub source: String,
    pub point: GeoPoint,
    /// half the side of the square cut around `point`, in map units
    pub buffer: f64,
    /// overrides the reference system declared by the source raster
    pub crs: Option<String>,
    pub output: PathBuf,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            source: DEFAULT_SOURCE.to_string(),
            point: DEFAULT_POINT,
            buffer: 8000.0,
            crs: None,
            output: PathBuf::from("data/jay_peak_region_8.tif"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleConfig {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub background: Rgb,
    pub fill_alpha: f32,
    pub minor_color: Rgb,
    pub minor_width: f32,
    pub minor_alpha: f32,
    pub major_color: Rgb,
    pub major_width: f32,
    pub major_alpha: f32,
    pub top_color: Rgb,
    pub top_width: f32,
    pub label_color: Rgb,
    /// digit height in output pixels before `scale`
    pub label_size: f32,
    pub peak_color: Rgb,
    pub peak_alpha: f32,
    pub peak_size: f32,
    pub peak_stroke: f32,
}

impl Default for StyleConfig {
    fn default() -> Self {
        StyleConfig {
            width: 2400,
            height: 2000,
            scale: 2.0,
            background: Rgb::new(0xFF, 0xFF, 0xFF),
            fill_alpha: 0.5,
            minor_color: Rgb::new(0x8B, 0x73, 0x55),
            minor_width: 1.2,
            minor_alpha: 0.5,
            major_color: Rgb::new(0x52, 0x3C, 0x22),
            major_width: 1.5,
            major_alpha: 0.85,
            top_color: Rgb::new(0x52, 0x3C, 0x22),
            top_width: 1.2,
            label_color: Rgb::new(0x3D, 0x28, 0x17),
            label_size: 12.0,
            peak_color: Rgb::new(0x52, 0x3C, 0x22),
            peak_alpha: 0.8,
            peak_size: 24.0,
            peak_stroke: 1.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    /// block size of the averaging downsample
    pub downsample: usize,
    pub min_elevation: f32,
    pub contour_interval: f32,
    pub min_contour: f32,
    pub classification: Classification,
    /// how far the open top colour band reaches above the highest cell
    pub top_margin: f32,
    /// peaks must be within this many metres of the highest cell
    pub peak_drop: f32,
    pub peak_separation: f64,
    pub peak_order: PeakOrder,
    pub style: StyleConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            input: PathBuf::from("data/jay_peak_region_8.tif"),
            output: PathBuf::from("jay_peak_map.png"),
            downsample: 60,
            min_elevation: 400.0,
            contour_interval: 30.0,
            min_contour: 600.0,
            classification: Classification::default(),
            top_margin: 100.0,
            peak_drop: 100.0,
            peak_separation: 500.0,
            peak_order: PeakOrder::ElevationDescending,
            style: StyleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapConfig {
    pub extract: ExtractConfig,
    pub render: RenderConfig,
}

impl MapConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(MapError::Config(format!("couldn't find {}", path.display())));
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let config: MapConfig = serde_json::from_reader(reader)
            .map_err(|e| MapError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MapError::Config(msg));
        let e = &self.extract;
        let r = &self.render;
        let s = &r.style;

        if !(e.buffer.is_finite() && e.buffer > 0.0) {
            return fail(format!("buffer must be positive, got {}", e.buffer));
        }
        if r.downsample == 0 {
            return fail("downsample factor must be at least 1".to_string());
        }
        if !(r.contour_interval.is_finite() && r.contour_interval > 0.0) {
            return fail(format!("contour interval must be positive, got {}", r.contour_interval));
        }
        if !r.min_elevation.is_finite() || !r.min_contour.is_finite() {
            return fail("minimum elevation and minimum contour must be finite".to_string());
        }
        if !(r.top_margin >= 0.0 && r.peak_drop >= 0.0 && r.peak_separation >= 0.0) {
            return fail("top margin, peak drop and peak separation must not be negative".to_string());
        }
        if s.width == 0 || s.height == 0 {
            return fail(format!("image size {}x{} is empty", s.width, s.height));
        }
        if !(s.scale.is_finite() && s.scale > 0.0) {
            return fail(format!("scale must be positive, got {}", s.scale));
        }

        let first_threshold = r.classification.first_threshold();
        if first_threshold > r.min_elevation {
            tracing::warn!(
                first_threshold,
                min_elevation = r.min_elevation,
                "the lowest colour class also covers everything between the minimum elevation and its threshold"
            );
        }

        Ok(())
    }
}
