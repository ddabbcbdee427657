mod tmerc;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use nom::{
    bytes::complete::tag_no_case,
    character::complete::{char, space0, u16 as u16_parser},
    combinator::all_consuming,
    number::complete::double,
    sequence::{delimited, preceded, separated_pair, tuple},
    IResult,
};

use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};

pub use tmerc::{Ellipsoid, TransverseMercator};


/// Geodetic reference of every point of interest.
pub const GEODETIC_EPSG: u16 = 4326;

/// Latitude and longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(MapError::Config(format!(
                "({}, {}) is not a valid latitude/longitude",
                lat, lon
            )));
        }
        Ok(GeoPoint { lat, lon })
    }
}

impl FromStr for GeoPoint {
    type Err = MapError;

    /// `"<lat>,<lon>"`
    fn from_str(s: &str) -> Result<Self> {
        let parsed: IResult<&str, (f64, f64)> = all_consuming(delimited(
            space0,
            separated_pair(double, tuple((space0, char(','), space0)), double),
            space0,
        ))(s);

        match parsed {
            Ok((_, (lat, lon))) => GeoPoint::new(lat, lon),
            Err(_) => Err(MapError::Config(format!(
                "expected '<lat>,<lon>', got '{}'",
                s
            ))),
        }
    }
}

impl Display for GeoPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}°, {:.6}°", self.lat, self.lon)
    }
}

/// Point in a projected reference system, metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum CrsKind {
    Geographic,
    TransverseMercator(TransverseMercator),
}

/// A reference system this crate knows how to project into.
///
/// NAD83 and WGS84 are treated as the same datum; they differ by about a
/// metre, far below the size of any extraction window.
#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
    epsg: u16,
    name: String,
    kind: CrsKind,
}

impl Crs {
    pub fn from_epsg(epsg: u16) -> Result<Self> {
        let tm = |name: String, ellipsoid, lat0, lon0, k0, fe, fn_| Crs {
            epsg,
            name,
            kind: CrsKind::TransverseMercator(TransverseMercator::new(ellipsoid, lat0, lon0, k0, fe, fn_)),
        };
        let utm_lon0 = |zone: u16| -183.0 + 6.0 * zone as f64;

        let crs = match epsg {
            4326 | 4269 => Crs {
                epsg,
                name: if epsg == 4326 { "WGS 84" } else { "NAD83" }.to_string(),
                kind: CrsKind::Geographic,
            },
            32145 | 6589 => tm(
                "NAD83 / Vermont".to_string(),
                Ellipsoid::GRS80,
                42.5,
                -72.5,
                0.999_964_286,
                500_000.0,
                0.0,
            ),
            32601..=32660 => {
                let zone = epsg - 32600;
                tm(format!("WGS 84 / UTM zone {}N", zone), Ellipsoid::WGS84, 0.0, utm_lon0(zone), 0.9996, 500_000.0, 0.0)
            }
            32701..=32760 => {
                let zone = epsg - 32700;
                tm(format!("WGS 84 / UTM zone {}S", zone), Ellipsoid::WGS84, 0.0, utm_lon0(zone), 0.9996, 500_000.0, 10_000_000.0)
            }
            26901..=26923 => {
                let zone = epsg - 26900;
                tm(format!("NAD83 / UTM zone {}N", zone), Ellipsoid::GRS80, 0.0, utm_lon0(zone), 0.9996, 500_000.0, 0.0)
            }
            _ => {
                return Err(MapError::Reprojection {
                    from: format!("EPSG:{}", GEODETIC_EPSG),
                    to: format!("EPSG:{}", epsg),
                    reason: "unsupported reference system".to_string(),
                })
            }
        };

        Ok(crs)
    }

    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    fn incompatible(&self, reason: &str) -> MapError {
        MapError::Reprojection {
            from: format!("EPSG:{}", GEODETIC_EPSG),
            to: self.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Geodetic point into this system's planar coordinates.
    pub fn project(&self, point: &GeoPoint) -> Result<PlanarPoint> {
        match &self.kind {
            CrsKind::TransverseMercator(tm) => {
                let (x, y) = tm.forward(point.lat, point.lon);
                if !x.is_finite() || !y.is_finite() {
                    return Err(self.incompatible("point is outside the projection's domain"));
                }
                Ok(PlanarPoint { x, y })
            }
            CrsKind::Geographic => Err(self.incompatible(
                "target is geographic, metric buffers need a projected system",
            )),
        }
    }

    pub fn unproject(&self, point: &PlanarPoint) -> Result<GeoPoint> {
        match &self.kind {
            CrsKind::TransverseMercator(tm) => {
                let (lat, lon) = tm.inverse(point.x, point.y);
                Ok(GeoPoint { lat, lon })
            }
            CrsKind::Geographic => Ok(GeoPoint {
                lat: point.y,
                lon: point.x,
            }),
        }
    }
}

impl Display for Crs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{} ({})", self.epsg, self.name)
    }
}

fn epsg_identifier(input: &str) -> IResult<&str, u16> {
    all_consuming(delimited(
        space0,
        preceded(
            tuple((tag_no_case("EPSG"), space0, char(':'), space0)),
            u16_parser,
        ),
        space0,
    ))(input)
}

impl FromStr for Crs {
    type Err = MapError;

    /// `"EPSG:<code>"`, case insensitive.
    fn from_str(s: &str) -> Result<Self> {
        match epsg_identifier(s) {
            Ok((_, code)) => Crs::from_epsg(code),
            Err(_) => Err(MapError::Reprojection {
                from: format!("EPSG:{}", GEODETIC_EPSG),
                to: s.to_string(),
                reason: "expected an 'EPSG:<code>' identifier".to_string(),
            }),
        }
    }
}
