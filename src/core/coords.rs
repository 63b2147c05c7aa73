//! Coordinate reference systems and conversion between them.
//!
//! WGS84 geographic, WGS84 / UTM (north and south, zones 1 to 60) and
//! Web Mercator are supported. Every conversion passes through WGS84
//! longitude and latitude. The transverse Mercator projection uses the
//! Krüger series to fourth order in the third flattening.

use crate::error::{Result, SurveyError};
use crate::models::Coord;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
/// Latitude where Web Mercator becomes square.
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_6;

pub const EPSG_WGS84: u32 = 4326;
pub const EPSG_WEB_MERCATOR: u32 = 3857;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude in degrees.
    Wgs84,
    Utm { zone: u8, north: bool },
    WebMercator,
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self> {
        match code {
            EPSG_WGS84 => Ok(Crs::Wgs84),
            EPSG_WEB_MERCATOR => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            other => Err(SurveyError::UnsupportedEpsg(other)),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => EPSG_WGS84,
            Crs::WebMercator => EPSG_WEB_MERCATOR,
            Crs::Utm { zone, north: true } => 32600 + *zone as u32,
            Crs::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }

    fn unproject(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match self {
            Crs::Wgs84 => {
                check_geographic(x, y)?;
                Ok((x, y))
            }
            Crs::WebMercator => finite(web_mercator_inverse(x, y)),
            Crs::Utm { zone, north } => finite(TransverseMercator::utm(*zone, *north).inverse(x, y)),
        }
    }

    fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        check_geographic(lon, lat)?;
        match self {
            Crs::Wgs84 => Ok((lon, lat)),
            Crs::WebMercator => finite(web_mercator_forward(lon, lat)?),
            Crs::Utm { zone, north } => TransverseMercator::utm(*zone, *north).forward(lon, lat),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Wgs84 => write!(f, "WGS 84 (EPSG:4326)"),
            Crs::WebMercator => write!(f, "WGS 84 / Pseudo-Mercator (EPSG:3857)"),
            Crs::Utm { zone, north } => write!(
                f,
                "WGS 84 / UTM zone {}{} (EPSG:{})",
                zone,
                if *north { "N" } else { "S" },
                self.epsg()
            ),
        }
    }
}

/// A point with an optional height that passes through conversion untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Position {
    pub fn new(x: f64, y: f64, z: Option<f64>) -> Self {
        Self { x, y, z }
    }
}

/// Convert positions between two EPSG codes.
pub fn convert(points: &[Position], from: u32, to: u32) -> Result<Vec<Position>> {
    let source = Crs::from_epsg(from)?;
    let target = Crs::from_epsg(to)?;

    points
        .iter()
        .map(|p| {
            let (lon, lat) = source.unproject(p.x, p.y)?;
            let (x, y) = target.project(lon, lat)?;
            Ok(Position::new(x, y, p.z))
        })
        .collect()
}

/// Project plane coordinates to WGS84 `(longitude, latitude)`.
pub fn to_wgs84(points: &[Coord], epsg: u32) -> Result<Vec<(f64, f64)>> {
    let source = Crs::from_epsg(epsg)?;
    points
        .iter()
        .map(|c| source.unproject(c.easting, c.northing))
        .collect()
}

/// UTM zone number for a longitude, clamped to 1..=60.
pub fn utm_zone(longitude: f64) -> Result<u8> {
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(SurveyError::OutOfRange(format!(
            "longitude {} is outside ±180°",
            longitude
        )));
    }
    let zone = ((longitude + 180.0) / 6.0).floor() as i64 + 1;
    Ok(zone.clamp(1, 60) as u8)
}

/// EPSG code of the WGS84 / UTM zone containing a position.
pub fn utm_epsg(longitude: f64, latitude: f64) -> Result<u32> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(SurveyError::OutOfRange(format!(
            "latitude {} is outside ±90°",
            latitude
        )));
    }
    let zone = utm_zone(longitude)? as u32;
    Ok(if latitude >= 0.0 { 32600 + zone } else { 32700 + zone })
}

/// EPSG code of the northern UTM zone for a longitude.
pub fn utm_epsg_north(longitude: f64) -> Result<u32> {
    Ok(32600 + utm_zone(longitude)? as u32)
}

fn check_geographic(lon: f64, lat: f64) -> Result<()> {
    if !lat.is_finite() || lat.abs() > 90.0 {
        return Err(SurveyError::OutOfRange(format!("latitude {}", lat)));
    }
    if !lon.is_finite() || lon.abs() > 180.0 {
        return Err(SurveyError::OutOfRange(format!("longitude {}", lon)));
    }
    Ok(())
}

/// Reject a conversion that produced infinite or NaN values.
fn finite((a, b): (f64, f64)) -> Result<(f64, f64)> {
    if a.is_finite() && b.is_finite() {
        Ok((a, b))
    } else {
        Err(SurveyError::OutOfRange(format!(
            "conversion produced a non-finite coordinate ({}, {})",
            a, b
        )))
    }
}

fn web_mercator_forward(lon: f64, lat: f64) -> Result<(f64, f64)> {
    if lat.abs() > WEB_MERCATOR_MAX_LAT {
        return Err(SurveyError::OutOfRange(format!(
            "latitude {} is beyond the Web Mercator limit",
            lat
        )));
    }
    let x = WGS84_A * lon.to_radians();
    let y = WGS84_A * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    Ok((x, y))
}

fn web_mercator_inverse(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / WGS84_A).to_degrees();
    let lat = (2.0 * (y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// Transverse Mercator on the WGS84 ellipsoid.
struct TransverseMercator {
    central_meridian: f64,
    false_northing: f64,
    /// k0 times the rectifying radius.
    scale: f64,
    eccentricity: f64,
    alpha: [f64; 4],
    beta: [f64; 4],
    delta: [f64; 4],
}

impl TransverseMercator {
    fn utm(zone: u8, north: bool) -> Self {
        let n = WGS84_F / (2.0 - WGS84_F);
        let (n2, n3, n4) = (n * n, n * n * n, n * n * n * n);
        let rectifying = WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0);

        Self {
            central_meridian: (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0,
            false_northing: if north { 0.0 } else { UTM_FALSE_NORTHING_SOUTH },
            scale: UTM_K0 * rectifying,
            eccentricity: (WGS84_F * (2.0 - WGS84_F)).sqrt(),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0,
                61.0 * n3 / 240.0 - 103.0 * n4 / 140.0,
                49561.0 * n4 / 161280.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0,
                n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0,
                17.0 * n3 / 480.0 - 37.0 * n4 / 840.0,
                4397.0 * n4 / 161280.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3 + 116.0 * n4 / 45.0,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0 - 227.0 * n4 / 45.0,
                56.0 * n3 / 15.0 - 136.0 * n4 / 35.0,
                4279.0 * n4 / 630.0,
            ],
        }
    }

    /// Project a position less than 90° of longitude from the central meridian.
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        let offset = wrap_longitude(lon - self.central_meridian);
        if offset.abs() >= 90.0 {
            return Err(SurveyError::OutOfRange(format!(
                "longitude {} is {:.1}° from the central meridian {}°",
                lon, offset, self.central_meridian
            )));
        }

        let phi = lat.to_radians();
        let lambda = offset.to_radians();
        let e = self.eccentricity;

        let t = (phi.sin().atanh() - e * (e * phi.sin()).atanh()).sinh();
        let xi_prime = t.atan2(lambda.cos());
        let eta_prime = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_prime;
        let mut eta = eta_prime;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += a * (k * xi_prime).sin() * (k * eta_prime).cosh();
            eta += a * (k * xi_prime).cos() * (k * eta_prime).sinh();
        }

        finite((
            UTM_FALSE_EASTING + self.scale * eta,
            self.false_northing + self.scale * xi,
        ))
    }

    fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let xi = (northing - self.false_northing) / self.scale;
        let eta = (easting - UTM_FALSE_EASTING) / self.scale;

        let mut xi_prime = xi;
        let mut eta_prime = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_prime -= b * (k * xi).sin() * (k * eta).cosh();
            eta_prime -= b * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_prime.sin() / eta_prime.cosh()).asin();
        let mut phi = chi;
        for (j, d) in self.delta.iter().enumerate() {
            phi += d * (2.0 * (j + 1) as f64 * chi).sin();
        }

        let lambda = eta_prime.sinh().atan2(xi_prime.cos());
        let lon = wrap_longitude(self.central_meridian + lambda.to_degrees());
        (lon, phi.to_degrees())
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_epsg() {
        assert_eq!(Crs::from_epsg(4326).unwrap(), Crs::Wgs84);
        assert_eq!(
            Crs::from_epsg(32632).unwrap(),
            Crs::Utm {
                zone: 32,
                north: true
            }
        );
        assert_eq!(
            Crs::from_epsg(32733).unwrap(),
            Crs::Utm {
                zone: 33,
                north: false
            }
        );
        assert!(matches!(
            Crs::from_epsg(27700),
            Err(SurveyError::UnsupportedEpsg(27700))
        ));
        assert!(Crs::from_epsg(32600).is_err());
        assert_eq!(Crs::from_epsg(32760).unwrap().epsg(), 32760);
    }

    #[test]
    fn test_utm_known_point() {
        // Central meridian on the equator
        let (e, n) = Crs::from_epsg(32631)
            .unwrap()
            .project(3.0, 0.0)
            .unwrap();
        assert!((e - 500_000.0).abs() < 1e-6);
        assert!(n.abs() < 1e-6);

        // Meridian arc to 45°N scaled by k0
        let (_, n) = Crs::from_epsg(32631)
            .unwrap()
            .project(3.0, 45.0)
            .unwrap();
        assert!((n - 4_982_950.400).abs() < 0.001, "{}", n);
    }

    #[test]
    fn test_utm_round_trip() {
        for (lon, lat, epsg) in [
            (9.5, 48.2, 32632),
            (7.1, 60.0, 32632),
            (-43.2, -22.9, 32723),
            (179.0, -10.0, 32760),
        ] {
            let projected = convert(&[Position::new(lon, lat, Some(12.5))], 4326, epsg).unwrap();
            let back = convert(&projected, epsg, 4326).unwrap();
            assert!((back[0].x - lon).abs() < 1e-8, "lon {} vs {}", back[0].x, lon);
            assert!((back[0].y - lat).abs() < 1e-8, "lat {} vs {}", back[0].y, lat);
            assert_eq!(back[0].z, Some(12.5));
        }
    }

    #[test]
    fn test_southern_false_northing() {
        let projected = convert(&[Position::new(-45.0, -0.000001, None)], 4326, 32723).unwrap();
        assert!(projected[0].y > 9_999_000.0);
    }

    #[test]
    fn test_web_mercator() {
        let projected = convert(&[Position::new(180.0, 0.0, None)], 4326, 3857).unwrap();
        assert!((projected[0].x - 20_037_508.342_789_244).abs() < 1e-6);
        assert!(projected[0].y.abs() < 1e-6);

        let back = convert(&[Position::new(1_000_000.0, 7_000_000.0, None)], 3857, 4326).unwrap();
        let again = convert(&back, 4326, 3857).unwrap();
        assert!((again[0].y - 7_000_000.0).abs() < 1e-6);

        assert!(convert(&[Position::new(0.0, 89.0, None)], 4326, 3857).is_err());
    }

    #[test]
    fn test_convert_empty_and_invalid() {
        assert!(convert(&[], 4326, 32632).unwrap().is_empty());
        assert!(convert(&[], 4326, 9999).is_err());
        assert!(convert(&[Position::new(0.0, 91.0, None)], 4326, 32631).is_err());
    }

    #[test]
    fn test_utm_rejects_far_off_zone() {
        let far = convert(&[Position::new(99.0, 0.0, None)], 4326, 32632);
        assert!(matches!(far, Err(SurveyError::OutOfRange(_))));
        assert!(convert(&[Position::new(100.0, 10.0, None)], 4326, 32632).is_err());

        // Across the antimeridian the offset wraps: 179°W is 4° from 177°E
        let wrapped = convert(&[Position::new(-179.0, 5.0, None)], 4326, 32660).unwrap();
        assert!(wrapped[0].x.is_finite() && wrapped[0].x > 500_000.0);
    }

    #[test]
    fn test_unproject_rejects_non_finite() {
        assert!(convert(&[Position::new(f64::INFINITY, 0.0, None)], 32632, 4326).is_err());
        assert!(convert(&[Position::new(0.0, f64::NAN, None)], 3857, 4326).is_err());
        assert!(to_wgs84(&[Coord::new(500_000.0, f64::INFINITY)], 32631).is_err());
    }

    #[test]
    fn test_to_wgs84() {
        let lonlat = to_wgs84(&[Coord::new(500_000.0, 0.0)], 32631).unwrap();
        assert!((lonlat[0].0 - 3.0).abs() < 1e-9);
        assert!(lonlat[0].1.abs() < 1e-9);
    }

    #[test]
    fn test_utm_epsg() {
        assert_eq!(utm_epsg(9.99, 45.0).unwrap(), 32632);
        assert_eq!(utm_epsg(-43.2, -22.9).unwrap(), 32723);
        assert_eq!(utm_epsg(180.0, 0.0).unwrap(), 32660);
        assert_eq!(utm_epsg(-180.0, 0.0).unwrap(), 32601);
        assert_eq!(utm_epsg_north(-0.5).unwrap(), 32630);
        assert!(utm_epsg(181.0, 0.0).is_err());
        assert!(utm_epsg(0.0, 95.0).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Crs::from_epsg(32632).unwrap().to_string(),
            "WGS 84 / UTM zone 32N (EPSG:32632)"
        );
    }
}
