//! Intersection, triangle chains and braced quadrilaterals.

use crate::core::network::{
    adjust_network, AdjustmentSettings, NetworkResult, Observation, Station,
};
use crate::error::{Result, SurveyError};
use crate::models::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Side of the directed line from the first to the second station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    #[serde(alias = "Left", alias = "L")]
    Left,
    #[serde(alias = "Right", alias = "R")]
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "Left"),
            Side::Right => write!(f, "Right"),
        }
    }
}

/// Locate C from stations A and B and the angles measured at them.
pub fn intersection(a: Coord, b: Coord, angle_a: f64, angle_b: f64, side: Side) -> Result<Coord> {
    if angle_a <= 0.0 || angle_b <= 0.0 || angle_a + angle_b >= 180.0 {
        return Err(SurveyError::DegenerateGeometry(format!(
            "angles {:.4}° and {:.4}° do not form a triangle",
            angle_a, angle_b
        )));
    }

    let base = a.distance_to(&b);
    if base == 0.0 {
        return Err(SurveyError::DegenerateGeometry(
            "stations A and B coincide".to_string(),
        ));
    }

    let alpha = angle_a.to_radians();
    let beta = angle_b.to_radians();
    let gamma = std::f64::consts::PI - alpha - beta;
    let dist_ac = base * beta.sin() / gamma.sin();

    let az_ab = a.azimuth_to(&b);
    let az_ac = match side {
        Side::Left => az_ab - alpha,
        Side::Right => az_ab + alpha,
    };

    Ok(a.offset(az_ac, dist_ac))
}

/// A triangle in a chain; p1-p2 is the known base.
#[derive(Debug, Clone, PartialEq)]
pub struct Triangle {
    pub p1: String,
    pub p2: String,
    pub p3: String,
    /// Observed angles at p1, p2, p3 in decimal degrees.
    pub a1: f64,
    pub a2: f64,
    pub a3: f64,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriangleClosure {
    pub name: String,
    /// Σangles − 180 in arc-seconds.
    pub error_seconds: f64,
    pub adjusted: [f64; 3],
    pub base: f64,
    pub side_13: f64,
    pub side_23: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainResult {
    /// Stations in the order they were fixed.
    pub stations: Vec<(String, Coord)>,
    pub triangles: Vec<TriangleClosure>,
}

impl ChainResult {
    pub fn station(&self, name: &str) -> Option<Coord> {
        self.stations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| *c)
    }
}

/// Reflex angle to its interior equivalent.
pub fn exterior_to_interior(angle: f64) -> f64 {
    360.0 - angle
}

/// Compute a chain of triangles from a start station and a baseline.
pub fn triangle_chain(
    start: Coord,
    base_distance: f64,
    base_azimuth: f64,
    triangles: &[Triangle],
) -> Result<ChainResult> {
    let first = triangles.first().ok_or_else(|| {
        SurveyError::InvalidInput("The triangle chain is empty".to_string())
    })?;
    if !base_distance.is_finite() || base_distance <= 0.0 {
        return Err(SurveyError::InvalidInput(
            "Base distance must be positive".to_string(),
        ));
    }

    let mut result = ChainResult {
        stations: vec![
            (first.p1.clone(), start),
            (
                first.p2.clone(),
                start.offset(base_azimuth.to_radians(), base_distance),
            ),
        ],
        triangles: Vec::with_capacity(triangles.len()),
    };

    for tri in triangles {
        let c1 = result
            .station(&tri.p1)
            .ok_or_else(|| SurveyError::UnknownStation(tri.p1.clone()))?;
        let c2 = result
            .station(&tri.p2)
            .ok_or_else(|| SurveyError::UnknownStation(tri.p2.clone()))?;

        let base = c1.distance_to(&c2);
        let az_base = c1.azimuth_to(&c2);

        let error = tri.a1 + tri.a2 + tri.a3 - 180.0;
        let correction = -error / 3.0;
        let adjusted = [tri.a1 + correction, tri.a2 + correction, tri.a3 + correction];

        let sin3 = adjusted[2].to_radians().sin();
        if adjusted.iter().any(|a| *a <= 0.0) || sin3.abs() < 1e-12 || base == 0.0 {
            return Err(SurveyError::DegenerateGeometry(format!(
                "triangle {}-{}-{} cannot be solved",
                tri.p1, tri.p2, tri.p3
            )));
        }

        let side_13 = base * adjusted[1].to_radians().sin() / sin3;
        let side_23 = base * adjusted[0].to_radians().sin() / sin3;

        let az_13 = match tri.side {
            Side::Left => az_base - adjusted[0].to_radians(),
            Side::Right => az_base + adjusted[0].to_radians(),
        };
        let c3 = c1.offset(az_13, side_13);
        debug!("{} fixed at E {:.4} N {:.4}", tri.p3, c3.easting, c3.northing);

        match result.stations.iter_mut().find(|(n, _)| *n == tri.p3) {
            Some(entry) => entry.1 = c3,
            None => result.stations.push((tri.p3.clone(), c3)),
        }

        result.triangles.push(TriangleClosure {
            name: format!("{}-{}-{}", tri.p1, tri.p2, tri.p3),
            error_seconds: error * 3600.0,
            adjusted,
            base,
            side_13,
            side_23,
        });
    }

    Ok(result)
}

/// The eight angles of a braced quadrilateral ABCD, in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuadAngles {
    pub bac: f64,
    pub cad: f64,
    pub cbd: f64,
    pub dba: f64,
    pub dca: f64,
    pub acb: f64,
    pub adb: f64,
    pub bdc: f64,
}

impl QuadAngles {
    pub fn total(&self) -> f64 {
        self.bac + self.cad + self.cbd + self.dba + self.dca + self.acb + self.adb + self.bdc
    }

    /// Closure of triangles ABC, ABD, ACD and BCD in degrees.
    pub fn triangle_closures(&self) -> [(&'static str, f64); 4] {
        [
            ("ABC", self.bac + (self.cbd + self.dba) + self.acb - 180.0),
            ("ABD", (self.bac + self.cad) + self.dba + self.adb - 180.0),
            ("ACD", self.cad + self.dca + (self.adb + self.bdc) - 180.0),
            ("BCD", self.cbd + (self.acb + self.dca) + self.bdc - 180.0),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuadInput {
    /// Station names for A, B, C, D.
    pub names: [String; 4],
    pub a: Coord,
    pub base_distance: f64,
    pub base_azimuth: f64,
    /// Side of A→B on which C and D lie.
    pub side: Side,
    pub angles: QuadAngles,
    pub distance_sd: f64,
    pub angle_sd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuadResult {
    /// Σ8 angles − 360 in arc-seconds.
    pub total_error_seconds: f64,
    /// Triangle closures in arc-seconds.
    pub triangle_errors: Vec<(String, f64)>,
    /// Approximate C and D from intersection.
    pub approximate: [Coord; 2],
    pub network: NetworkResult,
}

/// Check and adjust a braced quadrilateral with A and B held fixed.
pub fn quadrilateral(input: &QuadInput, settings: &AdjustmentSettings) -> Result<QuadResult> {
    let [na, nb, nc, nd] = &input.names;
    let q = &input.angles;

    let a = input.a;
    let b = a.offset(input.base_azimuth.to_radians(), input.base_distance);

    let c = intersection(a, b, q.bac, q.cbd + q.dba, input.side)?;
    let d = intersection(a, b, q.bac + q.cad, q.dba, input.side)?;

    let stations = vec![
        Station::new(na.as_str(), a.easting, a.northing, true),
        Station::new(nb.as_str(), b.easting, b.northing, true),
        Station::new(nc.as_str(), c.easting, c.northing, false),
        Station::new(nd.as_str(), d.easting, d.northing, false),
    ];

    // (at, backsight, foresight, value) as observed for C and D on the right
    let angles = [
        (na, nb, nc, q.bac),
        (na, nc, nd, q.cad),
        (nb, nc, nd, q.cbd),
        (nb, nd, na, q.dba),
        (nc, nd, na, q.dca),
        (nc, na, nb, q.acb),
        (nd, na, nb, q.adb),
        (nd, nb, nc, q.bdc),
    ];

    let mut observations = vec![Observation::distance(
        na,
        nb,
        input.base_distance,
        input.distance_sd,
    )];
    observations.extend(angles.iter().map(|(at, bs, fs, value)| match input.side {
        Side::Right => Observation::angle(at, bs, fs, *value, input.angle_sd),
        Side::Left => Observation::angle(at, fs, bs, *value, input.angle_sd),
    }));

    let network = adjust_network(&stations, &observations, settings)?;

    Ok(QuadResult {
        total_error_seconds: (q.total() - 360.0) * 3600.0,
        triangle_errors: q
            .triangle_closures()
            .iter()
            .map(|(name, err)| (name.to_string(), err * 3600.0))
            .collect(),
        approximate: [c, d],
        network,
    })
}
