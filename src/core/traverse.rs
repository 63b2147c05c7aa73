//! Traverse reduction and Bowditch (compass rule) adjustment.

use crate::core::angles::normalize_degrees;
use crate::error::{Result, SurveyError};
use crate::models::Coord;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Linear misclosures below this are treated as a perfect closure.
const PERFECT_CLOSURE: f64 = 1e-9;

/// How the linear misclosure is distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentMethod {
    /// Bowditch (compass) rule, proportional to leg length
    #[default]
    Bowditch,
    /// Report misclosure only
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TraverseType {
    /// Closes back on the starting station
    #[default]
    Closed,
    /// Ends on an unconnected station
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AngleType {
    /// Interior angles, measured to the right
    #[default]
    Interior,
    /// Exterior angles
    Exterior,
}

/// A leg with a known azimuth.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub line: String,
    /// Whole-circle azimuth in decimal degrees.
    pub azimuth: f64,
    pub distance: f64,
}

/// A leg with the measured angle at its starting station.
#[derive(Debug, Clone, PartialEq)]
pub struct AngleLeg {
    pub line: String,
    /// Measured horizontal angle in decimal degrees.
    pub angle: f64,
    pub distance: f64,
}

/// Result of a Bowditch adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct BowditchAdjustment {
    pub latitudes: Vec<f64>,
    pub departures: Vec<f64>,
    pub lat_corrections: Vec<f64>,
    pub dep_corrections: Vec<f64>,
}

/// Linear closure of a traverse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Misclosure {
    pub latitude: f64,
    pub departure: f64,
    pub linear: f64,
    pub perimeter: f64,
    /// Denominator of the "1 in N" ratio; `None` for a perfect closure.
    ///
    /// Closure counts as perfect when the linear misclosure is below 1e-9 m,
    /// not only at exactly zero.
    pub precision: Option<f64>,
}

impl Misclosure {
    pub fn from_components(latitudes: &[f64], departures: &[f64], distances: &[f64]) -> Self {
        let latitude: f64 = latitudes.iter().sum();
        let departure: f64 = departures.iter().sum();
        let perimeter: f64 = distances.iter().sum();
        let linear = latitude.hypot(departure);

        let precision = if linear < PERFECT_CLOSURE {
            None
        } else {
            Some(perimeter / linear)
        };

        Self {
            latitude,
            departure,
            linear,
            perimeter,
            precision,
        }
    }

    /// Precision as printed in reports.
    pub fn precision_label(&self) -> String {
        match self.precision {
            Some(ratio) => format!("1 in {}", group_thousands(ratio.round() as u64)),
            None => "Perfect closure".to_string(),
        }
    }
}

/// A fully reduced traverse leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegResult {
    pub line: String,
    pub azimuth: f64,
    pub distance: f64,
    pub latitude: f64,
    pub departure: f64,
    pub lat_correction: f64,
    pub dep_correction: f64,
    pub adj_latitude: f64,
    pub adj_departure: f64,
    /// Coordinate at the end of the leg.
    pub end: Coord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraverseResult {
    pub start: Coord,
    pub legs: Vec<LegResult>,
    /// `None` for open traverses.
    pub misclosure: Option<Misclosure>,
    /// Angular misclosure in degrees (closed theodolite traverses only).
    pub angular_misclosure: Option<f64>,
    /// Correction applied to each measured angle, in degrees.
    pub angle_correction: Option<f64>,
}

impl TraverseResult {
    /// Start coordinate followed by each leg end.
    pub fn coordinates(&self) -> Vec<Coord> {
        std::iter::once(self.start)
            .chain(self.legs.iter().map(|l| l.end))
            .collect()
    }
}

/// Latitude (d·cos az) and departure (d·sin az) of each leg.
pub fn lat_dep(azimuths: &[f64], distances: &[f64]) -> Result<(Vec<f64>, Vec<f64>)> {
    if azimuths.len() != distances.len() {
        return Err(SurveyError::MismatchedLengths {
            expected: azimuths.len(),
            actual: distances.len(),
        });
    }

    Ok(azimuths
        .iter()
        .zip(distances)
        .map(|(az, d)| {
            let rad = az.to_radians();
            (d * rad.cos(), d * rad.sin())
        })
        .unzip())
}

/// Distribute the misclosure in proportion to leg length.
pub fn adjust_bowditch(
    distances: &[f64],
    latitudes: &[f64],
    departures: &[f64],
) -> Result<BowditchAdjustment> {
    for other in [latitudes.len(), departures.len()] {
        if other != distances.len() {
            return Err(SurveyError::MismatchedLengths {
                expected: distances.len(),
                actual: other,
            });
        }
    }

    let perimeter: f64 = distances.iter().sum();
    if perimeter == 0.0 {
        let zeros = vec![0.0; distances.len()];
        return Ok(BowditchAdjustment {
            latitudes: latitudes.to_vec(),
            departures: departures.to_vec(),
            lat_corrections: zeros.clone(),
            dep_corrections: zeros,
        });
    }

    let lat_misclosure: f64 = latitudes.iter().sum();
    let dep_misclosure: f64 = departures.iter().sum();

    let lat_corrections: Vec<f64> = distances
        .iter()
        .map(|d| -lat_misclosure * d / perimeter)
        .collect();
    let dep_corrections: Vec<f64> = distances
        .iter()
        .map(|d| -dep_misclosure * d / perimeter)
        .collect();

    Ok(BowditchAdjustment {
        latitudes: latitudes
            .iter()
            .zip(&lat_corrections)
            .map(|(l, c)| l + c)
            .collect(),
        departures: departures
            .iter()
            .zip(&dep_corrections)
            .map(|(d, c)| d + c)
            .collect(),
        lat_corrections,
        dep_corrections,
    })
}

/// Accumulate coordinates from a start point. Returns n+1 coordinates.
pub fn coordinates(start: Coord, latitudes: &[f64], departures: &[f64]) -> Vec<Coord> {
    let mut coords = Vec::with_capacity(latitudes.len() + 1);
    coords.push(start);

    let mut current = start;
    for (lat, dep) in latitudes.iter().zip(departures) {
        current = Coord::new(current.easting + dep, current.northing + lat);
        coords.push(current);
    }

    coords
}

/// Reduce and adjust a compass traverse from azimuths and distances.
pub fn compass_traverse(legs: &[Leg], start: Coord, method: AdjustmentMethod) -> Result<TraverseResult> {
    validate_distances(legs.iter().map(|l| (l.line.as_str(), l.distance)))?;

    let lines: Vec<String> = legs.iter().map(|l| l.line.clone()).collect();
    let azimuths: Vec<f64> = legs.iter().map(|l| l.azimuth).collect();
    let distances: Vec<f64> = legs.iter().map(|l| l.distance).collect();

    let (legs, misclosure) = reduce(start, lines, azimuths, distances, method)?;

    Ok(TraverseResult {
        start,
        legs,
        misclosure: Some(misclosure),
        angular_misclosure: None,
        angle_correction: None,
    })
}

/// Reduce a theodolite traverse: balance angles, carry azimuths, adjust.
pub fn theodolite_traverse(
    legs: &[AngleLeg],
    start: Coord,
    initial_azimuth: f64,
    traverse_type: TraverseType,
    angle_type: AngleType,
) -> Result<TraverseResult> {
    validate_distances(legs.iter().map(|l| (l.line.as_str(), l.distance)))?;

    let n = legs.len();
    let mut corrected: Vec<f64> = legs.iter().map(|l| l.angle).collect();
    let mut angular_misclosure = None;
    let mut angle_correction = None;

    if traverse_type == TraverseType::Closed {
        if n < 3 {
            return Err(SurveyError::InvalidInput(
                "A closed traverse needs at least three stations".to_string(),
            ));
        }

        let measured: f64 = corrected.iter().sum();
        let theoretical = match angle_type {
            AngleType::Interior => (n as f64 - 2.0) * 180.0,
            AngleType::Exterior => (n as f64 + 2.0) * 180.0,
        };
        let misclosure = measured - theoretical;
        let correction = -misclosure / n as f64;
        debug!(
            "Angular misclosure {:.6}° over {} angles, {:.6}° each",
            misclosure, n, correction
        );

        for angle in &mut corrected {
            *angle += correction;
        }
        angular_misclosure = Some(misclosure);
        angle_correction = Some(correction);
    }

    let mut azimuths = Vec::with_capacity(n);
    let mut current = normalize_degrees(initial_azimuth);
    for angle in &corrected {
        azimuths.push(current);
        let back = current + 180.0;
        current = match angle_type {
            AngleType::Interior => normalize_degrees(back + angle),
            AngleType::Exterior => normalize_degrees(back - angle),
        };
    }

    let lines: Vec<String> = legs.iter().map(|l| l.line.clone()).collect();
    let distances: Vec<f64> = legs.iter().map(|l| l.distance).collect();

    let (legs, misclosure) = match traverse_type {
        TraverseType::Closed => {
            let (legs, m) = reduce(start, lines, azimuths, distances, AdjustmentMethod::Bowditch)?;
            (legs, Some(m))
        }
        TraverseType::Open => {
            let (legs, _) = reduce(start, lines, azimuths, distances, AdjustmentMethod::None)?;
            (legs, None)
        }
    };

    Ok(TraverseResult {
        start,
        legs,
        misclosure,
        angular_misclosure,
        angle_correction,
    })
}

fn reduce(
    start: Coord,
    lines: Vec<String>,
    azimuths: Vec<f64>,
    distances: Vec<f64>,
    method: AdjustmentMethod,
) -> Result<(Vec<LegResult>, Misclosure)> {
    let (latitudes, departures) = lat_dep(&azimuths, &distances)?;
    let misclosure = Misclosure::from_components(&latitudes, &departures, &distances);

    let adjustment = match method {
        AdjustmentMethod::Bowditch => adjust_bowditch(&distances, &latitudes, &departures)?,
        AdjustmentMethod::None => BowditchAdjustment {
            latitudes: latitudes.clone(),
            departures: departures.clone(),
            lat_corrections: vec![0.0; latitudes.len()],
            dep_corrections: vec![0.0; latitudes.len()],
        },
    };

    let coords = coordinates(start, &adjustment.latitudes, &adjustment.departures);

    let legs = lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| LegResult {
            line,
            azimuth: azimuths[i],
            distance: distances[i],
            latitude: latitudes[i],
            departure: departures[i],
            lat_correction: adjustment.lat_corrections[i],
            dep_correction: adjustment.dep_corrections[i],
            adj_latitude: adjustment.latitudes[i],
            adj_departure: adjustment.departures[i],
            end: coords[i + 1],
        })
        .collect();

    Ok((legs, misclosure))
}

fn validate_distances<'a>(legs: impl ExactSizeIterator<Item = (&'a str, f64)>) -> Result<()> {
    if legs.len() == 0 {
        return Err(SurveyError::InvalidInput(
            "No traverse legs were provided".to_string(),
        ));
    }

    for (line, distance) in legs {
        if !distance.is_finite() || distance < 0.0 {
            return Err(SurveyError::InvalidInput(format!(
                "Distance for line '{}' must be a non-negative number",
                line
            )));
        }
    }

    Ok(())
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg(line: &str, azimuth: f64, distance: f64) -> Leg {
        Leg {
            line: line.to_string(),
            azimuth,
            distance,
        }
    }

    fn square() -> Vec<Leg> {
        vec![
            leg("A-B", 0.0, 100.0),
            leg("B-C", 90.0, 100.0),
            leg("C-D", 180.0, 100.0),
            leg("D-A", 270.0, 100.0),
        ]
    }

    #[test]
    fn test_lat_dep() {
        let (lats, deps) = lat_dep(&[0.0, 90.0], &[10.0, 20.0]).unwrap();
        assert!((lats[0] - 10.0).abs() < 1e-12);
        assert!(deps[0].abs() < 1e-12);
        assert!(lats[1].abs() < 1e-12);
        assert!((deps[1] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_lat_dep_mismatched() {
        assert!(matches!(
            lat_dep(&[0.0], &[1.0, 2.0]),
            Err(SurveyError::MismatchedLengths { .. })
        ));
    }

    #[test]
    fn test_square_closes_perfectly() {
        let result = compass_traverse(&square(), Coord::new(5000.0, 1000.0), AdjustmentMethod::Bowditch)
            .unwrap();
        let m = result.misclosure.unwrap();
        assert!(m.linear < 1e-9);
        assert_eq!(m.precision, None);
        assert_eq!(m.precision_label(), "Perfect closure");

        let last = result.legs.last().unwrap().end;
        assert!((last.easting - 5000.0).abs() < 1e-9);
        assert!((last.northing - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_bowditch_corrections_cancel_misclosure() {
        let distances = [100.0, 100.0, 100.0, 100.0];
        let lats = [100.0, 0.0, -100.0, 0.04];
        let deps = [0.0, 100.0, -0.02, -100.0];

        let adj = adjust_bowditch(&distances, &lats, &deps).unwrap();

        let lat_corr: f64 = adj.lat_corrections.iter().sum();
        assert!((lat_corr + 0.04).abs() < 1e-12);
        assert!((adj.lat_corrections[0] + 0.01).abs() < 1e-12);

        let adj_lat_sum: f64 = adj.latitudes.iter().sum();
        let adj_dep_sum: f64 = adj.departures.iter().sum();
        assert!(adj_lat_sum.abs() < 1e-9);
        assert!(adj_dep_sum.abs() < 1e-9);
    }

    #[test]
    fn test_bowditch_zero_perimeter() {
        let adj = adjust_bowditch(&[0.0, 0.0], &[1.0, 2.0], &[3.0, 4.0]).unwrap();
        assert_eq!(adj.latitudes, vec![1.0, 2.0]);
        assert_eq!(adj.lat_corrections, vec![0.0, 0.0]);
    }

    #[test]
    fn test_misclosure_precision() {
        let m = Misclosure::from_components(&[100.0, -99.97], &[0.0, 0.04], &[100.0, 100.0]);
        assert!((m.linear - 0.05).abs() < 1e-9);
        assert!((m.precision.unwrap() - 4000.0).abs() < 1e-6);
        assert_eq!(m.precision_label(), "1 in 4,000");
    }

    #[test]
    fn test_rounding_residue_is_perfect_closure() {
        let m = Misclosure::from_components(&[100.0, -100.0 + 1e-12], &[0.0, 0.0], &[100.0, 100.0]);
        assert!(m.linear > 0.0);
        assert_eq!(m.precision, None);

        let m = Misclosure::from_components(&[100.0, -100.0 + 1e-6], &[0.0, 0.0], &[100.0, 100.0]);
        assert!(m.precision.is_some());
    }

    #[test]
    fn test_coordinates_accumulate() {
        let coords = coordinates(Coord::new(10.0, 20.0), &[1.0, 2.0], &[3.0, 4.0]);
        assert_eq!(coords.len(), 3);
        assert_eq!(coords[2], Coord::new(17.0, 23.0));
    }

    #[test]
    fn test_compass_rejects_empty_and_negative() {
        assert!(compass_traverse(&[], Coord::default(), AdjustmentMethod::Bowditch).is_err());
        assert!(compass_traverse(
            &[leg("A-B", 0.0, -1.0)],
            Coord::default(),
            AdjustmentMethod::Bowditch
        )
        .is_err());
    }

    fn angle_leg(line: &str, angle: f64) -> AngleLeg {
        AngleLeg {
            line: line.to_string(),
            angle,
            distance: 100.0,
        }
    }

    #[test]
    fn test_theodolite_closed_square() {
        let legs: Vec<AngleLeg> = ["A-B", "B-C", "C-D", "D-A"]
            .iter()
            .map(|l| angle_leg(l, 90.0))
            .collect();

        let result = theodolite_traverse(
            &legs,
            Coord::new(5000.0, 1000.0),
            90.0,
            TraverseType::Closed,
            AngleType::Interior,
        )
        .unwrap();

        assert!(result.angular_misclosure.unwrap().abs() < 1e-12);
        let azimuths: Vec<f64> = result.legs.iter().map(|l| l.azimuth).collect();
        assert_eq!(azimuths, vec![90.0, 0.0, 270.0, 180.0]);

        let b = result.legs[0].end;
        assert!((b.easting - 5100.0).abs() < 1e-9);
        assert!((b.northing - 1000.0).abs() < 1e-9);
        assert!(result.misclosure.unwrap().linear < 1e-9);
    }

    #[test]
    fn test_theodolite_distributes_angular_misclosure() {
        let legs = vec![
            angle_leg("A-B", 90.0 + 10.0 / 3600.0),
            angle_leg("B-C", 90.0 + 10.0 / 3600.0),
            angle_leg("C-D", 90.0 + 10.0 / 3600.0),
            angle_leg("D-A", 90.0 + 10.0 / 3600.0),
        ];

        let result = theodolite_traverse(
            &legs,
            Coord::default(),
            0.0,
            TraverseType::Closed,
            AngleType::Interior,
        )
        .unwrap();

        let misclosure_sec = result.angular_misclosure.unwrap() * 3600.0;
        assert!((misclosure_sec - 40.0).abs() < 1e-6);
        assert!((result.angle_correction.unwrap() * 3600.0 + 10.0).abs() < 1e-6);
        assert!(result.misclosure.unwrap().linear < 1e-9);
    }

    #[test]
    fn test_theodolite_exterior_theoretical_sum() {
        let legs: Vec<AngleLeg> = ["A-B", "B-C", "C-D", "D-A"]
            .iter()
            .map(|l| angle_leg(l, 270.0))
            .collect();

        let result = theodolite_traverse(
            &legs,
            Coord::default(),
            90.0,
            TraverseType::Closed,
            AngleType::Exterior,
        )
        .unwrap();

        assert!(result.angular_misclosure.unwrap().abs() < 1e-12);
        assert!(result.misclosure.unwrap().linear < 1e-9);
    }

    #[test]
    fn test_theodolite_open_has_no_misclosure() {
        let legs = vec![angle_leg("A-B", 180.0), angle_leg("B-C", 180.0)];
        let result = theodolite_traverse(
            &legs,
            Coord::default(),
            0.0,
            TraverseType::Open,
            AngleType::Interior,
        )
        .unwrap();

        assert!(result.misclosure.is_none());
        assert!(result.angular_misclosure.is_none());
        // Straight line north: back azimuth 180 + 180 = 0
        let end = result.legs[1].end;
        assert!((end.northing - 200.0).abs() < 1e-9);
        assert!(end.easting.abs() < 1e-9);
    }

    #[test]
    fn test_closed_traverse_needs_three_stations() {
        let legs = vec![angle_leg("A-B", 90.0), angle_leg("B-A", 90.0)];
        assert!(theodolite_traverse(
            &legs,
            Coord::default(),
            0.0,
            TraverseType::Closed,
            AngleType::Interior
        )
        .is_err());
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }
}
