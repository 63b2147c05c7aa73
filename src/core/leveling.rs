//! Differential and trigonometric leveling.

use crate::error::{Result, SurveyError};
use crate::models::Coord;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default coefficient for combined curvature and refraction, metres per km².
pub const CURVATURE_REFRACTION_COEFFICIENT: f64 = 0.0675;

/// One instrument setup in a level book.
///
/// The backsight is read on this row's station; the foresight is read on the
/// station of the next row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LevelRow {
    pub station: String,
    pub backsight: Option<f64>,
    pub foresight: Option<f64>,
}

impl LevelRow {
    pub fn new(station: impl Into<String>, backsight: Option<f64>, foresight: Option<f64>) -> Self {
        Self {
            station: station.into(),
            backsight,
            foresight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelRowResult {
    pub station: String,
    pub backsight: Option<f64>,
    pub foresight: Option<f64>,
    pub height_of_instrument: Option<f64>,
    pub elevation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelingResult {
    pub rows: Vec<LevelRowResult>,
    pub start_elevation: f64,
    pub end_elevation: f64,
    pub sum_backsights: f64,
    pub sum_foresights: f64,
    /// (start + ΣBS − ΣFS) − end
    pub arithmetic_misclosure: f64,
    /// end − known closing elevation, when one was given
    pub closure_error: Option<f64>,
    pub warnings: Vec<String>,
}

/// Reduce a level book by the height-of-instrument method.
pub fn differential_leveling(
    rows: &[LevelRow],
    start_elevation: f64,
    closing_elevation: Option<f64>,
) -> Result<LevelingResult> {
    if rows.is_empty() {
        return Err(SurveyError::InvalidInput(
            "The level book has no rows".to_string(),
        ));
    }

    let n = rows.len();
    let mut elevations: Vec<Option<f64>> = vec![None; n];
    let mut his: Vec<Option<f64>> = vec![None; n];
    elevations[0] = Some(start_elevation);

    let mut warnings = Vec::new();
    let mut sum_bs = 0.0;
    let mut sum_fs = 0.0;
    let mut current_hi: Option<f64> = None;

    for (i, row) in rows.iter().enumerate() {
        // Zero readings count as absent
        let bs = row.backsight.filter(|v| *v > 0.0);
        let fs = row.foresight.filter(|v| *v > 0.0);

        let elevation = match elevations[i] {
            Some(e) => e,
            None if bs.is_none() => {
                debug!("Level book ends at row {} ({})", i, row.station);
                break;
            }
            None => return Err(SurveyError::MissingElevation(i)),
        };

        if let Some(bs) = bs {
            current_hi = Some(elevation + bs);
            sum_bs += bs;
        }

        let hi = match current_hi {
            Some(hi) => hi,
            None if i == 0 => continue,
            None => {
                return Err(SurveyError::InvalidInput(format!(
                    "No height of instrument at row {} ({})",
                    i, row.station
                )))
            }
        };
        his[i] = Some(hi);

        if let Some(fs) = fs {
            if i + 1 < n {
                elevations[i + 1] = Some(hi - fs);
                sum_fs += fs;
            } else {
                let message = format!(
                    "Foresight on the last row ({}) has no station to apply to and was ignored",
                    row.station
                );
                warn!("{}", message);
                warnings.push(message);
            }
        }
    }

    let end_elevation = elevations[n - 1].ok_or_else(|| {
        SurveyError::IncompleteRun(format!(
            "no elevation reached the last station '{}'",
            rows[n - 1].station
        ))
    })?;

    let arithmetic_misclosure = (start_elevation + sum_bs - sum_fs) - end_elevation;
    let closure_error = closing_elevation.map(|known| end_elevation - known);

    let rows = rows
        .iter()
        .enumerate()
        .map(|(i, row)| LevelRowResult {
            station: row.station.clone(),
            backsight: row.backsight,
            foresight: row.foresight,
            height_of_instrument: his[i],
            elevation: elevations[i],
        })
        .collect();

    Ok(LevelingResult {
        rows,
        start_elevation,
        end_elevation,
        sum_backsights: sum_bs,
        sum_foresights: sum_fs,
        arithmetic_misclosure,
        closure_error,
        warnings,
    })
}

/// How vertical angles were booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VerticalAngle {
    /// Angle above the horizon
    #[default]
    Elevation,
    /// Angle from the zenith
    Zenith,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSetup {
    pub northing: f64,
    pub easting: f64,
    pub elevation: f64,
    pub instrument_height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrigObservation {
    pub target: String,
    pub horizontal_distance: f64,
    /// Decimal degrees, interpreted per [`VerticalAngle`].
    pub vertical_angle: f64,
    pub target_height: f64,
    /// Whole-circle azimuth in decimal degrees.
    pub azimuth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrigOptions {
    pub angle_kind: VerticalAngle,
    pub curvature_refraction: bool,
    pub coefficient: f64,
}

impl Default for TrigOptions {
    fn default() -> Self {
        Self {
            angle_kind: VerticalAngle::Elevation,
            curvature_refraction: false,
            coefficient: CURVATURE_REFRACTION_COEFFICIENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrigResult {
    pub target: String,
    pub horizontal_distance: f64,
    /// Elevation angle in decimal degrees.
    pub elevation_angle: f64,
    pub vertical_component: f64,
    pub curvature_correction: f64,
    pub height_difference: f64,
    pub elevation: f64,
    pub coord: Coord,
}

/// Combined curvature and refraction for a sight of `distance` metres.
pub fn curvature_refraction(distance: f64, coefficient: f64) -> f64 {
    let km = distance / 1000.0;
    coefficient * km * km
}

/// Reduce trigonometric height observations from a single setup.
pub fn trigonometric_leveling(
    setup: &InstrumentSetup,
    observations: &[TrigObservation],
    options: &TrigOptions,
) -> Result<Vec<TrigResult>> {
    let station = Coord::new(setup.easting, setup.northing);

    observations
        .iter()
        .map(|obs| {
            if !obs.horizontal_distance.is_finite() || obs.horizontal_distance < 0.0 {
                return Err(SurveyError::InvalidInput(format!(
                    "Horizontal distance to '{}' must be a non-negative number",
                    obs.target
                )));
            }

            let alpha = match options.angle_kind {
                VerticalAngle::Elevation => obs.vertical_angle,
                VerticalAngle::Zenith => 90.0 - obs.vertical_angle,
            };
            if alpha.abs() >= 90.0 {
                return Err(SurveyError::InvalidAngle(format!(
                    "vertical angle {} to '{}' is not below the vertical",
                    obs.vertical_angle, obs.target
                )));
            }

            let vertical_component = obs.horizontal_distance * alpha.to_radians().tan();
            let curvature_correction = if options.curvature_refraction {
                curvature_refraction(obs.horizontal_distance, options.coefficient)
            } else {
                0.0
            };
            let height_difference = vertical_component + setup.instrument_height
                - obs.target_height
                + curvature_correction;

            Ok(TrigResult {
                target: obs.target.clone(),
                horizontal_distance: obs.horizontal_distance,
                elevation_angle: alpha,
                vertical_component,
                curvature_correction,
                height_difference,
                elevation: setup.elevation + height_difference,
                coord: station.offset(obs.azimuth.to_radians(), obs.horizontal_distance),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_setup() {
        let rows = vec![
            LevelRow::new("BM1", Some(1.5), Some(1.0)),
            LevelRow::new("TP1", None, None),
        ];
        let result = differential_leveling(&rows, 100.0, None).unwrap();

        assert!((result.rows[1].elevation.unwrap() - 100.5).abs() < 1e-12);
        assert!((result.rows[0].height_of_instrument.unwrap() - 101.5).abs() < 1e-12);
        assert!((result.end_elevation - 100.5).abs() < 1e-12);
        assert!(result.arithmetic_misclosure.abs() < 1e-12);
        assert!(result.closure_error.is_none());
    }

    #[test]
    fn test_run_with_turning_points_and_closing_benchmark() {
        let rows = vec![
            LevelRow::new("BM1", Some(1.234), Some(2.100)),
            LevelRow::new("TP1", Some(0.950), Some(1.780)),
            LevelRow::new("TP2", Some(2.410), Some(0.655)),
            LevelRow::new("BM2", None, None),
        ];
        let result = differential_leveling(&rows, 50.0, Some(50.060)).unwrap();

        let expected = 50.0 + (1.234 + 0.950 + 2.410) - (2.100 + 1.780 + 0.655);
        assert!((result.end_elevation - expected).abs() < 1e-9);
        assert!(result.arithmetic_misclosure.abs() < 1e-9);
        assert!((result.closure_error.unwrap() - (expected - 50.060)).abs() < 1e-9);
    }

    #[test]
    fn test_intermediate_sight_keeps_hi() {
        let rows = vec![
            LevelRow::new("BM1", Some(1.0), Some(0.5)),
            LevelRow::new("IS1", None, Some(0.8)),
            LevelRow::new("P2", None, None),
        ];
        let result = differential_leveling(&rows, 10.0, None).unwrap();
        assert_eq!(result.rows[1].height_of_instrument, Some(11.0));
        assert!((result.end_elevation - 10.2).abs() < 1e-12);
    }

    #[test]
    fn test_trailing_foresight_warns() {
        let rows = vec![
            LevelRow::new("BM1", Some(1.0), Some(0.5)),
            LevelRow::new("TP1", Some(1.0), Some(0.5)),
        ];
        let result = differential_leveling(&rows, 10.0, None).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert!((result.end_elevation - 10.5).abs() < 1e-12);
        // The unclosed backsight shows up in the arithmetic check
        assert!((result.arithmetic_misclosure - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_incomplete_run() {
        let rows = vec![
            LevelRow::new("BM1", Some(1.0), None),
            LevelRow::new("TP1", None, None),
        ];
        assert!(matches!(
            differential_leveling(&rows, 10.0, None),
            Err(SurveyError::IncompleteRun(_))
        ));
    }

    #[test]
    fn test_missing_elevation_before_backsight() {
        let rows = vec![
            LevelRow::new("BM1", Some(1.0), None),
            LevelRow::new("TP1", Some(1.0), Some(0.5)),
            LevelRow::new("TP2", None, None),
        ];
        assert!(matches!(
            differential_leveling(&rows, 10.0, None),
            Err(SurveyError::MissingElevation(1))
        ));
    }

    #[test]
    fn test_empty_book() {
        assert!(differential_leveling(&[], 0.0, None).is_err());
    }

    fn observation(vertical_angle: f64) -> TrigObservation {
        TrigObservation {
            target: "T1".to_string(),
            horizontal_distance: 100.0,
            vertical_angle,
            target_height: 1.5,
            azimuth: 90.0,
        }
    }

    fn setup() -> InstrumentSetup {
        InstrumentSetup {
            northing: 1000.0,
            easting: 2000.0,
            elevation: 50.0,
            instrument_height: 1.5,
        }
    }

    #[test]
    fn test_trig_elevation_angle() {
        let results =
            trigonometric_leveling(&setup(), &[observation(45.0)], &TrigOptions::default()).unwrap();
        let r = &results[0];
        assert!((r.height_difference - 100.0).abs() < 1e-9);
        assert!((r.elevation - 150.0).abs() < 1e-9);
        assert!((r.coord.easting - 2100.0).abs() < 1e-9);
        assert!((r.coord.northing - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_trig_zenith_matches_elevation() {
        let options = TrigOptions {
            angle_kind: VerticalAngle::Zenith,
            ..TrigOptions::default()
        };
        let zenith = trigonometric_leveling(&setup(), &[observation(80.0)], &options).unwrap();
        let elevation =
            trigonometric_leveling(&setup(), &[observation(10.0)], &TrigOptions::default()).unwrap();
        assert!((zenith[0].elevation - elevation[0].elevation).abs() < 1e-9);
    }

    #[test]
    fn test_trig_curvature_refraction() {
        let options = TrigOptions {
            curvature_refraction: true,
            ..TrigOptions::default()
        };
        let mut obs = observation(0.0);
        obs.horizontal_distance = 2000.0;
        let results = trigonometric_leveling(&setup(), &[obs], &options).unwrap();
        assert!((results[0].curvature_correction - 0.27).abs() < 1e-12);
        assert!((results[0].elevation - 50.27).abs() < 1e-9);
    }

    #[test]
    fn test_trig_rejects_vertical_sight() {
        assert!(
            trigonometric_leveling(&setup(), &[observation(90.0)], &TrigOptions::default()).is_err()
        );
    }
}
