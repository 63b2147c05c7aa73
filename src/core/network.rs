//! Least squares adjustment of a 2D network by variation of coordinates.
//!
//! Distances, horizontal angles and azimuths are linearised about the
//! current coordinates, weighted by the inverse of their variance and
//! solved through the normal equations until the corrections fall below
//! the convergence limit.

use crate::error::{Result, SurveyError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::{debug, info, warn};

/// Relative pivot size below which the normal matrix is treated as singular.
const SINGULAR_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub easting: f64,
    pub northing: f64,
    #[serde(default)]
    pub fixed: bool,
}

impl Station {
    pub fn new(name: impl Into<String>, easting: f64, northing: f64, fixed: bool) -> Self {
        Self {
            name: name.into(),
            easting,
            northing,
            fixed,
        }
    }
}

/// A network observation. Angles and azimuths are in decimal degrees with
/// standard deviations in arc-seconds; distances and their deviations in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Observation {
    Distance {
        from: String,
        to: String,
        value: f64,
        sd: f64,
    },
    /// Clockwise angle at `at` from the backsight `from` to the foresight `to`.
    Angle {
        at: String,
        from: String,
        to: String,
        value: f64,
        sd: f64,
    },
    Azimuth {
        from: String,
        to: String,
        value: f64,
        sd: f64,
    },
}

impl Observation {
    pub fn distance(from: &str, to: &str, value: f64, sd: f64) -> Self {
        Observation::Distance {
            from: from.to_string(),
            to: to.to_string(),
            value,
            sd,
        }
    }

    pub fn angle(at: &str, from: &str, to: &str, value: f64, sd: f64) -> Self {
        Observation::Angle {
            at: at.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            value,
            sd,
        }
    }

    pub fn azimuth(from: &str, to: &str, value: f64, sd: f64) -> Self {
        Observation::Azimuth {
            from: from.to_string(),
            to: to.to_string(),
            value,
            sd,
        }
    }

    /// Short label such as `dist A-B` or `angle B-A-C`.
    pub fn label(&self) -> String {
        match self {
            Observation::Distance { from, to, .. } => format!("dist {}-{}", from, to),
            Observation::Angle { at, from, to, .. } => format!("angle {}-{}-{}", from, at, to),
            Observation::Azimuth { from, to, .. } => format!("azimuth {}-{}", from, to),
        }
    }

    fn stations(&self) -> Vec<&str> {
        match self {
            Observation::Distance { from, to, .. } | Observation::Azimuth { from, to, .. } => {
                vec![from.as_str(), to.as_str()]
            }
            Observation::Angle { at, from, to, .. } => vec![at.as_str(), from.as_str(), to.as_str()],
        }
    }

    fn sd(&self) -> f64 {
        match self {
            Observation::Distance { sd, .. }
            | Observation::Angle { sd, .. }
            | Observation::Azimuth { sd, .. } => *sd,
        }
    }

    fn value(&self) -> f64 {
        match self {
            Observation::Distance { value, .. }
            | Observation::Angle { value, .. }
            | Observation::Azimuth { value, .. } => *value,
        }
    }

    fn is_angular(&self) -> bool {
        !matches!(self, Observation::Distance { .. })
    }
}

/// Convert a counter-clockwise angle to the clockwise convention.
pub fn left_angle_to_right(value: f64) -> f64 {
    360.0 - value
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustmentSettings {
    pub max_iterations: usize,
    /// Largest coordinate correction, in metres, that counts as converged.
    pub convergence: f64,
}

impl Default for AdjustmentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            convergence: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustedStation {
    pub name: String,
    pub easting: f64,
    pub northing: f64,
    pub fixed: bool,
    pub sd_easting: Option<f64>,
    pub sd_northing: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Residual {
    pub label: String,
    /// Observed value (m or decimal degrees).
    pub observed: f64,
    /// Value computed from the adjusted coordinates.
    pub adjusted: f64,
    /// Adjusted minus observed, in metres or arc-seconds.
    pub residual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkResult {
    pub stations: Vec<AdjustedStation>,
    pub residuals: Vec<Residual>,
    pub iterations: usize,
    pub converged: bool,
    pub degrees_of_freedom: i64,
    pub reference_variance: Option<f64>,
    /// Labels of observations skipped because they name unknown stations.
    pub skipped: Vec<String>,
}

/// One linearised observation row.
struct Row {
    coefficients: Vec<(usize, f64)>,
    misclosure: f64,
    weight: f64,
    computed: f64,
}

struct Network<'a> {
    names: Vec<String>,
    coords: Vec<(f64, f64)>,
    index: HashMap<&'a str, usize>,
    /// Column of each free station's dE; dN follows it.
    columns: Vec<Option<usize>>,
}

impl<'a> Network<'a> {
    fn new(stations: &'a [Station]) -> Result<Self> {
        let mut index = HashMap::new();
        let mut columns = Vec::with_capacity(stations.len());
        let mut next = 0;

        for (i, station) in stations.iter().enumerate() {
            if index.insert(station.name.as_str(), i).is_some() {
                return Err(SurveyError::InvalidInput(format!(
                    "Station '{}' is listed twice",
                    station.name
                )));
            }
            if station.fixed {
                columns.push(None);
            } else {
                columns.push(Some(next));
                next += 2;
            }
        }

        Ok(Self {
            names: stations.iter().map(|s| s.name.clone()).collect(),
            coords: stations.iter().map(|s| (s.easting, s.northing)).collect(),
            index,
            columns,
        })
    }

    fn unknowns(&self) -> usize {
        self.columns.iter().flatten().count() * 2
    }

    fn idx(&self, name: &str) -> usize {
        self.index[name]
    }

    /// Distance, azimuth and the azimuth partials for the line i→j.
    fn line(&self, i: usize, j: usize) -> Result<(f64, f64, f64, f64)> {
        let (ei, ni) = self.coords[i];
        let (ej, nj) = self.coords[j];
        let de = ej - ei;
        let dn = nj - ni;
        let d2 = de * de + dn * dn;
        if d2 == 0.0 {
            return Err(SurveyError::DegenerateGeometry(format!(
                "stations '{}' and '{}' coincide",
                self.names[i], self.names[j]
            )));
        }
        // d(az)/dEj = dN/d², d(az)/dNj = -dE/d²
        Ok((d2.sqrt(), de.atan2(dn), dn / d2, -de / d2))
    }

    fn push(&self, coefficients: &mut Vec<(usize, f64)>, station: usize, de: f64, dn: f64) {
        if let Some(col) = self.columns[station] {
            coefficients.push((col, de));
            coefficients.push((col + 1, dn));
        }
    }

    fn linearise(&self, obs: &Observation) -> Result<Row> {
        let mut coefficients = Vec::new();

        let (computed, misclosure, sd) = match obs {
            Observation::Distance { from, to, value, sd } => {
                let (i, j) = (self.idx(from), self.idx(to));
                let (dist, az, _, _) = self.line(i, j)?;
                let (s, c) = az.sin_cos();
                self.push(&mut coefficients, i, -s, -c);
                self.push(&mut coefficients, j, s, c);
                (dist, value - dist, *sd)
            }
            Observation::Azimuth { from, to, value, sd } => {
                let (i, j) = (self.idx(from), self.idx(to));
                let (_, az, pe, pn) = self.line(i, j)?;
                self.push(&mut coefficients, i, -pe, -pn);
                self.push(&mut coefficients, j, pe, pn);
                let az = az.rem_euclid(2.0 * PI);
                (az, wrap(value.to_radians() - az), arcsec_to_rad(*sd))
            }
            Observation::Angle { at, from, to, value, sd } => {
                let (k, b, f) = (self.idx(at), self.idx(from), self.idx(to));
                let (_, az_f, fe, fn_) = self.line(k, f)?;
                let (_, az_b, be, bn) = self.line(k, b)?;
                self.push(&mut coefficients, f, fe, fn_);
                self.push(&mut coefficients, b, -be, -bn);
                self.push(&mut coefficients, k, be - fe, bn - fn_);
                let angle = (az_f - az_b).rem_euclid(2.0 * PI);
                (angle, wrap(value.to_radians() - angle), arcsec_to_rad(*sd))
            }
        };

        Ok(Row {
            coefficients,
            misclosure,
            weight: 1.0 / (sd * sd),
            computed,
        })
    }
}

/// Adjust a network of stations from redundant observations.
pub fn adjust_network(
    stations: &[Station],
    observations: &[Observation],
    settings: &AdjustmentSettings,
) -> Result<NetworkResult> {
    let mut network = Network::new(stations)?;

    let mut used = Vec::with_capacity(observations.len());
    let mut skipped = Vec::new();
    for obs in observations {
        if let Some(missing) = obs.stations().into_iter().find(|s| !network.index.contains_key(s)) {
            warn!("Skipping {}: unknown station '{}'", obs.label(), missing);
            skipped.push(obs.label());
            continue;
        }
        let sd = obs.sd();
        if !sd.is_finite() || sd <= 0.0 {
            return Err(SurveyError::InvalidInput(format!(
                "Standard deviation of {} must be positive",
                obs.label()
            )));
        }
        used.push(obs);
    }

    let u = network.unknowns();
    let m = used.len();
    let mut iterations = 0;
    let mut converged = false;
    let mut cofactor: Option<DMatrix<f64>> = None;

    if u == 0 {
        info!("No free stations; nothing to adjust");
        converged = true;
    } else {
        if m == 0 {
            return Err(SurveyError::SingularNetwork);
        }

        while iterations < settings.max_iterations {
            iterations += 1;

            let mut a = DMatrix::<f64>::zeros(m, u);
            let mut l = DVector::<f64>::zeros(m);
            let mut p = DVector::<f64>::zeros(m);
            for (r, obs) in used.iter().enumerate() {
                let row = network.linearise(obs)?;
                for (col, value) in row.coefficients {
                    a[(r, col)] += value;
                }
                l[r] = row.misclosure;
                p[r] = row.weight;
            }

            let at_p = weighted_transpose(&a, &p);
            let normal = &at_p * &a;
            let rhs = &at_p * &l;
            let (x, q) = solve_normal(normal, &rhs)?;

            for (s, col) in network.columns.iter().enumerate() {
                if let Some(col) = col {
                    network.coords[s].0 += x[*col];
                    network.coords[s].1 += x[*col + 1];
                }
            }
            cofactor = Some(q);

            let largest = x.amax();
            debug!("Iteration {}: largest correction {:.6} m", iterations, largest);
            if largest < settings.convergence {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "Network did not converge within {} iterations",
                settings.max_iterations
            );
        }
    }

    let mut vtpv = 0.0;
    let mut residuals = Vec::with_capacity(m);
    for obs in &used {
        let row = network.linearise(obs)?;
        // v = computed - observed = -misclosure
        let v = -row.misclosure;
        vtpv += v * v * row.weight;

        let (adjusted, residual) = if obs.is_angular() {
            (row.computed.to_degrees(), v.to_degrees() * 3600.0)
        } else {
            (row.computed, v)
        };

        residuals.push(Residual {
            label: obs.label(),
            observed: obs.value(),
            adjusted,
            residual,
        });
    }

    let dof = m as i64 - u as i64;
    let reference_variance = (dof > 0).then(|| vtpv / dof as f64);

    let result_stations = stations
        .iter()
        .enumerate()
        .map(|(s, station)| {
            let (easting, northing) = network.coords[s];
            let sd = match (network.columns[s], &cofactor, reference_variance) {
                (Some(col), Some(q), Some(s0)) => Some((
                    (s0 * q[(col, col)]).max(0.0).sqrt(),
                    (s0 * q[(col + 1, col + 1)]).max(0.0).sqrt(),
                )),
                _ => None,
            };
            AdjustedStation {
                name: station.name.clone(),
                easting,
                northing,
                fixed: station.fixed,
                sd_easting: sd.map(|s| s.0),
                sd_northing: sd.map(|s| s.1),
            }
        })
        .collect();

    info!(
        "Network adjusted in {} iteration(s), {} degrees of freedom",
        iterations, dof
    );

    Ok(NetworkResult {
        stations: result_stations,
        residuals,
        iterations,
        converged,
        degrees_of_freedom: dof,
        reference_variance,
        skipped,
    })
}

/// Aᵀ·P for a diagonal weight matrix stored as a vector.
fn weighted_transpose(a: &DMatrix<f64>, p: &DVector<f64>) -> DMatrix<f64> {
    let mut at_p = a.transpose();
    for (c, weight) in p.iter().enumerate() {
        at_p.column_mut(c).scale_mut(*weight);
    }
    at_p
}

/// Solve N·x = b, returning x and N⁻¹.
fn solve_normal(normal: DMatrix<f64>, rhs: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
    let scale = normal.diagonal().amax();
    if scale <= 0.0 {
        return Err(SurveyError::SingularNetwork);
    }

    let cholesky = normal.cholesky().ok_or(SurveyError::SingularNetwork)?;
    let smallest_pivot = cholesky
        .l_dirty()
        .diagonal()
        .iter()
        .fold(f64::INFINITY, |acc, d| acc.min(d * d));
    if smallest_pivot <= scale * SINGULAR_TOLERANCE {
        return Err(SurveyError::SingularNetwork);
    }

    Ok((cholesky.solve(rhs), cholesky.inverse()))
}

/// Wrap an angle difference into (-π, π].
fn wrap(angle: f64) -> f64 {
    let mut a = angle.rem_euclid(2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    }
    a
}

fn arcsec_to_rad(seconds: f64) -> f64 {
    (seconds / 3600.0).to_radians()
}
