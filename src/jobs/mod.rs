//! Calculation jobs.
//!
//! A job holds the complete input of one calculation. Jobs come from TOML
//! job files (`kind = "compass"`, ...) or are assembled by the CLI from a
//! CSV file and flags; either way [`Job::run`] produces the report, the
//! export points and the figures the quality gates look at.

use crate::config::Config;
use crate::core::angles::{format_dms, AngleFormat, AngleValue};
use crate::core::coords::{convert, Crs, Position};
use crate::core::leveling::{
    differential_leveling, trigonometric_leveling, InstrumentSetup, LevelRow, TrigObservation,
    TrigOptions, VerticalAngle,
};
use crate::core::network::{
    adjust_network, left_angle_to_right, AdjustmentSettings, NetworkResult, Observation, Station,
};
use crate::core::traverse::{
    compass_traverse, theodolite_traverse, AdjustmentMethod, AngleLeg, AngleType, Leg,
    TraverseResult, TraverseType,
};
use crate::core::triangulation::{
    exterior_to_interior, intersection, quadrilateral, triangle_chain, QuadAngles, QuadInput,
    Side, Triangle,
};
use crate::data::csv_io::{
    AngleRecord, LevelRecord, ObservationRecord, PointRecord, StationRecord, TraverseRecord,
    TrigRecord, TriangleRecord,
};
use crate::error::{Result, SurveyError};
use crate::models::{fmt_m, CalculationKind, Coord, Outcome, Report, SurveyPoint, Table};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// Constants every calculation may need, taken from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub angle_format: AngleFormat,
    pub curvature_refraction: bool,
    pub curvature_coefficient: f64,
    pub adjustment: AdjustmentSettings,
    /// Default distance standard deviation in metres.
    pub distance_sd: f64,
    /// Default angle standard deviation in arc-seconds.
    pub angle_sd: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from(&Config::default())
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            angle_format: config.angles.format,
            curvature_refraction: config.leveling.curvature_refraction,
            curvature_coefficient: config.leveling.curvature_coefficient,
            adjustment: AdjustmentSettings {
                max_iterations: config.network.max_iterations,
                convergence: config.network.convergence,
            },
            distance_sd: config.network.distance_sd,
            angle_sd: config.network.angle_sd,
        }
    }
}

fn default_quad_names() -> [String; 4] {
    ["A", "B", "C", "D"].map(String::from)
}

fn zero_angle() -> AngleValue {
    AngleValue::Degrees(0.0)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompassJob {
    #[serde(default)]
    pub start_easting: f64,
    #[serde(default)]
    pub start_northing: f64,
    #[serde(default)]
    pub adjustment: AdjustmentMethod,
    pub legs: Vec<TraverseRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TheodoliteJob {
    #[serde(default)]
    pub start_easting: f64,
    #[serde(default)]
    pub start_northing: f64,
    #[serde(default = "zero_angle")]
    pub initial_azimuth: AngleValue,
    #[serde(default)]
    pub traverse: TraverseType,
    #[serde(default)]
    pub angles: AngleType,
    pub legs: Vec<AngleRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelingJob {
    pub start_elevation: f64,
    #[serde(default)]
    pub closing_elevation: Option<f64>,
    pub rows: Vec<LevelRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrigLevelingJob {
    #[serde(default = "default_station_name")]
    pub station: String,
    #[serde(default)]
    pub northing: f64,
    #[serde(default)]
    pub easting: f64,
    pub elevation: f64,
    #[serde(default)]
    pub instrument_height: f64,
    #[serde(default)]
    pub vertical_angle: VerticalAngle,
    /// Overrides the configured curvature and refraction switch.
    #[serde(default)]
    pub curvature: Option<bool>,
    pub observations: Vec<TrigRecord>,
}

fn default_station_name() -> String {
    "STN".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntersectionJob {
    #[serde(default = "default_a")]
    pub a_name: String,
    pub a_easting: f64,
    pub a_northing: f64,
    #[serde(default = "default_b")]
    pub b_name: String,
    pub b_easting: f64,
    pub b_northing: f64,
    #[serde(default = "default_c")]
    pub c_name: String,
    pub angle_a: AngleValue,
    pub angle_b: AngleValue,
    #[serde(default)]
    pub side: Side,
}

fn default_a() -> String {
    "A".to_string()
}

fn default_b() -> String {
    "B".to_string()
}

fn default_c() -> String {
    "C".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TriangulationJob {
    #[serde(default)]
    pub start_easting: f64,
    #[serde(default)]
    pub start_northing: f64,
    pub base_distance: f64,
    #[serde(default = "zero_angle")]
    pub base_azimuth: AngleValue,
    /// Angles were booked as reflex (exterior) angles.
    #[serde(default)]
    pub exterior: bool,
    pub triangles: Vec<TriangleRecord>,
}

/// The eight quadrilateral angles as booked.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuadAngleRecord {
    pub bac: AngleValue,
    pub cad: AngleValue,
    pub cbd: AngleValue,
    pub dba: AngleValue,
    pub dca: AngleValue,
    pub acb: AngleValue,
    pub adb: AngleValue,
    pub bdc: AngleValue,
}

impl QuadAngleRecord {
    fn resolve(&self, format: AngleFormat) -> Result<QuadAngles> {
        Ok(QuadAngles {
            bac: self.bac.resolve(format)?,
            cad: self.cad.resolve(format)?,
            cbd: self.cbd.resolve(format)?,
            dba: self.dba.resolve(format)?,
            dca: self.dca.resolve(format)?,
            acb: self.acb.resolve(format)?,
            adb: self.adb.resolve(format)?,
            bdc: self.bdc.resolve(format)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuadrilateralJob {
    #[serde(default = "default_quad_names")]
    pub names: [String; 4],
    #[serde(default)]
    pub a_easting: f64,
    #[serde(default)]
    pub a_northing: f64,
    pub base_distance: f64,
    #[serde(default = "zero_angle")]
    pub base_azimuth: AngleValue,
    #[serde(default)]
    pub side: Side,
    pub angles: QuadAngleRecord,
    #[serde(default)]
    pub distance_sd: Option<f64>,
    #[serde(default)]
    pub angle_sd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkJob {
    /// Angles were measured counter-clockwise.
    #[serde(default)]
    pub left_angles: bool,
    pub stations: Vec<StationRecord>,
    pub observations: Vec<ObservationRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConvertJob {
    pub from: u32,
    pub to: u32,
    pub points: Vec<PointRecord>,
}

/// The full input of one calculation.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Compass(CompassJob),
    Theodolite(TheodoliteJob),
    Leveling(LevelingJob),
    TrigLeveling(TrigLevelingJob),
    Intersection(IntersectionJob),
    Triangulation(TriangulationJob),
    Quadrilateral(QuadrilateralJob),
    Network(NetworkJob),
    Convert(ConvertJob),
}

impl Job {
    pub fn kind(&self) -> CalculationKind {
        match self {
            Job::Compass(_) => CalculationKind::Compass,
            Job::Theodolite(_) => CalculationKind::Theodolite,
            Job::Leveling(_) => CalculationKind::Leveling,
            Job::TrigLeveling(_) => CalculationKind::TrigLeveling,
            Job::Intersection(_) => CalculationKind::Intersection,
            Job::Triangulation(_) => CalculationKind::Triangulation,
            Job::Quadrilateral(_) => CalculationKind::Quadrilateral,
            Job::Network(_) => CalculationKind::Network,
            Job::Convert(_) => CalculationKind::Convert,
        }
    }

    /// Build a job from a parsed TOML table of the given kind.
    ///
    /// Keys that belong to the job file rather than the calculation
    /// (`kind`, `title`, `epsg`) are ignored.
    pub fn from_toml(
        kind: CalculationKind,
        value: toml::Value,
    ) -> std::result::Result<Self, toml::de::Error> {
        Ok(match kind {
            CalculationKind::Compass => Job::Compass(value.try_into()?),
            CalculationKind::Theodolite => Job::Theodolite(value.try_into()?),
            CalculationKind::Leveling => Job::Leveling(value.try_into()?),
            CalculationKind::TrigLeveling => Job::TrigLeveling(value.try_into()?),
            CalculationKind::Intersection => Job::Intersection(value.try_into()?),
            CalculationKind::Triangulation => Job::Triangulation(value.try_into()?),
            CalculationKind::Quadrilateral => Job::Quadrilateral(value.try_into()?),
            CalculationKind::Network => Job::Network(value.try_into()?),
            CalculationKind::Convert => Job::Convert(value.try_into()?),
        })
    }

    /// Run the calculation and build its report.
    pub fn run(&self, settings: &Settings) -> Result<Outcome> {
        debug!("Running {} job", self.kind());
        match self {
            Job::Compass(job) => run_compass(job, settings),
            Job::Theodolite(job) => run_theodolite(job, settings),
            Job::Leveling(job) => run_leveling(job),
            Job::TrigLeveling(job) => run_trig_leveling(job, settings),
            Job::Intersection(job) => run_intersection(job, settings),
            Job::Triangulation(job) => run_triangulation(job, settings),
            Job::Quadrilateral(job) => run_quadrilateral(job, settings),
            Job::Network(job) => run_network(job, settings),
            Job::Convert(job) => run_convert(job),
        }
    }
}

/// A job file: the job plus an optional report title and export CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFile {
    pub title: Option<String>,
    /// EPSG code of the job's plane coordinates, used for KML export.
    pub epsg: Option<u32>,
    pub job: Job,
}

#[derive(Deserialize)]
struct JobHeader {
    kind: CalculationKind,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    epsg: Option<u32>,
}

impl JobFile {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let value: toml::Value = toml::from_str(content).context("Invalid TOML")?;
        let header: JobHeader = value
            .clone()
            .try_into()
            .context("Job file needs a valid 'kind'")?;
        let job = Job::from_toml(header.kind, value)
            .with_context(|| format!("Invalid {} job", header.kind))?;

        Ok(Self {
            title: header.title,
            epsg: header.epsg,
            job,
        })
    }

    /// Run the job, titling the report and tagging the export points.
    pub fn run(&self, settings: &Settings, source: &str) -> Result<Outcome> {
        let mut outcome = self.job.run(settings)?;
        if let Some(title) = &self.title {
            outcome.report.metadata.title = title.clone();
        }
        outcome.report.metadata.source = source.to_string();
        if outcome.points_epsg.is_none() {
            outcome.points_epsg = self.epsg;
        }
        Ok(outcome)
    }
}

/// Read and parse a TOML job file.
pub fn load_job_file(path: &Path) -> anyhow::Result<JobFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    JobFile::parse(&content).with_context(|| format!("Failed to parse job file: {}", path.display()))
}

fn new_report(kind: CalculationKind) -> Report {
    Report::new(kind, kind.to_string(), "inline")
}

fn seconds(value: f64) -> String {
    format!("{:+.1}\"", value)
}

fn coordinate_pair(coord: &Coord) -> String {
    format!("E {} / N {}", fmt_m(coord.easting), fmt_m(coord.northing))
}

/// Station names at either end of a line such as `A-B`.
fn line_ends(line: &str) -> (Option<&str>, Option<&str>) {
    match line.split_once('-') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            (Some(from.trim()), Some(to.trim()))
        }
        _ => (None, None),
    }
}

fn traverse_outcome(mut report: Report, result: &TraverseResult) -> Outcome {
    let mut table = Table::new([
        "Line",
        "Azimuth",
        "Distance",
        "Latitude",
        "Departure",
        "Corr. Lat",
        "Corr. Dep",
        "Adj. Lat",
        "Adj. Dep",
        "Easting",
        "Northing",
    ]);
    for leg in &result.legs {
        table.push_row(vec![
            leg.line.clone(),
            format_dms(leg.azimuth),
            fmt_m(leg.distance),
            fmt_m(leg.latitude),
            fmt_m(leg.departure),
            fmt_m(leg.lat_correction),
            fmt_m(leg.dep_correction),
            fmt_m(leg.adj_latitude),
            fmt_m(leg.adj_departure),
            fmt_m(leg.end.easting),
            fmt_m(leg.end.northing),
        ]);
    }
    report.table = table;

    report.add_summary("Start", coordinate_pair(&result.start));
    report.add_summary("Legs", result.legs.len().to_string());
    if let Some(angular) = result.angular_misclosure {
        report.add_summary("Angular misclosure", seconds(angular * 3600.0));
    }
    if let Some(correction) = result.angle_correction {
        report.add_summary("Correction per angle", seconds(correction * 3600.0));
    }

    let precision = match &result.misclosure {
        Some(m) => {
            report.add_summary("Perimeter", format!("{} m", fmt_m(m.perimeter)));
            report.add_summary("Misclosure in latitude", format!("{} m", fmt_m(m.latitude)));
            report.add_summary("Misclosure in departure", format!("{} m", fmt_m(m.departure)));
            report.add_summary("Linear misclosure", format!("{} m", fmt_m(m.linear)));
            report.add_summary("Precision", m.precision_label());
            m.precision
        }
        None => {
            report
                .notes
                .push("Open traverse: no closing control, misclosure not computed".to_string());
            None
        }
    };

    let first = result.legs.first().map(|l| line_ends(&l.line).0);
    let start_name = first.flatten().unwrap_or("Start").to_string();
    let mut points = vec![SurveyPoint::new(start_name, result.start)];
    for (i, leg) in result.legs.iter().enumerate() {
        let name = line_ends(&leg.line)
            .1
            .map(String::from)
            .unwrap_or_else(|| format!("P{}", i + 1));
        points.push(SurveyPoint::new(name, leg.end));
    }

    let mut outcome = Outcome::new(report);
    outcome.points = points;
    outcome.precision = precision;
    outcome
}

fn run_compass(job: &CompassJob, settings: &Settings) -> Result<Outcome> {
    let legs = job
        .legs
        .iter()
        .map(|r| {
            Ok(Leg {
                line: r.line.clone(),
                azimuth: r.bearing.resolve(settings.angle_format)?,
                distance: r.distance,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let start = Coord::new(job.start_easting, job.start_northing);
    let result = compass_traverse(&legs, start, job.adjustment)?;

    let mut report = new_report(CalculationKind::Compass);
    report.add_summary(
        "Adjustment",
        match job.adjustment {
            AdjustmentMethod::Bowditch => "Bowditch (compass rule)",
            AdjustmentMethod::None => "None",
        },
    );
    Ok(traverse_outcome(report, &result))
}

fn run_theodolite(job: &TheodoliteJob, settings: &Settings) -> Result<Outcome> {
    let legs = job
        .legs
        .iter()
        .map(|r| {
            Ok(AngleLeg {
                line: r.line.clone(),
                angle: r.angle.resolve(settings.angle_format)?,
                distance: r.distance,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let initial = job.initial_azimuth.resolve(settings.angle_format)?;

    let start = Coord::new(job.start_easting, job.start_northing);
    let result = theodolite_traverse(&legs, start, initial, job.traverse, job.angles)?;

    let mut report = new_report(CalculationKind::Theodolite);
    report.add_summary("Initial azimuth", format_dms(initial));
    report.add_summary(
        "Traverse",
        match job.traverse {
            TraverseType::Closed => "Closed",
            TraverseType::Open => "Open",
        },
    );
    report.add_summary(
        "Angles",
        match job.angles {
            AngleType::Interior => "Interior",
            AngleType::Exterior => "Exterior",
        },
    );
    Ok(traverse_outcome(report, &result))
}

fn optional_m(value: Option<f64>) -> String {
    value.map(fmt_m).unwrap_or_default()
}

fn run_leveling(job: &LevelingJob) -> Result<Outcome> {
    let rows: Vec<LevelRow> = job
        .rows
        .iter()
        .map(|r| LevelRow::new(r.station.as_str(), r.backsight, r.foresight))
        .collect();
    let result = differential_leveling(&rows, job.start_elevation, job.closing_elevation)?;

    let mut report = new_report(CalculationKind::Leveling);
    let mut table = Table::new(["Station", "BS", "HI", "FS", "Elevation"]);
    for row in &result.rows {
        table.push_row(vec![
            row.station.clone(),
            optional_m(row.backsight),
            optional_m(row.height_of_instrument),
            optional_m(row.foresight),
            optional_m(row.elevation),
        ]);
    }
    report.table = table;

    report.add_summary("Start elevation", format!("{} m", fmt_m(result.start_elevation)));
    report.add_summary("End elevation", format!("{} m", fmt_m(result.end_elevation)));
    report.add_summary("Sum of backsights", format!("{} m", fmt_m(result.sum_backsights)));
    report.add_summary("Sum of foresights", format!("{} m", fmt_m(result.sum_foresights)));
    report.add_summary(
        "Arithmetic check",
        format!("{} m", fmt_m(result.arithmetic_misclosure)),
    );
    if let Some(closing) = job.closing_elevation {
        report.add_summary("Closing benchmark", format!("{} m", fmt_m(closing)));
    }
    if let Some(error) = result.closure_error {
        report.add_summary("Closure error", format!("{} m", fmt_m(error)));
    }
    report.notes.extend(result.warnings.iter().cloned());

    let worst = result
        .closure_error
        .map(f64::abs)
        .unwrap_or(0.0)
        .max(result.arithmetic_misclosure.abs());

    let mut outcome = Outcome::new(report);
    outcome.misclosure = Some(worst);
    Ok(outcome)
}

fn run_trig_leveling(job: &TrigLevelingJob, settings: &Settings) -> Result<Outcome> {
    let setup = InstrumentSetup {
        northing: job.northing,
        easting: job.easting,
        elevation: job.elevation,
        instrument_height: job.instrument_height,
    };
    let observations = job
        .observations
        .iter()
        .map(|r| {
            Ok(TrigObservation {
                target: r.target.clone(),
                horizontal_distance: r.hd,
                vertical_angle: r.va.resolve(settings.angle_format)?,
                target_height: r.th,
                azimuth: r.azimuth.resolve(settings.angle_format)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let options = TrigOptions {
        angle_kind: job.vertical_angle,
        curvature_refraction: job.curvature.unwrap_or(settings.curvature_refraction),
        coefficient: settings.curvature_coefficient,
    };

    let results = trigonometric_leveling(&setup, &observations, &options)?;

    let mut report = new_report(CalculationKind::TrigLeveling);
    report.add_summary(
        "Station",
        format!(
            "{} ({})",
            job.station,
            coordinate_pair(&Coord::new(job.easting, job.northing))
        ),
    );
    report.add_summary("Station elevation", format!("{} m", fmt_m(job.elevation)));
    report.add_summary("Instrument height", format!("{} m", fmt_m(job.instrument_height)));
    report.add_summary(
        "Vertical angles",
        match job.vertical_angle {
            VerticalAngle::Elevation => "Elevation angles",
            VerticalAngle::Zenith => "Zenith angles",
        },
    );
    report.add_summary(
        "Curvature and refraction",
        if options.curvature_refraction {
            format!("Applied (k = {})", options.coefficient)
        } else {
            "Not applied".to_string()
        },
    );

    let mut table = Table::new([
        "Target",
        "HD",
        "Elev. Angle",
        "V",
        "C+R",
        "dH",
        "Elevation",
        "Easting",
        "Northing",
    ]);
    let mut points = vec![SurveyPoint::new(
        job.station.as_str(),
        Coord::new(job.easting, job.northing),
    )
    .with_elevation(job.elevation)];

    for r in &results {
        table.push_row(vec![
            r.target.clone(),
            fmt_m(r.horizontal_distance),
            format_dms(r.elevation_angle),
            fmt_m(r.vertical_component),
            fmt_m(r.curvature_correction),
            fmt_m(r.height_difference),
            fmt_m(r.elevation),
            fmt_m(r.coord.easting),
            fmt_m(r.coord.northing),
        ]);
        points.push(SurveyPoint::new(r.target.as_str(), r.coord).with_elevation(r.elevation));
    }
    report.table = table;

    let mut outcome = Outcome::new(report);
    outcome.points = points;
    Ok(outcome)
}

fn run_intersection(job: &IntersectionJob, settings: &Settings) -> Result<Outcome> {
    let a = Coord::new(job.a_easting, job.a_northing);
    let b = Coord::new(job.b_easting, job.b_northing);
    let angle_a = job.angle_a.resolve(settings.angle_format)?;
    let angle_b = job.angle_b.resolve(settings.angle_format)?;

    let c = intersection(a, b, angle_a, angle_b, job.side)?;

    let mut report = new_report(CalculationKind::Intersection);
    report.add_summary(format!("Angle at {}", job.a_name), format_dms(angle_a));
    report.add_summary(format!("Angle at {}", job.b_name), format_dms(angle_b));
    report.add_summary("Side", format!("{} of {}-{}", job.side, job.a_name, job.b_name));
    report.add_summary("Baseline", format!("{} m", fmt_m(a.distance_to(&b))));
    report.add_summary(
        format!("{}-{}", job.a_name, job.c_name),
        format!("{} m", fmt_m(a.distance_to(&c))),
    );
    report.add_summary(
        format!("{}-{}", job.b_name, job.c_name),
        format!("{} m", fmt_m(b.distance_to(&c))),
    );

    let points = vec![
        SurveyPoint::new(job.a_name.as_str(), a),
        SurveyPoint::new(job.b_name.as_str(), b),
        SurveyPoint::new(job.c_name.as_str(), c),
    ];
    report.table = crate::data::csv_io::points_table(&points);

    let mut outcome = Outcome::new(report);
    outcome.points = points;
    Ok(outcome)
}

fn run_triangulation(job: &TriangulationJob, settings: &Settings) -> Result<Outcome> {
    let format = settings.angle_format;
    let angle = |value: &AngleValue| -> Result<f64> {
        let dd = value.resolve(format)?;
        Ok(if job.exterior { exterior_to_interior(dd) } else { dd })
    };

    let triangles = job
        .triangles
        .iter()
        .map(|r| {
            Ok(Triangle {
                p1: r.p1.clone(),
                p2: r.p2.clone(),
                p3: r.p3.clone(),
                a1: angle(&r.a1)?,
                a2: angle(&r.a2)?,
                a3: angle(&r.a3)?,
                side: r.side,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let base_azimuth = job.base_azimuth.resolve(format)?;
    let start = Coord::new(job.start_easting, job.start_northing);

    let chain = triangle_chain(start, job.base_distance, base_azimuth, &triangles)?;

    let mut report = new_report(CalculationKind::Triangulation);
    report.add_summary("Start", coordinate_pair(&start));
    report.add_summary("Base distance", format!("{} m", fmt_m(job.base_distance)));
    report.add_summary("Base azimuth", format_dms(base_azimuth));
    report.add_summary("Triangles", chain.triangles.len().to_string());
    if job.exterior {
        report
            .notes
            .push("Exterior angles converted to interior (360 - angle)".to_string());
    }

    let mut table = Table::new([
        "Triangle",
        "Closure",
        "Adj. 1",
        "Adj. 2",
        "Adj. 3",
        "Base",
        "Side 1-3",
        "Side 2-3",
        "New Point",
        "Easting",
        "Northing",
    ]);
    for (closure, tri) in chain.triangles.iter().zip(&triangles) {
        let new_point = chain.station(&tri.p3).unwrap_or_default();
        table.push_row(vec![
            closure.name.clone(),
            seconds(closure.error_seconds),
            format_dms(closure.adjusted[0]),
            format_dms(closure.adjusted[1]),
            format_dms(closure.adjusted[2]),
            fmt_m(closure.base),
            fmt_m(closure.side_13),
            fmt_m(closure.side_23),
            tri.p3.clone(),
            fmt_m(new_point.easting),
            fmt_m(new_point.northing),
        ]);
    }
    report.table = table;

    let mut outcome = Outcome::new(report);
    outcome.points = chain
        .stations
        .iter()
        .map(|(name, coord)| SurveyPoint::new(name.as_str(), *coord))
        .collect();
    Ok(outcome)
}

fn sd_cell(value: Option<f64>) -> String {
    value.map(fmt_m).unwrap_or_else(|| "-".to_string())
}

/// Fill a report from a least squares result and collect the adjusted points.
fn network_outcome(mut report: Report, result: &NetworkResult) -> Outcome {
    report.add_summary("Iterations", result.iterations.to_string());
    report.add_summary("Converged", if result.converged { "Yes" } else { "No" });
    report.add_summary("Degrees of freedom", result.degrees_of_freedom.to_string());
    report.add_summary(
        "Reference variance",
        result
            .reference_variance
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "n/a".to_string()),
    );

    let mut table = Table::new(["Station", "Easting", "Northing", "SD E", "SD N", "Fixed"]);
    for s in &result.stations {
        table.push_row(vec![
            s.name.clone(),
            fmt_m(s.easting),
            fmt_m(s.northing),
            sd_cell(s.sd_easting),
            sd_cell(s.sd_northing),
            if s.fixed { "Yes" } else { "No" }.to_string(),
        ]);
    }
    report.table = table;

    for r in &result.residuals {
        report.notes.push(format!(
            "Residual {}: observed {:.4}, adjusted {:.4}, v = {:+.4}",
            r.label, r.observed, r.adjusted, r.residual
        ));
    }
    for skipped in &result.skipped {
        report.notes.push(format!("Skipped {}", skipped));
    }
    if !result.converged {
        warn!("Adjustment stopped after {} iterations without converging", result.iterations);
    }

    let mut outcome = Outcome::new(report);
    outcome.points = result
        .stations
        .iter()
        .map(|s| SurveyPoint::new(s.name.as_str(), Coord::new(s.easting, s.northing)))
        .collect();
    outcome
}

fn run_quadrilateral(job: &QuadrilateralJob, settings: &Settings) -> Result<Outcome> {
    let format = settings.angle_format;
    let angles = job.angles.resolve(format)?;
    let base_azimuth = job.base_azimuth.resolve(format)?;

    let input = QuadInput {
        names: job.names.clone(),
        a: Coord::new(job.a_easting, job.a_northing),
        base_distance: job.base_distance,
        base_azimuth,
        side: job.side,
        angles,
        distance_sd: job.distance_sd.unwrap_or(settings.distance_sd),
        angle_sd: job.angle_sd.unwrap_or(settings.angle_sd),
    };
    let result = quadrilateral(&input, &settings.adjustment)?;

    let mut report = new_report(CalculationKind::Quadrilateral);
    report.add_summary("Sum of eight angles", format_dms(angles.total()));
    report.add_summary("Total angular error", seconds(result.total_error_seconds));
    for (name, error) in &result.triangle_errors {
        report.add_summary(format!("Triangle {} closure", name), seconds(*error));
    }
    Ok(network_outcome(report, &result.network))
}

/// Turn observation rows into typed observations.
pub fn observations_from_records(
    records: &[ObservationRecord],
    format: AngleFormat,
    left_angles: bool,
) -> Result<Vec<Observation>> {
    records
        .iter()
        .map(|r| match r.kind.trim().to_ascii_lowercase().as_str() {
            "distance" | "dist" | "d" => Ok(Observation::distance(
                &r.from,
                &r.to,
                r.value.as_number()?,
                r.sd,
            )),
            "angle" | "a" => {
                let at = r.at.as_deref().ok_or_else(|| {
                    SurveyError::InvalidInput(format!(
                        "Angle {}-{} has no 'at' station",
                        r.from, r.to
                    ))
                })?;
                let mut value = r.value.resolve(format)?;
                if left_angles {
                    value = left_angle_to_right(value);
                }
                Ok(Observation::angle(at, &r.from, &r.to, value, r.sd))
            }
            "azimuth" | "az" => Ok(Observation::azimuth(
                &r.from,
                &r.to,
                r.value.resolve(format)?,
                r.sd,
            )),
            other => Err(SurveyError::InvalidInput(format!(
                "Unknown observation type '{}'",
                other
            ))),
        })
        .collect()
}

fn run_network(job: &NetworkJob, settings: &Settings) -> Result<Outcome> {
    let stations: Vec<Station> = job
        .stations
        .iter()
        .map(|s| Station::new(s.name.as_str(), s.easting, s.northing, s.fixed))
        .collect();
    let observations =
        observations_from_records(&job.observations, settings.angle_format, job.left_angles)?;

    let result = adjust_network(&stations, &observations, &settings.adjustment)?;

    let mut report = new_report(CalculationKind::Network);
    report.add_summary("Stations", stations.len().to_string());
    report.add_summary("Observations", observations.len().to_string());
    if job.left_angles {
        report
            .notes
            .push("Counter-clockwise angles converted to clockwise (360 - angle)".to_string());
    }
    Ok(network_outcome(report, &result))
}

fn fmt_ordinate(crs: &Crs, value: f64) -> String {
    match crs {
        Crs::Wgs84 => format!("{:.8}", value),
        _ => fmt_m(value),
    }
}

fn run_convert(job: &ConvertJob) -> Result<Outcome> {
    let from = Crs::from_epsg(job.from)?;
    let to = Crs::from_epsg(job.to)?;

    let input: Vec<Position> = job
        .points
        .iter()
        .map(|p| Position::new(p.x, p.y, p.z))
        .collect();
    let output = convert(&input, job.from, job.to)?;

    let mut report = new_report(CalculationKind::Convert);
    report.add_summary("From", from.to_string());
    report.add_summary("To", to.to_string());
    report.add_summary("Points", output.len().to_string());

    let mut table = Table::new(["Point", "Input X", "Input Y", "Output X", "Output Y", "Z"]);
    let mut points = Vec::with_capacity(output.len());
    for ((record, src), dst) in job.points.iter().zip(&input).zip(&output) {
        table.push_row(vec![
            record.name.clone(),
            fmt_ordinate(&from, src.x),
            fmt_ordinate(&from, src.y),
            fmt_ordinate(&to, dst.x),
            fmt_ordinate(&to, dst.y),
            optional_m(dst.z),
        ]);
        let mut point = SurveyPoint::new(record.name.as_str(), Coord::new(dst.x, dst.y));
        point.elevation = dst.z;
        points.push(point);
    }
    report.table = table;

    let mut outcome = Outcome::new(report);
    outcome.points = points;
    outcome.points_epsg = Some(job.to);
    Ok(outcome)
}
