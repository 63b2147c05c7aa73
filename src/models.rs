//! Data models for survey computations.
//!
//! This module contains the shared data structures used throughout
//! the application: plane coordinates, named result points, result
//! tables and the report that wraps them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Plane coordinates in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coord {
    pub easting: f64,
    pub northing: f64,
}

impl Coord {
    pub fn new(easting: f64, northing: f64) -> Self {
        Self { easting, northing }
    }

    /// Horizontal distance to another coordinate.
    pub fn distance_to(&self, other: &Coord) -> f64 {
        (other.easting - self.easting).hypot(other.northing - self.northing)
    }

    /// Grid azimuth to another coordinate in radians, clockwise from north.
    pub fn azimuth_to(&self, other: &Coord) -> f64 {
        (other.easting - self.easting).atan2(other.northing - self.northing)
    }

    /// Point reached by travelling `distance` along `azimuth_rad`.
    pub fn offset(&self, azimuth_rad: f64, distance: f64) -> Coord {
        Coord {
            easting: self.easting + distance * azimuth_rad.sin(),
            northing: self.northing + distance * azimuth_rad.cos(),
        }
    }
}

/// A named result point, ready for CSV or KML export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyPoint {
    pub name: String,
    pub easting: f64,
    pub northing: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl SurveyPoint {
    pub fn new(name: impl Into<String>, coord: Coord) -> Self {
        Self {
            name: name.into(),
            easting: coord.easting,
            northing: coord.northing,
            elevation: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn coord(&self) -> Coord {
        Coord::new(self.easting, self.northing)
    }
}

/// The kind of calculation that produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalculationKind {
    Compass,
    Theodolite,
    Leveling,
    TrigLeveling,
    Intersection,
    Triangulation,
    Quadrilateral,
    Network,
    Convert,
}

impl CalculationKind {
    /// Name used for `kind` in job files and in output file names.
    pub fn slug(&self) -> &'static str {
        match self {
            CalculationKind::Compass => "compass",
            CalculationKind::Theodolite => "theodolite",
            CalculationKind::Leveling => "leveling",
            CalculationKind::TrigLeveling => "trig-leveling",
            CalculationKind::Intersection => "intersection",
            CalculationKind::Triangulation => "triangulation",
            CalculationKind::Quadrilateral => "quadrilateral",
            CalculationKind::Network => "network",
            CalculationKind::Convert => "convert",
        }
    }
}

impl fmt::Display for CalculationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalculationKind::Compass => "Compass Traverse",
            CalculationKind::Theodolite => "Theodolite Traverse",
            CalculationKind::Leveling => "Differential Leveling",
            CalculationKind::TrigLeveling => "Trigonometric Leveling",
            CalculationKind::Intersection => "Intersection",
            CalculationKind::Triangulation => "Triangulation Chain",
            CalculationKind::Quadrilateral => "Braced Quadrilateral",
            CalculationKind::Network => "Network Adjustment",
            CalculationKind::Convert => "Coordinate Conversion",
        };
        write!(f, "{}", name)
    }
}

/// A rectangular table of formatted cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row, padding or truncating it to the header width.
    pub fn push_row(&mut self, row: Vec<String>) {
        let mut row = row;
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One key/value line of a calculation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub label: String,
    pub value: String,
}

impl SummaryEntry {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Metadata about a calculation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report title.
    pub title: String,
    /// Calculation that produced the report.
    pub kind: CalculationKind,
    /// Date and time the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Input file or job the figures came from.
    pub source: String,
    /// Version of the tool that produced the report.
    pub tool_version: String,
}

/// A complete calculation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    /// Calculation summary (misclosures, precision, setup values).
    pub summary: Vec<SummaryEntry>,
    /// Per-row results.
    pub table: Table,
    /// Warnings and remarks raised during the calculation.
    pub notes: Vec<String>,
}

impl Report {
    pub fn new(kind: CalculationKind, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            metadata: ReportMetadata {
                title: title.into(),
                kind,
                generated_at: Utc::now(),
                source: source.into(),
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            summary: Vec::new(),
            table: Table::default(),
            notes: Vec::new(),
        }
    }

    pub fn add_summary(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.summary.push(SummaryEntry::new(label, value));
    }

    /// Look up a summary value by label.
    pub fn summary_value(&self, label: &str) -> Option<&str> {
        self.summary
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.value.as_str())
    }
}

/// Everything a calculation produces.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub report: Report,
    /// Result points for CSV/KML export.
    pub points: Vec<SurveyPoint>,
    /// EPSG code of `points`, when known.
    pub points_epsg: Option<u32>,
    /// Traverse precision denominator (1 in N); `None` when not applicable or perfect.
    pub precision: Option<f64>,
    /// Leveling misclosure in metres.
    pub misclosure: Option<f64>,
}

impl Outcome {
    pub fn new(report: Report) -> Self {
        Self {
            report,
            points: Vec::new(),
            points_epsg: None,
            precision: None,
            misclosure: None,
        }
    }
}

/// Format a length in metres to four decimals.
pub fn fmt_m(value: f64) -> String {
    format!("{:.4}", value)
}
