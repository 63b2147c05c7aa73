//! CSV input records and table export.
//!
//! Headers are matched case-insensitively after trimming, and the column
//! titles used by the desktop field-book forms are accepted as aliases.
//! The same record types are used for the rows of TOML job files.

use crate::core::angles::AngleValue;
use crate::core::triangulation::Side;
use crate::error::{Result, SurveyError};
use crate::models::{fmt_m, SurveyPoint, Table};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// A compass traverse leg.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraverseRecord {
    #[serde(alias = "leg")]
    pub line: String,
    #[serde(
        alias = "azimuth",
        alias = "azimuth (dd.mmss)",
        alias = "azimuth (decimal)",
        alias = "bearing (dd.mmss)"
    )]
    pub bearing: AngleValue,
    #[serde(alias = "distance (m)")]
    pub distance: f64,
}

/// A theodolite traverse leg.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AngleRecord {
    #[serde(alias = "leg")]
    pub line: String,
    #[serde(alias = "horizontal angle", alias = "measured angle")]
    pub angle: AngleValue,
    #[serde(alias = "distance (m)")]
    pub distance: f64,
}

/// A level book row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelRecord {
    pub station: String,
    #[serde(default, alias = "bs", alias = "backsight (bs)")]
    pub backsight: Option<f64>,
    #[serde(default, alias = "fs", alias = "foresight (fs)")]
    pub foresight: Option<f64>,
}

/// A trigonometric leveling observation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrigRecord {
    #[serde(alias = "target name")]
    pub target: String,
    #[serde(alias = "horiz. distance (m)", alias = "horizontal distance")]
    pub hd: f64,
    #[serde(alias = "vert. angle", alias = "vertical angle")]
    pub va: AngleValue,
    #[serde(default, alias = "target height (m)", alias = "target height")]
    pub th: f64,
    #[serde(default = "zero_angle")]
    pub azimuth: AngleValue,
}

/// A triangle of a triangulation chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TriangleRecord {
    #[serde(alias = "base start")]
    pub p1: String,
    #[serde(alias = "base end")]
    pub p2: String,
    #[serde(alias = "new point")]
    pub p3: String,
    #[serde(alias = "angle @ start")]
    pub a1: AngleValue,
    #[serde(alias = "angle @ end")]
    pub a2: AngleValue,
    #[serde(alias = "angle @ new")]
    pub a3: AngleValue,
    #[serde(alias = "direction")]
    pub side: Side,
}

/// A network station with approximate coordinates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationRecord {
    #[serde(alias = "station")]
    pub name: String,
    #[serde(alias = "approx e", alias = "e")]
    pub easting: f64,
    #[serde(alias = "approx n", alias = "n")]
    pub northing: f64,
    #[serde(default, alias = "fixed?", deserialize_with = "flexible_bool")]
    pub fixed: bool,
}

/// A network observation row; `at` is only used by angles.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObservationRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub at: Option<String>,
    pub from: String,
    pub to: String,
    pub value: AngleValue,
    pub sd: f64,
}

/// A point for coordinate conversion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointRecord {
    #[serde(alias = "point", alias = "point name", alias = "pt", alias = "id")]
    pub name: String,
    #[serde(
        alias = "easting",
        alias = "east",
        alias = "longitude",
        alias = "lon",
        alias = "input easting (x) / lon"
    )]
    pub x: f64,
    #[serde(
        alias = "northing",
        alias = "north",
        alias = "latitude",
        alias = "lat",
        alias = "input northing (y) / lat"
    )]
    pub y: f64,
    #[serde(
        default,
        alias = "elevation",
        alias = "elev",
        alias = "height",
        alias = "input elevation (z)"
    )]
    pub z: Option<f64>,
}

fn zero_angle() -> AngleValue {
    AngleValue::Degrees(0.0)
}

struct FlexibleBool;

impl<'de> Visitor<'de> for FlexibleBool {
    type Value = bool;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("true/false, yes/no or 1/0")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<bool, E> {
        Ok(value)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<bool, E> {
        Ok(value != 0)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<bool, E> {
        Ok(value != 0)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<bool, E> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "x" | "fixed" => Ok(true),
            "false" | "no" | "n" | "0" | "" | "free" => Ok(false),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    deserializer.deserialize_str(FlexibleBool)
}

fn empty_as_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Read every row of a CSV file into `T`.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let headers: csv::StringRecord = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    reader.set_headers(headers);

    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, csv::Error>>()?;

    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Render a table as CSV text.
pub fn table_to_string(table: &Table) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_rows(&mut writer, table)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| SurveyError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| SurveyError::InvalidInput(e.to_string()))
}

/// Write a table to a CSV file.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    write_rows(&mut writer, table)?;
    writer.flush()?;
    debug!("Wrote {} rows to {}", table.rows.len(), path.display());
    Ok(())
}

fn write_rows<W: std::io::Write>(writer: &mut csv::Writer<W>, table: &Table) -> Result<()> {
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    Ok(())
}

/// Result points as an exportable table.
pub fn points_table(points: &[SurveyPoint]) -> Table {
    let mut table = Table::new(["Point", "Easting", "Northing", "Elevation"]);
    for p in points {
        table.push_row(vec![
            p.name.clone(),
            fmt_m(p.easting),
            fmt_m(p.northing),
            p.elevation.map(fmt_m).unwrap_or_default(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::angles::AngleFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_traverse_keeps_dms_text() {
        let file = csv_file("line,bearing,distance\nA-B,123.4530,100.5\n");
        let records: Vec<TraverseRecord> = read_records(file.path()).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].bearing, AngleValue::Text("123.4530".to_string()));
        let dd = records[0].bearing.resolve(AngleFormat::Dms).unwrap();
        assert!((dd - 123.758_333_333).abs() < 1e-6);
    }

    #[test]
    fn test_form_headers_are_aliases() {
        let file = csv_file(
            "Station, Backsight (BS) ,Height of Inst. (HI),Foresight (FS),Elevation\n\
             BM1,1.5,,1.0,100\n\
             TP1,,,,\n",
        );
        let records: Vec<LevelRecord> = read_records(file.path()).unwrap();

        assert_eq!(records[0].backsight, Some(1.5));
        assert_eq!(records[0].foresight, Some(1.0));
        assert_eq!(records[1].backsight, None);
    }

    #[test]
    fn test_station_fixed_flag() {
        let file = csv_file("Station,Approx E,Approx N,Fixed?\nA,0,0,yes\nB,10,0,No\nC,5,5,\n");
        let records: Vec<StationRecord> = read_records(file.path()).unwrap();
        assert!(records[0].fixed);
        assert!(!records[1].fixed);
        assert!(!records[2].fixed);
    }

    #[test]
    fn test_observation_without_at() {
        let file = csv_file("type,at,from,to,value,sd\ndistance,,A,B,100.0,0.005\n");
        let records: Vec<ObservationRecord> = read_records(file.path()).unwrap();
        assert_eq!(records[0].at, None);
        assert_eq!(records[0].value.as_number().unwrap(), 100.0);
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let file = csv_file("line,bearing,distance\nA-B,10.0000,far\n");
        let result: Result<Vec<TraverseRecord>> = read_records(file.path());
        assert!(matches!(result, Err(SurveyError::Csv(_))));
    }

    #[test]
    fn test_table_to_string() {
        let mut table = Table::new(["Point", "Easting"]);
        table.push_row(vec!["P, 1".to_string(), "1.0000".to_string()]);
        let text = table_to_string(&table).unwrap();
        assert_eq!(text, "Point,Easting\n\"P, 1\",1.0000\n");
    }

    #[test]
    fn test_points_table() {
        let points = vec![
            SurveyPoint::new("A", crate::models::Coord::new(1.0, 2.0)).with_elevation(3.0),
            SurveyPoint::new("B", crate::models::Coord::new(4.0, 5.0)),
        ];
        let table = points_table(&points);
        assert_eq!(table.rows[0][3], "3.0000");
        assert_eq!(table.rows[1][3], "");
    }
}
