//! File formats: CSV field data, KML export and PDF reports.

pub mod csv_io;
pub mod kml;
pub mod pdf;
