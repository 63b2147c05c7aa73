//! Error type for survey computations and data services.

use thiserror::Error;

/// Errors raised by the computation core and the file formats it reads and writes.
#[derive(Error, Debug)]
pub enum SurveyError {
    #[error("Invalid angle '{0}'")]
    InvalidAngle(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Expected {expected} values but got {actual}")]
    MismatchedLengths { expected: usize, actual: usize },

    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Unknown station '{0}'")]
    UnknownStation(String),

    #[error("Missing elevation at row {0} before a turning point")]
    MissingElevation(usize),

    #[error("Leveling run incomplete: {0}")]
    IncompleteRun(String),

    #[error("Normal equations are singular; the network is not sufficiently constrained")]
    SingularNetwork,

    #[error("Unsupported coordinate reference system EPSG:{0}")]
    UnsupportedEpsg(u32),

    #[error("Coordinate out of range: {0}")]
    OutOfRange(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SurveyError>;
