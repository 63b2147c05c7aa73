//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::core::angles::AngleFormat;
use crate::core::traverse::{AdjustmentMethod, AngleType, TraverseType};
use crate::core::triangulation::Side;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// msurvey - surveying computations from the command line
///
/// Reduce traverses, level runs, triangulation and control networks from
/// CSV field books or TOML job files. Markdown/JSON/PDF reports, CSV and
/// KML exports.
///
/// Examples:
///   msurvey compass legs.csv --start-e 1000 --start-n 1000
///   msurvey level book.csv --start-elevation 100 --closing-elevation 100.012
///   msurvey network stations.csv observations.csv --format pdf
///   msurvey convert points.csv --from 4326 --to 32632 --kml
///   msurvey batch jobs/ -o out/
///   msurvey init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .msurvey.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true, env = "MSURVEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Report format (markdown, json, pdf)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub format: Option<OutputFormat>,

    /// Directory for reports and exports
    #[arg(short, long, value_name = "DIR", global = true)]
    pub output: Option<PathBuf>,

    /// Fail if a traverse ratio is worse than 1 in N
    ///
    /// Useful for CI pipelines. Exit code 2 when the tolerance is exceeded.
    #[arg(long, value_name = "N", global = true)]
    pub min_precision: Option<f64>,

    /// Fail if a leveling misclosure exceeds this many metres
    ///
    /// Exit code 2 when the tolerance is exceeded.
    #[arg(long, value_name = "METRES", global = true)]
    pub max_misclosure: Option<f64>,

    /// How angle text is read (dms = DDD.MMSS, decimal)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub angle_format: Option<AngleFormat>,
}

/// Export options shared by every calculation.
#[derive(ClapArgs, Debug, Clone, Default, PartialEq)]
pub struct ExportArgs {
    /// Export result points as KML
    #[arg(long)]
    pub kml: bool,

    /// Export result points as CSV
    #[arg(long)]
    pub csv: bool,

    /// EPSG code of the result coordinates (defaults to the config value)
    #[arg(long, value_name = "CODE")]
    pub epsg: Option<u32>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Compass traverse from azimuths and distances
    Compass {
        /// CSV with columns line, bearing, distance
        input: PathBuf,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        start_n: f64,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        start_e: f64,
        #[arg(long, default_value = "bowditch")]
        adjustment: AdjustmentMethod,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Theodolite traverse from measured angles and distances
    Theodolite {
        /// CSV with columns line, angle, distance
        input: PathBuf,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        start_n: f64,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        start_e: f64,
        /// Azimuth of the first leg
        #[arg(long, default_value = "0")]
        initial_azimuth: String,
        #[arg(long = "traverse", default_value = "closed")]
        traverse_type: TraverseType,
        #[arg(long = "angles", default_value = "interior")]
        angle_type: AngleType,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Differential leveling by height of instrument
    Level {
        /// CSV with columns station, bs, fs
        input: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        start_elevation: f64,
        /// Known elevation of the closing benchmark
        #[arg(long, allow_negative_numbers = true)]
        closing_elevation: Option<f64>,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Trigonometric leveling from one instrument setup
    TrigLevel {
        /// CSV with columns target, hd, va, th, azimuth
        input: PathBuf,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        northing: f64,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        easting: f64,
        #[arg(long, allow_negative_numbers = true)]
        elevation: f64,
        #[arg(long, default_value = "0")]
        instrument_height: f64,
        /// Vertical angles are zenith angles
        #[arg(long)]
        zenith: bool,
        /// Apply curvature and refraction
        #[arg(long)]
        curvature: bool,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Intersect two rays from a known baseline
    Intersect {
        #[arg(long, allow_negative_numbers = true)]
        a_e: f64,
        #[arg(long, allow_negative_numbers = true)]
        a_n: f64,
        #[arg(long, allow_negative_numbers = true)]
        b_e: f64,
        #[arg(long, allow_negative_numbers = true)]
        b_n: f64,
        #[arg(long)]
        angle_a: String,
        #[arg(long)]
        angle_b: String,
        /// Side of A->B on which the new point lies
        #[arg(long, default_value = "left")]
        side: Side,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Chain of triangles from a baseline
    Triangulate {
        /// CSV with columns p1, p2, p3, a1, a2, a3, side
        input: PathBuf,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        start_e: f64,
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        start_n: f64,
        #[arg(long)]
        base_distance: f64,
        #[arg(long, default_value = "0")]
        base_azimuth: String,
        /// Angles are reflex (exterior) angles
        #[arg(long)]
        exterior: bool,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Braced quadrilateral from a TOML job file
    Quad {
        job: PathBuf,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Least squares adjustment of a 2D control network
    Network {
        /// CSV with columns name, easting, northing, fixed
        stations: PathBuf,
        /// CSV with columns type, at, from, to, value, sd
        observations: PathBuf,
        /// Angles were measured counter-clockwise
        #[arg(long)]
        left_angles: bool,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Convert coordinates between EPSG systems
    Convert {
        /// CSV with columns name, x, y, z
        input: PathBuf,
        #[arg(long, value_name = "EPSG")]
        from: u32,
        #[arg(long, value_name = "EPSG")]
        to: u32,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Print the UTM zone and EPSG code for a position
    UtmZone {
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,
    },

    /// Convert between DDD.MMSS and decimal degrees
    Dms {
        #[arg(allow_hyphen_values = true)]
        value: String,
        /// Convert decimal degrees to DDD.MMSS
        #[arg(long)]
        to_dms: bool,
    },

    /// Run one TOML job file
    Run {
        job: PathBuf,
        #[command(flatten)]
        export: ExportArgs,
    },

    /// Run every job file in a directory
    Batch {
        dir: PathBuf,
        /// Number of jobs to run at once
        #[arg(long, value_name = "NUM")]
        concurrency: Option<usize>,
    },

    /// Generate a default .msurvey.toml configuration file
    InitConfig,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
    /// PDF document
    Pdf,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl Command {
    /// Export flags of calculation commands.
    pub fn export(&self) -> Option<&ExportArgs> {
        match self {
            Command::Compass { export, .. }
            | Command::Theodolite { export, .. }
            | Command::Level { export, .. }
            | Command::TrigLevel { export, .. }
            | Command::Intersect { export, .. }
            | Command::Triangulate { export, .. }
            | Command::Quad { export, .. }
            | Command::Network { export, .. }
            | Command::Convert { export, .. }
            | Command::Run { export, .. } => Some(export),
            Command::UtmZone { .. }
            | Command::Dms { .. }
            | Command::Batch { .. }
            | Command::InitConfig => None,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(precision) = self.min_precision {
            if precision.is_nan() || precision <= 0.0 {
                return Err("Minimum precision must be a positive ratio".to_string());
            }
        }

        if let Some(misclosure) = self.max_misclosure {
            if misclosure.is_nan() || misclosure < 0.0 {
                return Err("Maximum misclosure cannot be negative".to_string());
            }
        }

        match &self.command {
            Command::Batch { dir, concurrency } => {
                if *concurrency == Some(0) {
                    return Err("Concurrency must be at least 1".to_string());
                }
                if !dir.is_dir() {
                    return Err(format!("Job directory does not exist: {}", dir.display()));
                }
            }
            Command::Triangulate { base_distance, .. } if *base_distance <= 0.0 => {
                return Err("Base distance must be positive".to_string());
            }
            Command::TrigLevel {
                instrument_height, ..
            } if *instrument_height < 0.0 => {
                return Err("Instrument height cannot be negative".to_string());
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(argv: &[&str]) -> Args {
        let mut full = vec!["msurvey"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_parse_compass() {
        let args = make_args(&["compass", "legs.csv", "--start-e", "-250.5", "--kml"]);
        match &args.command {
            Command::Compass {
                input,
                start_e,
                start_n,
                adjustment,
                export,
            } => {
                assert_eq!(input, &PathBuf::from("legs.csv"));
                assert_eq!(*start_e, -250.5);
                assert_eq!(*start_n, 0.0);
                assert_eq!(*adjustment, AdjustmentMethod::Bowditch);
                assert!(export.kml);
                assert!(!export.csv);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = make_args(&[
            "level",
            "book.csv",
            "--start-elevation",
            "100",
            "--format",
            "pdf",
            "-q",
        ]);
        assert_eq!(args.format, Some(OutputFormat::Pdf));
        assert!(args.quiet);
    }

    #[test]
    fn test_dms_negative_value() {
        let args = make_args(&["dms", "-12.3015"]);
        match args.command {
            Command::Dms { value, to_dms } => {
                assert_eq!(value, "-12.3015");
                assert!(!to_dms);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(Args::try_parse_from(["msurvey", "--format", "docx", "init-config"]).is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args(&["init-config"]);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_batch_concurrency() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().to_string_lossy().to_string();

        let args = make_args(&["batch", &path, "--concurrency", "0"]);
        assert!(args.validate().is_err());

        let args = make_args(&["batch", &path, "--concurrency", "2"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_tolerances() {
        let mut args = make_args(&["init-config"]);
        args.min_precision = Some(0.0);
        assert!(args.validate().is_err());

        args.min_precision = Some(5000.0);
        args.max_misclosure = Some(-0.01);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_export_flags() {
        let args = make_args(&[
            "convert", "pts.csv", "--from", "4326", "--to", "32632", "--epsg", "32632",
        ]);
        assert_eq!(args.command.export().and_then(|e| e.epsg), Some(32632));
        assert!(make_args(&["init-config"]).command.export().is_none());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(&["init-config"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_output_format_extension() {
        assert_eq!(OutputFormat::Markdown.extension(), "md");
        assert_eq!(OutputFormat::Pdf.extension(), "pdf");
    }
}
