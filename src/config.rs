//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.msurvey.toml` files.

use crate::cli::{Args, Command, OutputFormat};
use crate::core::angles::AngleFormat;
use crate::core::leveling::CURVATURE_REFRACTION_COEFFICIENT;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".msurvey.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Angle input settings.
    #[serde(default)]
    pub angles: AnglesConfig,

    /// Leveling constants.
    #[serde(default)]
    pub leveling: LevelingConfig,

    /// Least squares settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Export settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Batch settings.
    #[serde(default)]
    pub batch: BatchConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory receiving reports and exports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Report format.
    #[serde(default)]
    pub format: OutputFormat,

    /// Number of concurrent batch jobs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            verbose: false,
            format: OutputFormat::Markdown,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_concurrency() -> usize {
    4
}

/// How angle text in input files is read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnglesConfig {
    #[serde(default)]
    pub format: AngleFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelingConfig {
    /// Apply curvature and refraction to trigonometric heights.
    #[serde(default)]
    pub curvature_refraction: bool,

    /// Combined coefficient in metres per km².
    #[serde(default = "default_curvature_coefficient")]
    pub curvature_coefficient: f64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            curvature_refraction: false,
            curvature_coefficient: default_curvature_coefficient(),
        }
    }
}

fn default_curvature_coefficient() -> f64 {
    CURVATURE_REFRACTION_COEFFICIENT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Largest coordinate correction in metres that counts as converged.
    #[serde(default = "default_convergence")]
    pub convergence: f64,

    /// Default distance standard deviation in metres.
    #[serde(default = "default_distance_sd")]
    pub distance_sd: f64,

    /// Default angle standard deviation in arc-seconds.
    #[serde(default = "default_angle_sd")]
    pub angle_sd: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            convergence: default_convergence(),
            distance_sd: default_distance_sd(),
            angle_sd: default_angle_sd(),
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

fn default_convergence() -> f64 {
    0.001
}

fn default_distance_sd() -> f64 {
    0.005
}

fn default_angle_sd() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// EPSG code of plane coordinates when a job does not name one.
    #[serde(default = "default_epsg")]
    pub epsg: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            epsg: default_epsg(),
        }
    }
}

fn default_epsg() -> u32 {
    32632
}

/// Job discovery settings for batch mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// File extensions to include.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Names to exclude.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    /// Maximum job files per batch.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            excludes: default_excludes(),
            max_files: default_max_files(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["toml".to_string()]
}

fn default_excludes() -> Vec<String> {
    vec![".git", "target", "out"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_files() -> usize {
    500
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(format) = args.format {
            self.general.format = format;
        }
        if let Some(ref output) = args.output {
            self.general.output_dir = output.clone();
        }
        if let Some(angle_format) = args.angle_format {
            self.angles.format = angle_format;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }

        match &args.command {
            Command::Batch {
                concurrency: Some(concurrency),
                ..
            } => {
                self.general.concurrency = *concurrency;
            }
            Command::TrigLevel {
                curvature: true, ..
            } => {
                self.leveling.curvature_refraction = true;
            }
            _ => {}
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
