//! msurvey - surveying computations from the command line
//!
//! Reduces traverses and level runs, solves triangulation, adjusts control
//! networks by least squares and converts coordinates, writing reports and
//! CSV/KML exports.
//!
//! Exit codes:
//!   0 - Success (all results within tolerance)
//!   1 - Runtime error (bad input, unsupported EPSG, failed batch job, etc.)
//!   2 - A result exceeded --min-precision or --max-misclosure

mod batch;
mod cli;
mod config;
mod core;
mod data;
mod error;
mod jobs;
mod models;
mod report;

use anyhow::{bail, Context, Result};
use cli::{Args, Command, ExportArgs};
use config::{Config, CONFIG_FILE};
use crate::core::angles::{dd_to_dms, dms_to_dd, format_dms, parse_angle, AngleFormat, AngleValue};
use crate::core::coords::{utm_epsg, utm_epsg_north, utm_zone};
use crate::core::leveling::VerticalAngle;
use data::csv_io::{points_table, read_records, write_table};
use data::kml::{write_kml, KmlDocument};
use jobs::{
    load_job_file, CompassJob, ConvertJob, IntersectionJob, Job, JobFile, LevelingJob,
    NetworkJob, Settings, TheodoliteJob, TriangulationJob, TrigLevelingJob,
};
use models::{CalculationKind, Outcome};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("msurvey v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Calculation failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .msurvey.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the angle format, export EPSG, network constants, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Dispatch the subcommand. Returns the exit code (0, 1 or 2).
async fn run(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args);
    config.merge_with_args(&args);
    let settings = Settings::from(&config);
    debug!("Settings: {:?}", settings);

    match &args.command {
        Command::Dms { value, to_dms } => handle_dms(value, *to_dms),
        Command::UtmZone { lon, lat } => handle_utm_zone(*lon, *lat),
        Command::Batch { dir, .. } => run_batch_command(&args, &config, settings, dir).await,
        Command::InitConfig => Ok(0),
        command => {
            let export = command.export().cloned().unwrap_or_default();
            let (job_file, source) = job_from_command(command, &export)?;
            run_calculation(&args, &config, &settings, job_file, &source, &export)
        }
    }
}

fn handle_dms(value: &str, to_dms: bool) -> Result<i32> {
    if to_dms {
        let dd = parse_angle(value, AngleFormat::Decimal)?;
        println!("{}", dd_to_dms(dd));
        println!("{}", format_dms(dd));
    } else {
        let dd = dms_to_dd(value)?;
        println!("{:.8}", dd);
        println!("{}", format_dms(dd));
    }
    Ok(0)
}

fn handle_utm_zone(lon: f64, lat: Option<f64>) -> Result<i32> {
    let zone = utm_zone(lon)?;
    let epsg = match lat {
        Some(lat) => utm_epsg(lon, lat)?,
        None => utm_epsg_north(lon)?,
    };
    let hemisphere = if epsg >= 32700 { "S" } else { "N" };

    println!("UTM zone {}{}", zone, hemisphere);
    println!("EPSG:{}", epsg);
    Ok(0)
}

/// Read a CSV input file with the path in any error.
fn read_input<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    read_records(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn inline_job(job: Job, export: &ExportArgs) -> JobFile {
    JobFile {
        title: None,
        epsg: export.epsg,
        job,
    }
}

/// Assemble the job for a calculation subcommand, with its source label.
fn job_from_command(command: &Command, export: &ExportArgs) -> Result<(JobFile, String)> {
    let source = |path: &PathBuf| path.display().to_string();

    let (job, source) = match command {
        Command::Compass {
            input,
            start_n,
            start_e,
            adjustment,
            ..
        } => (
            Job::Compass(CompassJob {
                start_easting: *start_e,
                start_northing: *start_n,
                adjustment: *adjustment,
                legs: read_input(input)?,
            }),
            source(input),
        ),
        Command::Theodolite {
            input,
            start_n,
            start_e,
            initial_azimuth,
            traverse_type,
            angle_type,
            ..
        } => (
            Job::Theodolite(TheodoliteJob {
                start_easting: *start_e,
                start_northing: *start_n,
                initial_azimuth: AngleValue::from(initial_azimuth.as_str()),
                traverse: *traverse_type,
                angles: *angle_type,
                legs: read_input(input)?,
            }),
            source(input),
        ),
        Command::Level {
            input,
            start_elevation,
            closing_elevation,
            ..
        } => (
            Job::Leveling(LevelingJob {
                start_elevation: *start_elevation,
                closing_elevation: *closing_elevation,
                rows: read_input(input)?,
            }),
            source(input),
        ),
        Command::TrigLevel {
            input,
            northing,
            easting,
            elevation,
            instrument_height,
            zenith,
            curvature,
            ..
        } => (
            Job::TrigLeveling(TrigLevelingJob {
                station: "STN".to_string(),
                northing: *northing,
                easting: *easting,
                elevation: *elevation,
                instrument_height: *instrument_height,
                vertical_angle: if *zenith {
                    VerticalAngle::Zenith
                } else {
                    VerticalAngle::Elevation
                },
                curvature: curvature.then_some(true),
                observations: read_input(input)?,
            }),
            source(input),
        ),
        Command::Intersect {
            a_e,
            a_n,
            b_e,
            b_n,
            angle_a,
            angle_b,
            side,
            ..
        } => (
            Job::Intersection(IntersectionJob {
                a_name: "A".to_string(),
                a_easting: *a_e,
                a_northing: *a_n,
                b_name: "B".to_string(),
                b_easting: *b_e,
                b_northing: *b_n,
                c_name: "C".to_string(),
                angle_a: AngleValue::from(angle_a.as_str()),
                angle_b: AngleValue::from(angle_b.as_str()),
                side: *side,
            }),
            "command line".to_string(),
        ),
        Command::Triangulate {
            input,
            start_e,
            start_n,
            base_distance,
            base_azimuth,
            exterior,
            ..
        } => (
            Job::Triangulation(TriangulationJob {
                start_easting: *start_e,
                start_northing: *start_n,
                base_distance: *base_distance,
                base_azimuth: AngleValue::from(base_azimuth.as_str()),
                exterior: *exterior,
                triangles: read_input(input)?,
            }),
            source(input),
        ),
        Command::Network {
            stations,
            observations,
            left_angles,
            ..
        } => (
            Job::Network(NetworkJob {
                left_angles: *left_angles,
                stations: read_input(stations)?,
                observations: read_input(observations)?,
            }),
            format!("{} + {}", source(stations), source(observations)),
        ),
        Command::Convert { input, from, to, .. } => (
            Job::Convert(ConvertJob {
                from: *from,
                to: *to,
                points: read_input(input)?,
            }),
            source(input),
        ),
        Command::Quad { job, .. } | Command::Run { job, .. } => {
            let mut file = load_job_file(job)?;
            if matches!(command, Command::Quad { .. })
                && file.job.kind() != CalculationKind::Quadrilateral
            {
                bail!(
                    "{} is a {} job, not a braced quadrilateral",
                    job.display(),
                    file.job.kind()
                );
            }
            if export.epsg.is_some() {
                file.epsg = export.epsg;
            }
            return Ok((file, source(job)));
        }
        Command::UtmZone { .. }
        | Command::Dms { .. }
        | Command::Batch { .. }
        | Command::InitConfig => bail!("Not a calculation command"),
    };

    Ok((inline_job(job, export), source))
}

/// Output file stem: the input's file stem plus the calculation name.
fn output_stem(source: &str, kind: CalculationKind) -> String {
    match Path::new(source).file_stem().and_then(|s| s.to_str()) {
        Some(stem) if Path::new(source).exists() => format!("{}_{}", stem, kind.slug()),
        _ => kind.slug().to_string(),
    }
}

/// Run one calculation, write its outputs and apply the quality gates.
fn run_calculation(
    args: &Args,
    config: &Config,
    settings: &Settings,
    job_file: JobFile,
    source: &str,
    export: &ExportArgs,
) -> Result<i32> {
    let kind = job_file.job.kind();
    let start_time = Instant::now();

    let outcome = job_file.run(settings, source)?;

    let output_dir = &config.general.output_dir;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let stem = output_stem(source, kind);
    let format = config.general.format;
    let report_path = output_dir.join(format!("{}.{}", stem, format.extension()));
    report::write_report(&outcome.report, &report_path, format)?;

    let mut exported = Vec::new();
    if export.csv {
        let csv_path = output_dir.join(format!("{}.csv", stem));
        let table = if outcome.points.is_empty() {
            outcome.report.table.clone()
        } else {
            points_table(&outcome.points)
        };
        write_table(&csv_path, &table)
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;
        exported.push(csv_path);
    }

    if export.kml {
        if outcome.points.is_empty() {
            warn!("{} produced no points; skipping KML export", kind);
        } else {
            let epsg = outcome.points_epsg.unwrap_or(config.export.epsg);
            let kml_path = output_dir.join(format!("{}.kml", stem));
            let doc = KmlDocument::from_points(
                outcome.report.metadata.title.as_str(),
                &outcome.points,
                epsg,
                true,
            )
            .with_context(|| format!("KML export from EPSG:{} failed", epsg))?;
            write_kml(&kml_path, &doc)?;
            exported.push(kml_path);
        }
    }

    print_outcome(&outcome);
    println!("   Duration: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("\n✅ Report saved to: {}", report_path.display());
    for path in &exported {
        println!("   Exported: {}", path.display());
    }

    Ok(check_tolerances(args, outcome.precision, outcome.misclosure))
}

fn print_outcome(outcome: &Outcome) {
    let report = &outcome.report;
    println!("\n📐 {}", report.metadata.title);
    for entry in &report.summary {
        println!("   {}: {}", entry.label, entry.value);
    }
    if !outcome.points.is_empty() {
        println!("   Points: {}", outcome.points.len());
    }
    for note in &report.notes {
        if !note.starts_with("Residual") {
            println!("   ⚠️  {}", note);
        }
    }
}

/// Apply --min-precision and --max-misclosure. Returns 2 on a breach, else 0.
fn check_tolerances(args: &Args, precision: Option<f64>, misclosure: Option<f64>) -> i32 {
    if let (Some(min), Some(p)) = (args.min_precision, precision) {
        if p < min {
            eprintln!(
                "\n⛔ Precision 1 in {:.0} is worse than 1 in {:.0}. Failing (exit code 2).",
                p, min
            );
            return 2;
        }
    }

    if let (Some(max), Some(m)) = (args.max_misclosure, misclosure) {
        if m.abs() > max {
            eprintln!(
                "\n⛔ Misclosure {:.4} m exceeds {:.4} m. Failing (exit code 2).",
                m, max
            );
            return 2;
        }
    }

    0
}

/// Run every job file in a directory.
async fn run_batch_command(
    args: &Args,
    config: &Config,
    settings: Settings,
    dir: &Path,
) -> Result<i32> {
    let start_time = Instant::now();

    let scanner = batch::JobScanner::new(dir.to_path_buf(), batch::ScanConfig::from(&config.batch));
    let files = scanner.scan();

    if files.is_empty() {
        println!("No job files found in {}", dir.display());
        return Ok(0);
    }
    println!("🔬 Running {} job file(s) from {}", files.len(), dir.display());

    let options = batch::BatchOptions {
        root: dir.to_path_buf(),
        output_dir: config.general.output_dir.clone(),
        format: config.general.format,
        concurrency: config.general.concurrency,
        show_progress: !args.quiet,
    };
    let results = batch::run_batch(files, settings, options).await?;

    let summary = batch::summarize(&results, start_time.elapsed().as_secs_f64());
    let summary_path = batch::write_summary(&config.general.output_dir, &summary)?;

    println!("\n📊 {}", batch::generate_summary_text(&summary));
    println!("\n✅ Batch summary saved to: {}", summary_path.display());

    let mut exit_code = 0;
    for result in &results {
        if let batch::JobStatus::Completed {
            precision,
            misclosure,
            ..
        } = &result.status
        {
            if check_tolerances(args, *precision, *misclosure) == 2 {
                eprintln!("   in {}", result.path.display());
                exit_code = 2;
            }
        }
    }

    if summary.failed > 0 {
        eprintln!("\n❌ {} job(s) failed", summary.failed);
        return Ok(1);
    }

    Ok(exit_code)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Config {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return match Config::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using defaults", e);
                Config::default()
            }
        };
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            config
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Config::default()
        }
    }
}
