//! Concurrent execution of job files.
//!
//! Each job runs on tokio's blocking pool; at most `concurrency` run at a
//! time. A job that fails is recorded and the rest carry on.

use crate::cli::OutputFormat;
use crate::data::csv_io::{points_table, write_table};
use crate::data::kml::{write_kml, KmlDocument};
use crate::jobs::{load_job_file, Settings};
use crate::models::CalculationKind;
use crate::report::write_report;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Options shared by every job in a batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Directory the job files were found in.
    pub root: PathBuf,
    /// Directory receiving reports and exports.
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub concurrency: usize,
    pub show_progress: bool,
}

/// What happened to one job file.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Completed {
        /// Traverse precision denominator, when the job is a traverse.
        precision: Option<f64>,
        /// Leveling misclosure in metres, when the job is a level run.
        misclosure: Option<f64>,
        outputs: Vec<PathBuf>,
    },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub path: PathBuf,
    /// Known once the job file has been parsed.
    pub kind: Option<CalculationKind>,
    pub status: JobStatus,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Completed { .. })
    }
}

/// Output file stem for a job: its path below the root, flattened.
fn output_stem(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("_")
}

/// Run one job file and write its outputs.
fn process_job(
    path: &Path,
    settings: &Settings,
    options: &BatchOptions,
    kind: &mut Option<CalculationKind>,
) -> Result<JobStatus> {
    let job_file = load_job_file(path)?;
    *kind = Some(job_file.job.kind());

    let source = path.display().to_string();
    let outcome = job_file
        .run(settings, &source)
        .with_context(|| format!("{} failed", job_file.job.kind()))?;

    let stem = output_stem(&options.root, path);
    let mut outputs = Vec::new();

    let report_path = options
        .output_dir
        .join(format!("{}.{}", stem, options.format.extension()));
    write_report(&outcome.report, &report_path, options.format)?;
    outputs.push(report_path);

    let csv_path = options.output_dir.join(format!("{}.csv", stem));
    let table = if outcome.points.is_empty() {
        outcome.report.table.clone()
    } else {
        points_table(&outcome.points)
    };
    write_table(&csv_path, &table)
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    outputs.push(csv_path);

    if let Some(epsg) = outcome.points_epsg {
        if !outcome.points.is_empty() {
            let kml_path = options.output_dir.join(format!("{}.kml", stem));
            let doc = KmlDocument::from_points(
                outcome.report.metadata.title.as_str(),
                &outcome.points,
                epsg,
                true,
            )?;
            write_kml(&kml_path, &doc)?;
            outputs.push(kml_path);
        }
    }

    Ok(JobStatus::Completed {
        precision: outcome.precision,
        misclosure: outcome.misclosure,
        outputs,
    })
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Run every job file, returning one report per file in input order.
pub async fn run_batch(
    files: Vec<PathBuf>,
    settings: Settings,
    options: BatchOptions,
) -> Result<Vec<JobReport>> {
    std::fs::create_dir_all(&options.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            options.output_dir.display()
        )
    })?;

    info!(
        "Running {} job(s) with concurrency {}",
        files.len(),
        options.concurrency
    );

    let progress = if options.show_progress {
        Some(progress_bar(files.len())?)
    } else {
        None
    };
    let options = Arc::new(options);

    let mut results: Vec<(usize, JobReport)> = stream::iter(files.into_iter().enumerate())
        .map(|(index, path)| {
            let options = Arc::clone(&options);
            let progress = progress.clone();
            async move {
                let task_path = path.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let mut kind = None;
                    let status = process_job(&task_path, &settings, &options, &mut kind)
                        .unwrap_or_else(|e| JobStatus::Failed(format!("{:#}", e)));
                    (kind, status)
                })
                .await;

                let (kind, status) = match joined {
                    Ok(done) => done,
                    Err(e) => (None, JobStatus::Failed(format!("Job task panicked: {}", e))),
                };

                match &status {
                    JobStatus::Completed { .. } => debug!("Finished {}", path.display()),
                    JobStatus::Failed(reason) => error!("{}: {}", path.display(), reason),
                }
                if let Some(pb) = &progress {
                    pb.inc(1);
                }

                (index, JobReport { path, kind, status })
            }
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    if let Some(pb) = progress {
        pb.finish_with_message("Batch complete");
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, report)| report).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const COMPASS_JOB: &str = r#"
kind = "compass"
epsg = 32632
start_easting = 500000.0
start_northing = 5000000.0

[[legs]]
line = "A-B"
bearing = "0.0000"
distance = 100.0

[[legs]]
line = "B-C"
bearing = "90.0000"
distance = 100.0

[[legs]]
line = "C-A"
bearing = "225.0000"
distance = 141.43
"#;

    const LEVEL_JOB: &str = r#"
kind = "leveling"
start_elevation = 100.0

[[rows]]
station = "BM1"
backsight = 1.5
foresight = 1.0

[[rows]]
station = "TP1"
"#;

    fn options(root: &Path, out: &Path) -> BatchOptions {
        BatchOptions {
            root: root.to_path_buf(),
            output_dir: out.to_path_buf(),
            format: OutputFormat::Markdown,
            concurrency: 2,
            show_progress: false,
        }
    }

    #[test]
    fn test_output_stem_flattens_subdirectories() {
        let root = Path::new("/jobs");
        assert_eq!(output_stem(root, Path::new("/jobs/a.toml")), "a");
        assert_eq!(output_stem(root, Path::new("/jobs/site/b.toml")), "site_b");
    }

    #[tokio::test]
    async fn test_batch_writes_outputs_and_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::write(dir.path().join("compass.toml"), COMPASS_JOB).unwrap();
        fs::write(dir.path().join("level.toml"), LEVEL_JOB).unwrap();
        fs::write(
            dir.path().join("broken.toml"),
            "kind = \"compass\"\n[[legs]]\nline = \"A-B\"\nbearing = \"0.0000\"\ndistance = -5.0\n",
        )
        .unwrap();

        let files = vec![
            dir.path().join("broken.toml"),
            dir.path().join("compass.toml"),
            dir.path().join("level.toml"),
        ];
        let results = run_batch(files, Settings::default(), options(dir.path(), &out))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(!results[0].is_success());
        assert_eq!(results[0].kind, Some(CalculationKind::Compass));
        assert!(results[1].is_success());
        assert!(results[2].is_success());

        assert!(out.join("compass.md").exists());
        assert!(out.join("compass.csv").exists());
        assert!(out.join("compass.kml").exists());
        assert!(out.join("level.md").exists());
        assert!(out.join("level.csv").exists());
        assert!(!out.join("level.kml").exists());

        match &results[1].status {
            JobStatus::Completed { precision, .. } => assert!(precision.is_some()),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreadable_job_has_no_kind() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        fs::write(dir.path().join("junk.toml"), "this is not toml [").unwrap();

        let results = run_batch(
            vec![dir.path().join("junk.toml")],
            Settings::default(),
            options(dir.path(), &out),
        )
        .await
        .unwrap();

        assert_eq!(results[0].kind, None);
        assert!(matches!(results[0].status, JobStatus::Failed(_)));
    }

    #[test]
    fn test_empty_batch_creates_output_dir() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");

        let results =
            tokio_test::block_on(run_batch(Vec::new(), Settings::default(), options(dir.path(), &out)))
                .unwrap();

        assert!(results.is_empty());
        assert!(out.is_dir());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }
}
