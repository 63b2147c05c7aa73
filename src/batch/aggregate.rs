//! Batch result aggregation and statistics.

use crate::batch::runner::{JobReport, JobStatus};
use crate::models::CalculationKind;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the batch summary written into the output directory.
pub const SUMMARY_FILE: &str = "batch_summary.md";

/// Totals over a finished batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_kind: BTreeMap<CalculationKind, usize>,
    /// (job file, reason)
    pub failures: Vec<(String, String)>,
    /// Lowest traverse precision denominator, i.e. the worst ratio.
    pub worst_precision: Option<(String, f64)>,
    /// Largest absolute leveling misclosure.
    pub worst_misclosure: Option<(String, f64)>,
    pub duration_seconds: f64,
}

/// Aggregate job reports into a summary.
pub fn summarize(results: &[JobReport], duration_seconds: f64) -> BatchSummary {
    let mut summary = BatchSummary {
        total: results.len(),
        duration_seconds,
        ..Default::default()
    };

    for result in results {
        let name = result.path.display().to_string();
        if let Some(kind) = result.kind {
            *summary.by_kind.entry(kind).or_default() += 1;
        }

        match &result.status {
            JobStatus::Completed {
                precision,
                misclosure,
                ..
            } => {
                summary.succeeded += 1;

                if let Some(p) = precision {
                    let worse = summary
                        .worst_precision
                        .as_ref()
                        .map_or(true, |(_, current)| p < current);
                    if worse {
                        summary.worst_precision = Some((name.clone(), *p));
                    }
                }
                if let Some(m) = misclosure {
                    let worse = summary
                        .worst_misclosure
                        .as_ref()
                        .map_or(true, |(_, current)| m.abs() > current.abs());
                    if worse {
                        summary.worst_misclosure = Some((name.clone(), *m));
                    }
                }
            }
            JobStatus::Failed(reason) => {
                summary.failed += 1;
                summary.failures.push((name, reason.clone()));
            }
        }
    }

    summary
}

/// Render the summary as Markdown.
pub fn generate_summary_markdown(summary: &BatchSummary) -> String {
    let mut output = String::new();

    output.push_str("# Batch Summary\n\n");
    output.push_str(&format!("- **Jobs:** {}\n", summary.total));
    output.push_str(&format!("- **Succeeded:** {}\n", summary.succeeded));
    output.push_str(&format!("- **Failed:** {}\n", summary.failed));
    output.push_str(&format!(
        "- **Duration:** {:.1}s\n\n",
        summary.duration_seconds
    ));

    if !summary.by_kind.is_empty() {
        output.push_str("## Jobs by Calculation\n\n");
        output.push_str("| Calculation | Jobs |\n");
        output.push_str("|:---|:---:|\n");
        for (kind, count) in &summary.by_kind {
            output.push_str(&format!("| {} | {} |\n", kind, count));
        }
        output.push('\n');
    }

    if summary.worst_precision.is_some() || summary.worst_misclosure.is_some() {
        output.push_str("## Quality\n\n");
        if let Some((file, precision)) = &summary.worst_precision {
            output.push_str(&format!(
                "- **Worst traverse precision:** 1 in {:.0} (`{}`)\n",
                precision, file
            ));
        }
        if let Some((file, misclosure)) = &summary.worst_misclosure {
            output.push_str(&format!(
                "- **Largest leveling misclosure:** {:.4} m (`{}`)\n",
                misclosure, file
            ));
        }
        output.push('\n');
    }

    if !summary.failures.is_empty() {
        output.push_str("## Failures\n\n");
        for (file, reason) in &summary.failures {
            output.push_str(&format!("- `{}`: {}\n", file, reason));
        }
        output.push('\n');
    }

    output
}

/// Short plain-text form for the console.
pub fn generate_summary_text(summary: &BatchSummary) -> String {
    let mut lines = vec![format!(
        "{} job(s): {} succeeded, {} failed",
        summary.total, summary.succeeded, summary.failed
    )];

    for (kind, count) in &summary.by_kind {
        lines.push(format!("- {}: {}", kind, count));
    }
    if let Some((file, precision)) = &summary.worst_precision {
        lines.push(format!("Worst precision: 1 in {:.0} ({})", precision, file));
    }
    if let Some((file, misclosure)) = &summary.worst_misclosure {
        lines.push(format!("Largest misclosure: {:.4} m ({})", misclosure, file));
    }

    lines.join("\n")
}

/// Write `batch_summary.md` into the output directory.
pub fn write_summary(output_dir: &Path, summary: &BatchSummary) -> Result<PathBuf> {
    let path = output_dir.join(SUMMARY_FILE);
    std::fs::write(&path, generate_summary_markdown(summary))
        .with_context(|| format!("Failed to write batch summary: {}", path.display()))?;
    Ok(path)
}
