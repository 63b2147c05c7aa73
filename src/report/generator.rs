//! Calculation report generation.
//!
//! Reports are rendered as Markdown, pretty-printed JSON, or handed to
//! the PDF layout in [`crate::data::pdf`].

use crate::cli::OutputFormat;
use crate::data::pdf::write_pdf_report;
use crate::models::{Report, ReportMetadata, SummaryEntry, Table};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str(&format!("# {}\n\n", report.metadata.title));

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Summary section
    output.push_str(&generate_summary_section(&report.summary));

    // Results
    output.push_str(&generate_results_section(&report.table));

    // Notes
    output.push_str(&generate_notes_section(&report.notes));

    // Footer
    output.push_str(&generate_footer(&report.metadata));

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Calculation:** {}\n", metadata.kind));
    section.push_str(&format!("- **Source:** `{}`\n", metadata.source));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push('\n');

    section
}

/// Generate the calculation summary as a two-column table.
fn generate_summary_section(summary: &[SummaryEntry]) -> String {
    if summary.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Calculation Summary\n\n");
    section.push_str("| Quantity | Value |\n");
    section.push_str("|:---|---:|\n");
    for entry in summary {
        section.push_str(&format!(
            "| {} | {} |\n",
            escape_cell(&entry.label),
            escape_cell(&entry.value)
        ));
    }
    section.push('\n');

    section
}

/// Generate the results table.
fn generate_results_section(table: &Table) -> String {
    let mut section = String::new();

    section.push_str("## Results\n\n");

    if table.is_empty() {
        section.push_str("No result rows.\n\n");
        return section;
    }

    section.push_str(&markdown_row(&table.headers));
    section.push('|');
    for _ in &table.headers {
        section.push_str("---:|");
    }
    section.push('\n');

    for row in &table.rows {
        section.push_str(&markdown_row(row));
    }
    section.push('\n');

    section
}

fn markdown_row(cells: &[String]) -> String {
    let cells: Vec<String> = cells.iter().map(|c| escape_cell(c)).collect();
    format!("| {} |\n", cells.join(" | "))
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Generate the notes section.
fn generate_notes_section(notes: &[String]) -> String {
    if notes.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Notes\n\n");
    for note in notes {
        section.push_str(&format!("- {}\n", note));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer(metadata: &ReportMetadata) -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by msurvey {}*\n",
        metadata.tool_version
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write the report to a file in the requested format.
pub fn write_report(report: &Report, path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Markdown => {
            write_text(path, &generate_markdown_report(report))?;
        }
        OutputFormat::Json => {
            write_text(path, &generate_json_report(report)?)?;
        }
        OutputFormat::Pdf => {
            write_pdf_report(path, report)
                .with_context(|| format!("Failed to write PDF report: {}", path.display()))?;
        }
    }

    info!("Report written to {}", path.display());
    Ok(())
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    file.write_all(content.as_bytes())?;
    Ok(())
}
