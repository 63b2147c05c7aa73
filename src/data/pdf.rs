//! PDF calculation reports.
//!
//! Pages are A4 portrait. The layout is a title, the generation time, the
//! calculation summary as label/value pairs, then the result table with
//! its header row repeated at the top of every page, then any notes.

use crate::error::{Result, SurveyError};
use crate::models::{Report, Table};
use printpdf::{
    BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference,
    Point,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 15.0;
const BODY_SIZE: f32 = 10.0;
const TABLE_SIZE: f32 = 8.0;
/// Approximate Helvetica advance per character and point size, in mm.
const CHAR_WIDTH_PER_PT: f32 = 0.19;

struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| SurveyError::Pdf(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| SurveyError::Pdf(e.to_string()))?;
        let layer = doc.get_page(page).get_layer(layer);

        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            y: PAGE_HEIGHT - MARGIN,
            pages: 1,
        })
    }

    fn new_page(&mut self) {
        self.pages += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Page {}", self.pages),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_HEIGHT - MARGIN;
    }

    /// Move down by `height`, starting a new page if it would not fit.
    /// Returns true when a page break happened.
    fn advance(&mut self, height: f32) -> bool {
        if self.y - height < MARGIN {
            self.new_page();
            self.y -= height;
            true
        } else {
            self.y -= height;
            false
        }
    }

    fn text(&self, text: &str, size: f32, x: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(pdf_text(text), size, Mm(x), Mm(self.y), font);
    }

    fn rule(&self, y: f32) {
        let line = Line {
            points: vec![
                (Point::new(Mm(MARGIN), Mm(y)), false),
                (Point::new(Mm(PAGE_WIDTH - MARGIN), Mm(y)), false),
            ],
            is_closed: false,
        };
        self.layer.add_line(line);
    }

    fn heading(&mut self, text: &str) {
        self.advance(10.0);
        self.text(text, 13.0, MARGIN, true);
        self.advance(2.0);
    }

    fn table_row(&mut self, cells: &[String], widths: &[f32], bold: bool) {
        let mut x = MARGIN;
        for (cell, width) in cells.iter().zip(widths) {
            self.text(&clip(cell, *width, TABLE_SIZE), TABLE_SIZE, x, bold);
            x += width;
        }
    }

    fn table(&mut self, table: &Table) {
        if table.headers.is_empty() {
            return;
        }

        let usable = PAGE_WIDTH - 2.0 * MARGIN;
        let widths = vec![usable / table.headers.len() as f32; table.headers.len()];
        let row_height = TABLE_SIZE * 0.55;

        self.advance(row_height);
        self.table_row(&table.headers, &widths, true);
        self.rule(self.y - 1.5);

        for row in &table.rows {
            if self.advance(row_height + 0.5) {
                self.table_row(&table.headers, &widths, true);
                self.rule(self.y - 1.5);
                self.advance(row_height + 0.5);
            }
            self.table_row(row, &widths, false);
        }
    }

    fn save(self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.doc
            .save(&mut writer)
            .map_err(|e| SurveyError::Pdf(e.to_string()))
    }
}

/// Builtin fonts are WinAnsi encoded: Latin-1 passes through, other symbols
/// are spelled out.
fn pdf_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'Δ' => "d".to_string(),
            'Σ' => "Sum ".to_string(),
            c if c.is_ascii() || ('\u{a0}'..='\u{ff}').contains(&c) => c.to_string(),
            _ => "?".to_string(),
        })
        .collect()
}

/// Truncate text to what fits in `width` mm at `size` pt.
fn clip(text: &str, width: f32, size: f32) -> String {
    let max_chars = ((width - 1.0) / (CHAR_WIDTH_PER_PT * size)).floor().max(1.0) as usize;
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut clipped: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        clipped.push('~');
        clipped
    }
}

/// Lay out a report as a PDF document.
pub fn write_pdf_report(path: &Path, report: &Report) -> Result<()> {
    let mut page = PageWriter::new(&report.metadata.title)?;

    page.advance(6.0);
    page.text(&report.metadata.title, 18.0, MARGIN, true);
    page.advance(7.0);
    page.text(
        &format!(
            "{} | generated {} | source: {}",
            report.metadata.kind,
            report.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            report.metadata.source
        ),
        9.0,
        MARGIN,
        false,
    );

    if !report.summary.is_empty() {
        page.heading("Calculation Summary");
        for entry in &report.summary {
            page.advance(BODY_SIZE * 0.55);
            page.text(&clip(&entry.label, 60.0, BODY_SIZE), BODY_SIZE, MARGIN, true);
            page.text(
                &clip(&entry.value, 115.0, BODY_SIZE),
                BODY_SIZE,
                MARGIN + 65.0,
                false,
            );
        }
    }

    if !report.table.is_empty() {
        page.heading("Results");
        page.table(&report.table);
    }

    if !report.notes.is_empty() {
        page.heading("Notes");
        for note in &report.notes {
            page.advance(BODY_SIZE * 0.55);
            let line = clip(&format!("- {}", note), PAGE_WIDTH - 2.0 * MARGIN, BODY_SIZE);
            page.text(&line, BODY_SIZE, MARGIN, false);
        }
    }

    let pages = page.pages;
    page.save(path)?;
    info!("PDF report ({} page(s)) written to {}", pages, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CalculationKind;
    use tempfile::TempDir;

    #[test]
    fn test_clip() {
        assert_eq!(clip("short", 30.0, 8.0), "short");
        let clipped = clip(&"x".repeat(100), 30.0, 8.0);
        assert!(clipped.ends_with('~'));
        assert!(clipped.len() < 100);
    }

    #[test]
    fn test_pdf_text_keeps_latin1() {
        assert_eq!(pdf_text("45°30'15.0\""), "45°30'15.0\"");
        assert_eq!(pdf_text("ΔH"), "dH");
        assert_eq!(pdf_text("Müller ± Estación"), "Müller ± Estación");
        assert_eq!(pdf_text("σ₀²"), "??²");
    }

    #[test]
    fn test_write_multi_page_report() {
        let mut report = Report::new(CalculationKind::Leveling, "Level Run", "inline");
        report.add_summary("Misclosure", "0.0000 m");
        report.table = Table::new(["Station", "BS", "FS", "Elevation"]);
        for i in 0..150 {
            report
                .table
                .push_row(vec![format!("TP{}", i), "1.0".into(), "1.0".into(), "100.0".into()]);
        }
        report.notes.push("Closing benchmark not given".to_string());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        write_pdf_report(&path, &report).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
