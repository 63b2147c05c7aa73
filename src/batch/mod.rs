//! Batch mode: run a directory of job files.

mod aggregate;
mod runner;
mod scanner;

pub use aggregate::{generate_summary_text, summarize, write_summary};
pub use runner::{run_batch, BatchOptions, JobStatus};
pub use scanner::{JobScanner, ScanConfig};
