//! Job file discovery for batch runs.
//!
//! Walks a directory tree and collects the files a batch should run,
//! honouring the configured extensions and exclusions.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Configuration for job discovery.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["toml"])
    pub extensions: Vec<String>,
    /// Directory or file names to skip (e.g., [".git", "out"])
    pub excludes: Vec<String>,
    /// Maximum number of job files to collect
    pub max_files: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from(&crate::config::BatchConfig::default())
    }
}

impl From<&crate::config::BatchConfig> for ScanConfig {
    fn from(config: &crate::config::BatchConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
            max_files: config.max_files,
        }
    }
}

/// Discovers job files under a root directory.
pub struct JobScanner {
    config: ScanConfig,
    root: PathBuf,
}

impl JobScanner {
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self { config, root }
    }

    /// Collect matching files in sorted path order, capped at `max_files`.
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.is_excluded(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.matches(entry.path()))
            .map(DirEntry::into_path)
            .collect();

        files.sort();
        if files.len() > self.config.max_files {
            debug!(
                "Found {} job files, keeping the first {}",
                files.len(),
                self.config.max_files
            );
            files.truncate(self.config.max_files);
        }

        files
    }

    /// Check if a file has one of the configured extensions.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.config
            .extensions
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(ext))
    }

    /// Hidden names and explicit excludes are skipped, directories included.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern.as_str())
    }
}
