use crate::{
    config::Config,
    error::{Error, Result},
    file::SourceFile,
    filter::FileFilter,
    report::{ReportBuilder, SkipReason},
};
use std::path::PathBuf;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Statistics collected during scanning.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanStats {
    /// Regular files seen in the source directory
    pub total_files: usize,

    /// Files that passed the name filter
    pub considered: usize,

    /// Files rejected for size
    pub oversized: usize,

    /// Entries that could not be read
    pub errors: usize,
}

/// Files selected for processing, in processing order.
#[derive(Debug, Default)]
pub(crate) struct ScanOutcome {
    /// Eligible files, sorted by name
    pub files: Vec<SourceFile>,

    /// Counters for the summary
    pub stats: ScanStats,
}

/// Lists the eligible files of the source directory.
pub(crate) struct Scanner {
    source_dir: PathBuf,
    max_file_size_bytes: u64,
    file_filter: FileFilter,
}

impl Scanner {
    /// Creates a new scanner from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an exclusion pattern is invalid.
    pub(crate) fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            source_dir: config.source_dir.clone(),
            max_file_size_bytes: config.max_file_size_bytes,
            file_filter: FileFilter::new(&config.file_types, &config.exclude_patterns)?,
        })
    }

    /// Scans the immediate children of the source directory.
    ///
    /// Oversized files are recorded in `report` and left out of the result
    /// without being opened.
    ///
    /// # Errors
    ///
    /// Returns an error if the source directory is missing or not a directory.
    pub(crate) fn scan(&self, report: &mut ReportBuilder) -> Result<ScanOutcome> {
        if !self.source_dir.is_dir() {
            return Err(Error::config(format!(
                "Source path is not a directory: {}",
                self.source_dir.display()
            )));
        }

        debug!("Scanning {}", self.source_dir.display());
        let mut stats = ScanStats::default();
        let mut candidates = Vec::new();

        let walker = WalkDir::new(&self.source_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    stats.errors += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            stats.total_files += 1;

            let name = entry.file_name().to_string_lossy();
            if !self.file_filter.should_process(&name) {
                trace!("Ignoring {}", name);
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => candidates.push(SourceFile::new(entry.path(), metadata.len())),
                Err(e) => {
                    warn!("Failed to read metadata for {}: {}", entry.path().display(), e);
                    stats.errors += 1;
                }
            }
        }

        // Deterministic, case-insensitive order; exact name breaks ties.
        candidates.sort_by_cached_key(|f| (f.name.to_lowercase(), f.name.clone()));
        stats.considered = candidates.len();

        let mut files = Vec::with_capacity(candidates.len());
        for file in candidates {
            if file.size_bytes > self.max_file_size_bytes {
                report.skip(
                    &file.name,
                    &SkipReason::ExceedsSizeCeiling {
                        size_bytes: file.size_bytes,
                        limit_bytes: self.max_file_size_bytes,
                    },
                );
                stats.oversized += 1;
                continue;
            }
            files.push(file);
        }

        debug!(
            "Scan complete: {} files, {} considered, {} oversized, {} errors",
            stats.total_files, stats.considered, stats.oversized, stats.errors
        );

        Ok(ScanOutcome { files, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use std::path::Path;

    fn create_test_config(source: &Path) -> Config {
        Config::builder()
            .source_dir(source)
            .output_dir(source.join("out"))
            .build()
            .unwrap()
    }

    fn names(outcome: &ScanOutcome) -> Vec<&str> {
        outcome.files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_scanner_finds_allowed_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("notes.txt").write_str("hello").unwrap();
        temp.child("paper.pdf").write_str("%PDF").unwrap();
        temp.child("image.png").write_binary(&[0u8; 16]).unwrap();

        let scanner = Scanner::new(&create_test_config(temp.path())).unwrap();
        let mut report = ReportBuilder::new();
        let outcome = scanner.scan(&mut report).unwrap();

        assert_eq!(names(&outcome), ["notes.txt", "paper.pdf"]);
        assert_eq!(outcome.stats.total_files, 3);
        assert_eq!(outcome.stats.considered, 2);
    }

    #[test]
    fn test_scanner_is_not_recursive() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("top.md").write_str("# top").unwrap();
        temp.child("nested").child("deep.md").write_str("# deep").unwrap();

        let scanner = Scanner::new(&create_test_config(temp.path())).unwrap();
        let outcome = scanner.scan(&mut ReportBuilder::new()).unwrap();

        assert_eq!(names(&outcome), ["top.md"]);
    }

    #[test]
    fn test_scanner_sorts_case_insensitively() {
        let temp = assert_fs::TempDir::new().unwrap();
        for name in ["beta.txt", "Alpha.txt", "alpha.txt", "Gamma.txt"] {
            temp.child(name).write_str("x").unwrap();
        }

        let scanner = Scanner::new(&create_test_config(temp.path())).unwrap();
        let outcome = scanner.scan(&mut ReportBuilder::new()).unwrap();

        assert_eq!(names(&outcome), ["Alpha.txt", "alpha.txt", "beta.txt", "Gamma.txt"]);
    }

    #[test]
    fn test_scanner_skips_oversized_files() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("small.txt").write_str("tiny").unwrap();
        temp.child("large.txt").write_str(&"x".repeat(4096)).unwrap();

        let config = Config::builder()
            .source_dir(temp.path())
            .output_dir(temp.path().join("out"))
            .max_file_size_bytes(1024)
            .build()
            .unwrap();
        let scanner = Scanner::new(&config).unwrap();
        let mut report = ReportBuilder::new();
        let outcome = scanner.scan(&mut report).unwrap();

        assert_eq!(names(&outcome), ["small.txt"]);
        assert_eq!(outcome.stats.considered, 2);
        assert_eq!(outcome.stats.oversized, 1);
        assert_eq!(report.skipped()[0].file, "large.txt");
        assert_eq!(
            report.skipped()[0].reason,
            "exceeds size ceiling (4096 bytes > 1024 bytes)"
        );
    }

    #[test]
    fn test_scanner_applies_exclusions() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("keep.txt").write_str("x").unwrap();
        temp.child("draft_skip.txt").write_str("x").unwrap();

        let config = Config::builder()
            .source_dir(temp.path())
            .output_dir(temp.path().join("out"))
            .exclude_patterns(vec!["draft_*".to_string()])
            .build()
            .unwrap();
        let outcome = Scanner::new(&config)
            .unwrap()
            .scan(&mut ReportBuilder::new())
            .unwrap();

        assert_eq!(names(&outcome), ["keep.txt"]);
    }

    #[test]
    fn test_scanner_missing_source_is_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = create_test_config(temp.path());
        let scanner = Scanner {
            source_dir: temp.path().join("missing"),
            ..Scanner::new(&config).unwrap()
        };

        assert!(scanner.scan(&mut ReportBuilder::new()).is_err());
    }
}
