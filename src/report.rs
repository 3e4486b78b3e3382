use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Why a file or page was left out of every artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SkipReason {
    /// File is larger than the configured byte ceiling.
    ExceedsSizeCeiling {
        /// Size of the file
        size_bytes: u64,
        /// Configured ceiling
        limit_bytes: u64,
    },
    /// Page-image PDF while OCR is turned off.
    RequiresOcr,
    /// No extractor for the extension is registered.
    NoExtractor {
        /// Lowercased extension without the dot
        extension: String,
    },
    /// The extractor reported an error.
    ExtractionFailed {
        /// Extractor error message
        message: String,
    },
    /// Extraction succeeded but produced only whitespace.
    NoText,
    /// A page by itself is over the token ceiling.
    PageTooLarge {
        /// Token count of the page
        tokens: usize,
    },
    /// A whole file, packed as one unit, is over the token ceiling.
    FileTooLarge {
        /// Token count of the file
        tokens: usize,
    },
    /// The token counter failed and strict counting is enabled.
    TokenCountFailed,
    /// A page-structured document with zero pages.
    NoPages,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExceedsSizeCeiling {
                size_bytes,
                limit_bytes,
            } => write!(
                f,
                "exceeds size ceiling ({size_bytes} bytes > {limit_bytes} bytes)"
            ),
            Self::RequiresOcr => f.write_str("requires OCR, disabled"),
            Self::NoExtractor { extension } => {
                write!(f, "no extractor available for .{extension} in this build")
            }
            Self::ExtractionFailed { message } => write!(f, "extraction failed: {message}"),
            Self::NoText => f.write_str("no text extracted or file is unreadable"),
            Self::PageTooLarge { tokens } => write!(f, "page too large: {tokens} tokens"),
            Self::FileTooLarge { tokens } => write!(f, "file too large: {tokens} tokens"),
            Self::TokenCountFailed => f.write_str("token count failed"),
            Self::NoPages => f.write_str("document has no pages"),
        }
    }
}

/// One finalized artifact and what went into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Artifact file name
    pub output_file: String,
    /// Sorted, distinct source file names
    pub source_files: Vec<String>,
    /// Sum of page token counts
    pub total_tokens: usize,
    /// Artifact size in MB, two decimals
    pub total_size_mb: f64,
}

impl MergeRecord {
    /// Creates a record, rounding the byte size to MB with two decimals.
    #[must_use]
    pub fn new(
        output_file: impl Into<String>,
        source_files: Vec<String>,
        total_tokens: usize,
        size_bytes: u64,
    ) -> Self {
        Self {
            output_file: output_file.into(),
            source_files,
            total_tokens,
            total_size_mb: round_mb(size_bytes),
        }
    }
}

/// One skip event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    /// Source file name
    pub file: String,
    /// Human-readable reason
    pub reason: String,
}

/// Provenance of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Artifacts in finalization order
    pub merged_files: Vec<MergeRecord>,
    /// Skip events in the order they happened
    pub skipped_files: Vec<SkipRecord>,
    /// Files that passed the extension filter
    pub total_files_processed: usize,
    /// Wall-clock time the report was built
    pub generated_at: String,
}

impl Report {
    /// Reads a report back from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a report.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Writes the report as pretty JSON through a temp file and rename.
    ///
    /// # Errors
    ///
    /// Returns an error if any step of the write fails.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let temp_path = path.with_extension("json.tmp");
        let file = fs::File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(|e| Error::io(&temp_path, e))?;

        let file = writer
            .into_inner()
            .map_err(|e| Error::io(&temp_path, e.into_error()))?;
        file.sync_all().map_err(|e| Error::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, path).map_err(|e| Error::io(path, e))?;
        debug!("Wrote report to {}", path.display());

        Ok(())
    }
}

/// Append-only accumulator for merge and skip records.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    merged: Vec<MergeRecord>,
    skipped: Vec<SkipRecord>,
    files_considered: usize,
}

impl ReportBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records how many files passed the extension filter.
    pub fn set_files_considered(&mut self, count: usize) {
        self.files_considered = count;
    }

    /// Records a skip event for `file`.
    pub fn skip(&mut self, file: &str, reason: &SkipReason) {
        warn!("Skipping {}: {}", file, reason);
        self.skipped.push(SkipRecord {
            file: file.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Records a finalized artifact.
    pub fn merge(&mut self, record: MergeRecord) {
        self.merged.push(record);
    }

    /// Merge records so far.
    #[must_use]
    pub fn merged(&self) -> &[MergeRecord] {
        &self.merged
    }

    /// Skip records so far.
    #[must_use]
    pub fn skipped(&self) -> &[SkipRecord] {
        &self.skipped
    }

    /// Files considered so far.
    #[must_use]
    pub const fn files_considered(&self) -> usize {
        self.files_considered
    }

    /// Finishes the report, stamping the current time.
    #[must_use]
    pub fn build(self) -> Report {
        Report {
            merged_files: self.merged,
            skipped_files: self.skipped,
            total_files_processed: self.files_considered,
            generated_at: chrono::Local::now().to_rfc3339(),
        }
    }
}

fn round_mb(size_bytes: u64) -> f64 {
    (size_bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}
