//! File name selection for the source enumerator.
//!
//! An extension allow-list and optional exclusion globs, both matched
//! case-insensitively against the bare file name.

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Decides which file names are eligible for processing.
#[derive(Debug, Clone)]
pub(crate) struct FileFilter {
    allowed: GlobSet,
    excluded: GlobSet,
}

impl FileFilter {
    /// Builds a filter from dotted extensions (`.pdf`) and exclusion globs.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is not a valid glob.
    pub(crate) fn new(extensions: &[String], exclude_patterns: &[String]) -> Result<Self> {
        let allow_patterns: Vec<String> = extensions
            .iter()
            .map(|ext| format!("*{}", ext))
            .collect();

        Ok(Self {
            allowed: Self::build_globset(&allow_patterns)?,
            excluded: Self::build_globset(exclude_patterns)?,
        })
    }

    fn build_globset(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::config(format!("Invalid glob pattern '{}': {}", pattern, e)))?;
            builder.add(glob);
        }

        builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build glob set: {}", e)))
    }

    /// Returns true if `file_name` has an allowed extension and matches no
    /// exclusion.
    pub(crate) fn should_process(&self, file_name: &str) -> bool {
        self.allowed.is_match(file_name) && !self.excluded.is_match(file_name)
    }
}
