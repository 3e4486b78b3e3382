use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Run-level failures of the packing pipeline.
///
/// File- and page-level problems never surface here; they become
/// [`SkipReason`](crate::SkipReason) entries in the report instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// IO error with context about the file path.
    #[error("IO error accessing '{path}': {message}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Detailed error message
        message: String,
    },

    /// Invalid output pattern.
    #[error("Invalid output pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The invalid pattern
        pattern: String,
        /// Reason why it's invalid
        reason: String,
    },

    /// PDF document could not be built or serialized.
    #[error("PDF error for '{path}': {message}")]
    Pdf {
        /// Document the error relates to
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Tokenizer model could not be resolved.
    #[error("Tokenizer model '{model}' is unavailable: {message}")]
    Tokenizer {
        /// Requested model identifier
        model: String,
        /// Error message
        message: String,
    },

    /// JSON or YAML serialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Creates an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid pattern error.
    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Creates a PDF error.
    #[must_use]
    pub fn pdf(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Pdf {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Creates a tokenizer resolution error.
    #[must_use]
    pub fn tokenizer(model: impl Into<String>, message: impl ToString) -> Self {
        Self::Tokenizer {
            model: model.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this is an IO error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidPattern { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("test message");
        assert!(err.is_config());
        assert!(err.to_string().contains("test message"));
    }

    #[test]
    fn test_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io("/tmp/test.txt", io_err);
        assert!(err.is_io());
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn test_invalid_pattern_is_config() {
        let err = Error::invalid_pattern("out.pdf", "missing {index}");
        assert!(err.is_config());
        assert!(err.to_string().contains("out.pdf"));
    }

    #[test]
    fn test_serialization_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_tokenizer_error_mentions_model() {
        let err = Error::tokenizer("no-such-model", "unknown");
        assert!(err.to_string().contains("no-such-model"));
    }
}
