//! Format-specific text extraction.
//!
//! Each extractor turns one file into a text blob. Which extractors exist in a
//! run is decided by an explicit [`Capabilities`] set; cargo features only
//! decide which of them can be compiled in.

pub mod text;

#[cfg(feature = "docx")]
pub mod docx;

#[cfg(feature = "epub")]
pub mod epub;

#[cfg(feature = "ocr")]
pub mod ocr;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Why an extractor could not produce text.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The file could not be read.
    #[error("cannot read '{path}': {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The container or markup is not what the format requires.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// An external program failed or could not be started.
    #[error("{tool} failed: {message}")]
    Tool {
        /// Program name
        tool: String,
        /// Error output or spawn error
        message: String,
    },
}

impl ExtractError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(message: impl fmt::Display) -> Self {
        Self::Malformed(message.to_string())
    }
}

/// A text extractor for one family of file formats.
pub trait Extractor {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns true if this extractor handles the lowercased extension
    /// (without the leading dot).
    fn can_handle(&self, extension: &str) -> bool;

    /// Extracts the full text of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] when the file cannot be read or decoded.
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// Optional extraction abilities a run may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Plain text and markdown
    PlainText,
    /// Word-processor documents (`.docx`)
    WordProcessor,
    /// E-book containers (`.epub`)
    Ebook,
    /// Optical character recognition for scanned PDFs
    Ocr,
}

impl Capability {
    /// Returns true if this build contains the capability.
    #[must_use]
    pub const fn is_compiled(self) -> bool {
        match self {
            Self::PlainText => true,
            Self::WordProcessor => cfg!(feature = "docx"),
            Self::Ebook => cfg!(feature = "epub"),
            Self::Ocr => cfg!(feature = "ocr"),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PlainText => "plain-text",
            Self::WordProcessor => "word-processor",
            Self::Ebook => "ebook",
            Self::Ocr => "ocr",
        };
        f.write_str(name)
    }
}

/// A set of requested capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    /// The empty set.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds a capability to the set.
    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    /// Returns true if the set contains `capability`.
    #[must_use]
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Iterates the set in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

/// External programs used for OCR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrSettings {
    /// `tesseract` executable
    pub tesseract_cmd: String,
    /// `pdftoppm` executable
    pub pdftoppm_cmd: String,
    /// Tesseract language code
    pub language: String,
    /// Directory for intermediate page images
    pub scratch_dir: PathBuf,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            pdftoppm_cmd: "pdftoppm".to_string(),
            language: "eng".to_string(),
            scratch_dir: std::env::temp_dir(),
        }
    }
}

/// Looks up the extractor for a file extension.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.extractors.iter().map(|e| e.name()))
            .finish()
    }
}

impl ExtractorRegistry {
    /// A registry with no extractors.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the registry for the requested capabilities.
    ///
    /// A capability this build does not contain is left out with a warning.
    #[must_use]
    #[cfg_attr(not(feature = "ocr"), allow(unused_variables))]
    pub fn from_capabilities(capabilities: &Capabilities, ocr_settings: &OcrSettings) -> Self {
        let mut registry = Self::empty();

        for capability in capabilities.iter() {
            if !capability.is_compiled() {
                warn!(
                    "Capability '{}' requested but not compiled into this build; skipping",
                    capability
                );
                continue;
            }

            match capability {
                Capability::PlainText => registry.register(Box::new(text::PlainTextExtractor)),
                #[cfg(feature = "docx")]
                Capability::WordProcessor => registry.register(Box::new(docx::DocxExtractor)),
                #[cfg(feature = "epub")]
                Capability::Ebook => registry.register(Box::new(epub::EpubExtractor)),
                #[cfg(feature = "ocr")]
                Capability::Ocr => registry.register(Box::new(ocr::OcrExtractor::new(ocr_settings.clone()))),
                #[allow(unreachable_patterns)]
                _ => {}
            }
        }

        registry
    }

    /// Adds an extractor. Later registrations take precedence.
    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        debug!("Registered extractor '{}'", extractor.name());
        self.extractors.push(extractor);
    }

    /// Finds the extractor for a lowercased extension.
    #[must_use]
    pub fn find(&self, extension: &str) -> Option<&dyn Extractor> {
        self.extractors
            .iter()
            .rev()
            .find(|e| e.can_handle(extension))
            .map(|e| &**e)
    }

    /// Number of registered extractors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    /// Returns true if no extractor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

/// Reads one entry of a zip container as UTF-8 text.
#[cfg(any(feature = "docx", feature = "epub"))]
pub(crate) fn read_zip_entry<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, ExtractError> {
    use std::io::Read;

    let mut entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::malformed(format!("missing entry '{name}': {e}")))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| ExtractError::malformed(format!("unreadable entry '{name}': {e}")))?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Opens a zip container.
#[cfg(any(feature = "docx", feature = "epub"))]
pub(crate) fn open_zip(path: &Path) -> Result<zip::ZipArchive<std::fs::File>, ExtractError> {
    let file = std::fs::File::open(path).map_err(|e| ExtractError::io(path, e))?;
    zip::ZipArchive::new(file).map_err(ExtractError::malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl Extractor for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn can_handle(&self, extension: &str) -> bool {
            extension == "txt"
        }

        fn extract(&self, _path: &Path) -> Result<String, ExtractError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_plain_text_is_always_compiled() {
        assert!(Capability::PlainText.is_compiled());
    }

    #[test]
    fn test_empty_registry_finds_nothing() {
        let registry = ExtractorRegistry::empty();
        assert!(registry.is_empty());
        assert!(registry.find("txt").is_none());
    }

    #[test]
    fn test_registry_from_plain_text_only() {
        let caps = Capabilities::none().with(Capability::PlainText);
        let registry = ExtractorRegistry::from_capabilities(&caps, &OcrSettings::default());

        assert_eq!(registry.len(), 1);
        assert!(registry.find("txt").is_some());
        assert!(registry.find("md").is_some());
        assert!(registry.find("pdf").is_none());
        assert!(registry.find("docx").is_none());
    }

    #[test]
    fn test_later_registration_wins() {
        let mut registry = ExtractorRegistry::empty();
        registry.register(Box::new(Fixed("first")));
        registry.register(Box::new(Fixed("second")));

        assert_eq!(registry.find("txt").map(|e| e.name()), Some("second"));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn test_ocr_capability_registers_pdf_extractor() {
        let caps = Capabilities::none().with(Capability::Ocr);
        let registry = ExtractorRegistry::from_capabilities(&caps, &OcrSettings::default());

        assert!(registry.find("pdf").is_some());
    }

    #[cfg(not(feature = "docx"))]
    #[test]
    fn test_uncompiled_capability_is_omitted() {
        let caps = Capabilities::none().with(Capability::WordProcessor);
        let registry = ExtractorRegistry::from_capabilities(&caps, &OcrSettings::default());

        assert!(registry.is_empty());
    }
}
