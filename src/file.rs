use std::path::{Path, PathBuf};

/// Document families the normalizer knows how to treat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Page-structured document, native or scanned
    Pdf,
    /// Plain or lightly marked-up text
    Text,
    /// Word-processor document
    WordProcessor,
    /// E-book container
    Ebook,
    /// Anything else that passed the extension allow-list
    Other,
}

impl DocumentKind {
    /// Classifies a lowercased extension (without the leading dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "pdf" => Self::Pdf,
            "txt" | "md" | "text" => Self::Text,
            "docx" => Self::WordProcessor,
            "epub" => Self::Ebook,
            _ => Self::Other,
        }
    }

    /// Returns true for page-structured documents.
    #[must_use]
    pub const fn is_paginated(self) -> bool {
        matches!(self, Self::Pdf)
    }
}

/// A file selected for processing by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Full path to the file
    pub path: PathBuf,

    /// File name as reported in the provenance report
    pub name: String,

    /// Lowercased extension without the leading dot (may be empty)
    pub extension: String,

    /// Size in bytes at enumeration time
    pub size_bytes: u64,
}

impl SourceFile {
    /// Creates a source file record from a path and its size.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let extension = extension_of(&path);

        Self {
            path,
            name,
            extension,
            size_bytes,
        }
    }

    /// Returns the document family implied by the extension.
    #[must_use]
    pub fn kind(&self) -> DocumentKind {
        DocumentKind::from_extension(&self.extension)
    }
}

/// Lowercased extension of `path`, empty when there is none.
#[must_use]
pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_file_fields() {
        let file = SourceFile::new("/data/Report.PDF", 2048);

        assert_eq!(file.name, "Report.PDF");
        assert_eq!(file.extension, "pdf");
        assert_eq!(file.size_bytes, 2048);
        assert_eq!(file.kind(), DocumentKind::Pdf);
    }

    #[test]
    fn test_source_file_without_extension() {
        let file = SourceFile::new("/data/README", 10);
        assert_eq!(file.extension, "");
        assert_eq!(file.kind(), DocumentKind::Other);
    }

    #[test]
    fn test_document_kind_from_extension() {
        assert_eq!(DocumentKind::from_extension("txt"), DocumentKind::Text);
        assert_eq!(DocumentKind::from_extension("md"), DocumentKind::Text);
        assert_eq!(DocumentKind::from_extension("docx"), DocumentKind::WordProcessor);
        assert_eq!(DocumentKind::from_extension("epub"), DocumentKind::Ebook);
        assert!(DocumentKind::Pdf.is_paginated());
        assert!(!DocumentKind::Text.is_paginated());
    }
}
