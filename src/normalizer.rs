//! Turns each source file into a stream of pages.
//!
//! Page-structured PDFs that already carry a text layer are passed through
//! page by page. Everything else goes through an extractor and the page
//! renderer.

use crate::extract::ExtractorRegistry;
use crate::file::{DocumentKind, SourceFile};
use crate::page::Page;
use crate::pdf::PdfSource;
use crate::render::PageRenderer;
use crate::report::{ReportBuilder, SkipReason};
use std::sync::Arc;
use tracing::{debug, trace};

/// Pages sampled when deciding whether a PDF has a text layer.
pub const NATIVE_SAMPLE_PAGES: usize = 5;

/// Sampled characters a PDF needs to count as native.
pub const NATIVE_TEXT_THRESHOLD: usize = 100;

/// A lazy, single-use sequence of pages from one source file.
pub type PageStream = Box<dyn Iterator<Item = Page>>;

/// Chooses between pass-through and conversion for each file.
pub struct DocumentNormalizer<'a> {
    registry: &'a ExtractorRegistry,
    renderer: PageRenderer,
    ocr_enabled: bool,
}

impl<'a> DocumentNormalizer<'a> {
    /// Creates a normalizer that converts through `registry`.
    #[must_use]
    pub const fn new(registry: &'a ExtractorRegistry, renderer: PageRenderer, ocr_enabled: bool) -> Self {
        Self {
            registry,
            renderer,
            ocr_enabled,
        }
    }

    /// Produces the page stream for `file`, or records why it has none.
    pub fn normalize(&self, file: Arc<SourceFile>, report: &mut ReportBuilder) -> Option<PageStream> {
        match self.try_normalize(Arc::clone(&file)) {
            Ok(stream) => Some(stream),
            Err(reason) => {
                report.skip(&file.name, &reason);
                None
            }
        }
    }

    /// Produces the page stream for `file`.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the file yields no pages.
    pub fn try_normalize(&self, file: Arc<SourceFile>) -> Result<PageStream, SkipReason> {
        let kind = file.kind();

        if kind.is_paginated() {
            if let Some(source) = self.open_native(&file)? {
                debug!("{}: native PDF, {} pages", file.name, source.page_count());
                return Ok(Box::new(NativePages::new(source, file)));
            }
            if !self.ocr_enabled {
                return Err(SkipReason::RequiresOcr);
            }
        }

        self.convert(file, kind)
    }

    /// Opens a PDF and keeps it only if it carries a text layer.
    fn open_native(&self, file: &SourceFile) -> Result<Option<PdfSource>, SkipReason> {
        let source = match PdfSource::open(&file.path) {
            Ok(source) => source,
            Err(e) => {
                debug!("{}: unreadable as PDF, treating as scanned: {}", file.name, e);
                return Ok(None);
            }
        };

        if source.page_count() == 0 {
            return Err(SkipReason::NoPages);
        }

        let sampled = source.sample_text(NATIVE_SAMPLE_PAGES).chars().count();
        trace!("{}: sampled {} characters", file.name, sampled);

        Ok((sampled > NATIVE_TEXT_THRESHOLD).then_some(source))
    }

    fn convert(&self, file: Arc<SourceFile>, kind: DocumentKind) -> Result<PageStream, SkipReason> {
        let extractor = self
            .registry
            .find(&file.extension)
            .ok_or_else(|| SkipReason::NoExtractor {
                extension: file.extension.clone(),
            })?;

        debug!("{}: converting with '{}' ({:?})", file.name, extractor.name(), kind);
        let text = extractor
            .extract(&file.path)
            .map_err(|e| SkipReason::ExtractionFailed {
                message: e.to_string(),
            })?;

        if text.trim().is_empty() {
            return Err(SkipReason::NoText);
        }

        Ok(Box::new(self.renderer.render(file, &text)))
    }
}

/// Pages of a native PDF, read one at a time.
struct NativePages {
    source: PdfSource,
    file: Arc<SourceFile>,
    next_index: usize,
}

impl NativePages {
    fn new(source: PdfSource, file: Arc<SourceFile>) -> Self {
        Self {
            source,
            file,
            next_index: 0,
        }
    }
}

impl Iterator for NativePages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.next_index >= self.source.page_count() {
            return None;
        }

        let index = self.next_index;
        self.next_index += 1;

        // A page whose content stream cannot be decoded keeps its slot with
        // no text.
        let text = self.source.page_text(index).unwrap_or_else(|e| {
            debug!("{} page {}: {}", self.file.name, index + 1, e);
            String::new()
        });
        let handle = self.source.page(index)?;

        Some(Page::native(Arc::clone(&self.file), index + 1, handle, text))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.source.page_count().saturating_sub(self.next_index);
        (remaining, Some(remaining))
    }
}
