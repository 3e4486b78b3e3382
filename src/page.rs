//! Pages: the unit the packer moves around.

use crate::file::SourceFile;
use crate::pdf::NativePage;
use crate::token::TokenEstimator;
use once_cell::unsync::OnceCell;
use std::sync::Arc;

/// Where a page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOrigin {
    /// Read directly from a page-structured source
    Native,
    /// Produced by the page renderer from extracted text
    Rendered,
}

#[derive(Debug, Clone)]
enum PageBody {
    Rendered(Vec<String>),
    Native { text: String, handle: NativePage },
}

/// A single page of a source document.
#[derive(Debug, Clone)]
pub struct Page {
    source: Arc<SourceFile>,
    number: usize,
    body: PageBody,
    tokens: OnceCell<Option<usize>>,
}

impl Page {
    fn with_body(source: Arc<SourceFile>, number: usize, body: PageBody) -> Self {
        Self {
            source,
            number,
            body,
            tokens: OnceCell::new(),
        }
    }

    /// Creates a rendered page from already laid-out lines.
    #[must_use]
    pub fn rendered(source: Arc<SourceFile>, number: usize, lines: Vec<String>) -> Self {
        Self::with_body(source, number, PageBody::Rendered(lines))
    }

    /// Creates a rendered page from a text block, one line per `\n`.
    #[must_use]
    pub fn from_text(source: Arc<SourceFile>, number: usize, text: &str) -> Self {
        let lines = text.lines().map(str::to_string).collect();
        Self::rendered(source, number, lines)
    }

    /// Creates a page that is copied as-is out of a source PDF.
    ///
    /// `text` is the page's text layer, used only for token counting.
    #[must_use]
    pub fn native(source: Arc<SourceFile>, number: usize, handle: NativePage, text: String) -> Self {
        Self::with_body(source, number, PageBody::Native { text, handle })
    }

    /// The source document this page belongs to.
    #[must_use]
    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    /// 1-based position within the source document.
    #[must_use]
    pub const fn number(&self) -> usize {
        self.number
    }

    /// How the page was produced.
    #[must_use]
    pub const fn origin(&self) -> PageOrigin {
        match self.body {
            PageBody::Rendered(_) => PageOrigin::Rendered,
            PageBody::Native { .. } => PageOrigin::Native,
        }
    }

    /// Laid-out text lines in reading order. Empty for native pages.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        match &self.body {
            PageBody::Rendered(lines) => lines,
            PageBody::Native { .. } => &[],
        }
    }

    /// The source page object, for native pages.
    #[must_use]
    pub fn native_page(&self) -> Option<&NativePage> {
        match &self.body {
            PageBody::Native { handle, .. } => Some(handle),
            PageBody::Rendered(_) => None,
        }
    }

    /// Page text: the text layer of a native page, or the rendered lines
    /// joined by `\n`.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.body {
            PageBody::Rendered(lines) => lines.join("\n"),
            PageBody::Native { text, .. } => text.clone(),
        }
    }

    /// Token count, computed on first use and cached.
    ///
    /// `None` means the estimator failed for this page; the failure is
    /// cached too, so the estimator runs at most once per page.
    pub fn token_count(&self, estimator: &dyn TokenEstimator) -> Option<usize> {
        *self
            .tokens
            .get_or_init(|| estimator.try_estimate(&self.text()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use lopdf::Document;
    use std::cell::Cell;

    struct CountingEstimator {
        calls: Cell<usize>,
    }

    impl TokenEstimator for CountingEstimator {
        fn try_estimate(&self, text: &str) -> Result<usize> {
            self.calls.set(self.calls.get() + 1);
            Ok(text.split_whitespace().count())
        }
    }

    fn source() -> Arc<SourceFile> {
        Arc::new(SourceFile::new("notes.txt", 12))
    }

    fn handle() -> NativePage {
        NativePage::new(Arc::new(Document::with_version("1.5")), (1, 0))
    }

    #[test]
    fn test_page_text_joins_lines() {
        let page = Page::from_text(source(), 1, "one\ntwo");
        assert_eq!(page.lines().len(), 2);
        assert_eq!(page.text(), "one\ntwo");
        assert_eq!(page.source().name, "notes.txt");
        assert_eq!(page.origin(), PageOrigin::Rendered);
        assert!(page.native_page().is_none());
    }

    #[test]
    fn test_native_page_keeps_text_layer_verbatim() {
        let text = "\u{65e5}\u{672c}\u{8a9e}\tcolumn\u{2003}two\n".to_string();
        let page = Page::native(source(), 3, handle(), text.clone());

        assert_eq!(page.origin(), PageOrigin::Native);
        assert_eq!(page.text(), text);
        assert!(page.lines().is_empty());
        assert_eq!(page.native_page().map(NativePage::id), Some((1, 0)));
    }

    #[test]
    fn test_token_count_is_cached() {
        let estimator = CountingEstimator { calls: Cell::new(0) };
        let page = Page::native(source(), 1, handle(), "a b c".to_string());

        assert_eq!(page.token_count(&estimator), Some(3));
        assert_eq!(page.token_count(&estimator), Some(3));
        assert_eq!(estimator.calls.get(), 1);
    }
}
