//! Streaming bin-packing of pages into token-bounded batches.
//!
//! Units arrive in file-then-page order and are placed first-fit into the
//! current batch. A unit that does not fit closes the batch; a unit that can
//! never fit is skipped.

use crate::{
    error::Result,
    page::Page,
    report::{MergeRecord, ReportBuilder, SkipReason},
    token::TokenEstimator,
    writer::{ArtifactNaming, ArtifactWriter},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, trace, warn};

/// What the packer treats as one indivisible unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Every page is packed on its own
    #[default]
    Page,
    /// All pages of a file travel together
    File,
}

/// Lifecycle of the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackerState {
    /// No pages held
    Empty,
    /// Holding pages, still accepting
    Filling,
    /// Handing the batch to the writer
    Flushing,
}

/// Pages accumulated for the next artifact.
#[derive(Debug, Default)]
pub struct Batch {
    pages: Vec<Page>,
    tokens: usize,
    sources: BTreeSet<String>,
}

impl Batch {
    /// Pages in encounter order.
    #[must_use]
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Sum of the pages' token counts.
    #[must_use]
    pub const fn tokens(&self) -> usize {
        self.tokens
    }

    /// Returns true if the batch holds no pages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Checks if a unit of `tokens` can join without passing `max_tokens`.
    #[must_use]
    pub fn can_fit(&self, tokens: usize, max_tokens: usize) -> bool {
        self.tokens.saturating_add(tokens) <= max_tokens
    }

    fn add_unit(&mut self, pages: Vec<Page>, tokens: usize) {
        self.tokens += tokens;
        for page in pages {
            self.sources.insert(page.source().name.clone());
            self.pages.push(page);
        }
    }
}

/// Counters for one packing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackSummary {
    /// Artifacts finalized
    pub artifacts: usize,
    /// Pages placed into artifacts
    pub pages_packed: usize,
    /// Units skipped for size or counting failure
    pub units_skipped: usize,
    /// Pages whose failed count was treated as zero
    pub degraded_counts: usize,
}

/// Decides batch boundaries and hands full batches to the writer.
pub struct BatchPacker<'a> {
    max_tokens: usize,
    strict_token_counting: bool,
    estimator: &'a dyn TokenEstimator,
    writer: &'a mut dyn ArtifactWriter,
    naming: ArtifactNaming,
    batch: Batch,
    next_index: usize,
    state: PackerState,
    summary: PackSummary,
}

impl<'a> BatchPacker<'a> {
    /// Creates a packer starting at artifact index 1.
    pub fn new(
        max_tokens: usize,
        estimator: &'a dyn TokenEstimator,
        writer: &'a mut dyn ArtifactWriter,
        naming: ArtifactNaming,
    ) -> Self {
        Self {
            max_tokens,
            strict_token_counting: false,
            estimator,
            writer,
            naming,
            batch: Batch::default(),
            next_index: 1,
            state: PackerState::Empty,
            summary: PackSummary::default(),
        }
    }

    /// Skips units whose token count fails instead of counting them as zero.
    #[must_use]
    pub fn strict_token_counting(mut self, enabled: bool) -> Self {
        self.strict_token_counting = enabled;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PackerState {
        self.state
    }

    /// Index the next finalized artifact will get.
    #[must_use]
    pub const fn next_index(&self) -> usize {
        self.next_index
    }

    /// The batch being filled.
    #[must_use]
    pub const fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Feeds one file's pages at the given granularity.
    ///
    /// # Errors
    ///
    /// Returns an error if finalizing a batch fails.
    pub fn pack_stream<I>(&mut self, pages: I, granularity: Granularity, report: &mut ReportBuilder) -> Result<()>
    where
        I: IntoIterator<Item = Page>,
    {
        match granularity {
            Granularity::Page => {
                for page in pages {
                    self.push_page(page, report)?;
                }
                Ok(())
            }
            Granularity::File => self.push_file(pages.into_iter().collect(), report),
        }
    }

    /// Packs a single page as its own unit.
    ///
    /// # Errors
    ///
    /// Returns an error if finalizing a batch fails.
    pub fn push_page(&mut self, page: Page, report: &mut ReportBuilder) -> Result<()> {
        let Some(tokens) = self.count(&page) else {
            report.skip(&page.source().name, &SkipReason::TokenCountFailed);
            self.summary.units_skipped += 1;
            return Ok(());
        };

        if tokens > self.max_tokens {
            report.skip(&page.source().name, &SkipReason::PageTooLarge { tokens });
            self.summary.units_skipped += 1;
            return Ok(());
        }

        trace!(
            "{} page {}: {} tokens",
            page.source().name,
            page.number(),
            tokens
        );
        self.place(vec![page], tokens, report)
    }

    /// Packs all pages of one file as a single unit.
    ///
    /// # Errors
    ///
    /// Returns an error if finalizing a batch fails.
    pub fn push_file(&mut self, pages: Vec<Page>, report: &mut ReportBuilder) -> Result<()> {
        let Some(first) = pages.first() else {
            return Ok(());
        };
        let name = first.source().name.clone();

        let mut tokens = 0usize;
        for page in &pages {
            match self.count(page) {
                Some(count) => tokens += count,
                None => {
                    report.skip(&name, &SkipReason::TokenCountFailed);
                    self.summary.units_skipped += 1;
                    return Ok(());
                }
            }
        }

        if tokens > self.max_tokens {
            report.skip(&name, &SkipReason::FileTooLarge { tokens });
            self.summary.units_skipped += 1;
            return Ok(());
        }

        debug!("{}: {} pages, {} tokens", name, pages.len(), tokens);
        self.place(pages, tokens, report)
    }

    /// Finalizes the last non-empty batch.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the final artifact fails.
    pub fn finish(mut self, report: &mut ReportBuilder) -> Result<PackSummary> {
        if !self.batch.is_empty() {
            self.flush(report)?;
        }
        Ok(self.summary)
    }

    /// Token count for a page; `None` only in strict mode.
    fn count(&mut self, page: &Page) -> Option<usize> {
        match page.token_count(self.estimator) {
            Some(tokens) => Some(tokens),
            None if self.strict_token_counting => None,
            None => {
                warn!(
                    "Token count failed for {} page {}; counting it as 0",
                    page.source().name,
                    page.number()
                );
                self.summary.degraded_counts += 1;
                Some(0)
            }
        }
    }

    fn place(&mut self, pages: Vec<Page>, tokens: usize, report: &mut ReportBuilder) -> Result<()> {
        if !self.batch.is_empty() && !self.batch.can_fit(tokens, self.max_tokens) {
            self.flush(report)?;
        }

        self.summary.pages_packed += pages.len();
        self.batch.add_unit(pages, tokens);
        self.state = PackerState::Filling;
        Ok(())
    }

    fn flush(&mut self, report: &mut ReportBuilder) -> Result<()> {
        self.state = PackerState::Flushing;

        let batch = std::mem::take(&mut self.batch);
        let name = self.naming.name(self.next_index);
        let size_bytes = self.writer.write_artifact(&name, batch.pages())?;

        info!(
            "Finalized {} ({} pages, {} tokens, {} sources)",
            name,
            batch.pages.len(),
            batch.tokens,
            batch.sources.len()
        );

        report.merge(MergeRecord::new(
            name,
            batch.sources.into_iter().collect(),
            batch.tokens,
            size_bytes,
        ));

        self.next_index += 1;
        self.summary.artifacts += 1;
        self.state = PackerState::Empty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::file::SourceFile;
    use std::sync::Arc;

    /// Reads the token count straight from the page text.
    struct LiteralEstimator;

    impl TokenEstimator for LiteralEstimator {
        fn try_estimate(&self, text: &str) -> Result<usize> {
            text.trim()
                .parse()
                .map_err(|_| Error::tokenizer("literal", format!("not a number: {text}")))
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        artifacts: Vec<(String, Vec<String>)>,
    }

    impl ArtifactWriter for RecordingWriter {
        fn write_artifact(&mut self, name: &str, pages: &[Page]) -> Result<u64> {
            self.artifacts
                .push((name.to_string(), pages.iter().map(Page::text).collect()));
            Ok(2048)
        }
    }

    struct BrokenWriter;

    impl ArtifactWriter for BrokenWriter {
        fn write_artifact(&mut self, name: &str, _pages: &[Page]) -> Result<u64> {
            Err(Error::io(name, std::io::Error::other("disk full")))
        }
    }

    fn page(source: &str, number: usize, text: &str) -> Page {
        Page::from_text(Arc::new(SourceFile::new(source, 0)), number, text)
    }

    fn naming() -> ArtifactNaming {
        ArtifactNaming::new("kb_{index}.{ext}", "pdf")
    }

    fn pack_pages(max_tokens: usize, pages: Vec<Page>) -> (RecordingWriter, ReportBuilder, PackSummary) {
        let mut writer = RecordingWriter::default();
        let mut report = ReportBuilder::new();
        let mut packer = BatchPacker::new(max_tokens, &LiteralEstimator, &mut writer, naming());
        for page in pages {
            packer.push_page(page, &mut report).unwrap();
        }
        let summary = packer.finish(&mut report).unwrap();
        (writer, report, summary)
    }

    #[test]
    fn test_three_pages_that_pairwise_overflow_make_three_artifacts() {
        let (writer, report, summary) = pack_pages(
            1000,
            vec![page("a.txt", 1, "900"), page("b.txt", 1, "900"), page("c.txt", 1, "300")],
        );

        assert_eq!(summary.artifacts, 3);
        let names: Vec<_> = report.merged().iter().map(|m| m.output_file.as_str()).collect();
        assert_eq!(names, ["kb_1.pdf", "kb_2.pdf", "kb_3.pdf"]);
        assert_eq!(writer.artifacts.len(), 3);
        assert!(report.skipped().is_empty());
    }

    #[test]
    fn test_small_pages_share_a_batch() {
        let (writer, report, _) = pack_pages(
            1000,
            vec![page("a.txt", 1, "400"), page("a.txt", 2, "400"), page("b.txt", 1, "400")],
        );

        assert_eq!(writer.artifacts[0].1, ["400", "400"]);
        assert_eq!(report.merged()[0].total_tokens, 800);
        assert_eq!(report.merged()[0].source_files, ["a.txt"]);
        assert_eq!(report.merged()[1].source_files, ["b.txt"]);
    }

    #[test]
    fn test_exact_fit_stays_in_batch() {
        let (_, report, summary) = pack_pages(1000, vec![page("a.txt", 1, "500"), page("a.txt", 2, "500")]);

        assert_eq!(summary.artifacts, 1);
        assert_eq!(report.merged()[0].total_tokens, 1000);
    }

    #[test]
    fn test_oversized_single_page_is_skipped_and_run_succeeds() {
        let (writer, report, summary) = pack_pages(2_000_000, vec![page("huge.pdf", 1, "2500000")]);

        assert_eq!(summary.artifacts, 0);
        assert!(writer.artifacts.is_empty());
        assert!(report.merged().is_empty());
        assert_eq!(report.skipped().len(), 1);
        assert_eq!(report.skipped()[0].file, "huge.pdf");
        assert_eq!(report.skipped()[0].reason, "page too large: 2500000 tokens");
    }

    #[test]
    fn test_oversized_page_does_not_close_batch() {
        let (_, report, _) = pack_pages(
            1000,
            vec![page("a.txt", 1, "300"), page("a.txt", 2, "5000"), page("a.txt", 3, "300")],
        );

        assert_eq!(report.merged().len(), 1);
        assert_eq!(report.merged()[0].total_tokens, 600);
        assert_eq!(report.skipped().len(), 1);
    }

    #[test]
    fn test_sources_are_sorted_and_distinct() {
        let (_, report, _) = pack_pages(
            1000,
            vec![page("b.txt", 1, "1"), page("a.txt", 1, "1"), page("b.txt", 2, "1")],
        );

        assert_eq!(report.merged()[0].source_files, ["a.txt", "b.txt"]);
    }

    #[test]
    fn test_failed_count_degrades_to_zero_and_can_breach_ceiling() {
        // The middle page has real content but its count fails, so it rides
        // along for free.
        let (writer, report, summary) = pack_pages(
            1000,
            vec![page("a.txt", 1, "900"), page("a.txt", 2, "lots of real words"), page("b.txt", 1, "900")],
        );

        assert_eq!(summary.degraded_counts, 1);
        assert_eq!(writer.artifacts[0].1, ["900", "lots of real words"]);
        assert_eq!(report.merged()[0].total_tokens, 900);
        assert!(report.skipped().is_empty());
    }

    #[test]
    fn test_strict_counting_skips_failed_page() {
        let mut writer = RecordingWriter::default();
        let mut report = ReportBuilder::new();
        let mut packer =
            BatchPacker::new(1000, &LiteralEstimator, &mut writer, naming()).strict_token_counting(true);

        packer.push_page(page("a.txt", 1, "not a count"), &mut report).unwrap();
        packer.push_page(page("a.txt", 2, "10"), &mut report).unwrap();
        let summary = packer.finish(&mut report).unwrap();

        assert_eq!(summary.units_skipped, 1);
        assert_eq!(report.skipped()[0].reason, "token count failed");
        assert_eq!(report.merged()[0].total_tokens, 10);
    }

    #[test]
    fn test_state_transitions() {
        let mut writer = RecordingWriter::default();
        let mut report = ReportBuilder::new();
        let mut packer = BatchPacker::new(1000, &LiteralEstimator, &mut writer, naming());

        assert_eq!(packer.state(), PackerState::Empty);
        assert_eq!(packer.next_index(), 1);

        packer.push_page(page("a.txt", 1, "600"), &mut report).unwrap();
        assert_eq!(packer.state(), PackerState::Filling);

        packer.push_page(page("a.txt", 2, "600"), &mut report).unwrap();
        assert_eq!(packer.state(), PackerState::Filling);
        assert_eq!(packer.next_index(), 2);
        assert_eq!(packer.batch().tokens(), 600);

        packer.finish(&mut report).unwrap();
        assert_eq!(report.merged().len(), 2);
    }

    #[test]
    fn test_empty_stream_finalizes_nothing() {
        let (writer, report, summary) = pack_pages(1000, vec![]);

        assert_eq!(summary, PackSummary::default());
        assert!(writer.artifacts.is_empty());
        assert!(report.merged().is_empty());
    }

    #[test]
    fn test_file_granularity_keeps_pages_together() {
        let mut writer = RecordingWriter::default();
        let mut report = ReportBuilder::new();
        let mut packer = BatchPacker::new(1000, &LiteralEstimator, &mut writer, naming());

        packer
            .pack_stream(
                vec![page("a.pdf", 1, "300"), page("a.pdf", 2, "300")],
                Granularity::File,
                &mut report,
            )
            .unwrap();
        packer
            .pack_stream(vec![page("b.pdf", 1, "600")], Granularity::File, &mut report)
            .unwrap();
        packer.finish(&mut report).unwrap();

        assert_eq!(writer.artifacts.len(), 2);
        assert_eq!(writer.artifacts[0].1.len(), 2);
        assert_eq!(report.merged()[0].source_files, ["a.pdf"]);
        assert_eq!(report.merged()[1].source_files, ["b.pdf"]);
    }

    #[test]
    fn test_file_granularity_skips_oversized_file() {
        let mut writer = RecordingWriter::default();
        let mut report = ReportBuilder::new();
        let mut packer = BatchPacker::new(1000, &LiteralEstimator, &mut writer, naming());

        packer
            .pack_stream(
                vec![page("big.pdf", 1, "600"), page("big.pdf", 2, "600")],
                Granularity::File,
                &mut report,
            )
            .unwrap();
        let summary = packer.finish(&mut report).unwrap();

        assert_eq!(summary.artifacts, 0);
        assert_eq!(report.skipped()[0].reason, "file too large: 1200 tokens");
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let mut writer = BrokenWriter;
        let mut report = ReportBuilder::new();
        let mut packer = BatchPacker::new(1000, &LiteralEstimator, &mut writer, naming());

        packer.push_page(page("a.txt", 1, "10"), &mut report).unwrap();
        let err = packer.finish(&mut report).unwrap_err();

        assert!(err.is_io());
        assert!(report.merged().is_empty());
    }
}
