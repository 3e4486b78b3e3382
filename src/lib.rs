//! # kb-packer
//!
//! Packs a folder of heterogeneous documents into a small number of PDF
//! artifacts, each holding at most a fixed number of tokens, for upload to a
//! retrieval-backed assistant.
//!
//! ## Features
//!
//! - PDFs with a text layer pass through page by page
//! - Plain text, Markdown, DOCX and EPUB are converted to paged text
//! - Optional OCR for scanned PDFs through `pdftoppm` and `tesseract`
//! - Streaming first-fit packing under a token ceiling
//! - A JSON report listing every artifact and every skipped file or page
//!
//! ## Quick Start
//!
//! ```no_run
//! use kb_packer::{Config, Pipeline};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .source_dir("./source_docs")
//!     .output_dir("./outputs/knowledge_base")
//!     .max_tokens_per_file(2_000_000)
//!     .build()?;
//!
//! Pipeline::new(config)?.run()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library follows a pipeline architecture:
//! 1. **Scanner**: Lists the source folder, dropping oversized files
//! 2. **Normalizer**: Yields each file as a lazy stream of pages
//! 3. **Packer**: Bins pages into token-bounded batches
//! 4. **Writer**: Publishes each batch as a PDF and records it in the report

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod error;
mod file;
mod filter;
mod normalizer;
mod packer;
mod page;
mod pdf;
mod pipeline;
mod render;
mod report;
mod scanner;
mod token;
mod writer;

pub mod extract;

pub use config::{Config, ConfigBuilder, ConfigFile};
pub use error::{Error, Result};
pub use extract::{Capabilities, Capability, ExtractError, Extractor, ExtractorRegistry, OcrSettings};
pub use file::{DocumentKind, SourceFile};
pub use normalizer::{DocumentNormalizer, PageStream, NATIVE_SAMPLE_PAGES, NATIVE_TEXT_THRESHOLD};
pub use packer::{Batch, BatchPacker, Granularity, PackSummary, PackerState};
pub use page::{Page, PageOrigin};
pub use pdf::{NativePage, PdfComposer, PdfSource};
pub use pipeline::{Pipeline, PipelineStats};
pub use render::{sanitize, Layout, PageRenderer, RenderedPages};
pub use report::{MergeRecord, Report, ReportBuilder, SkipReason, SkipRecord};
pub use token::{TokenEstimator, TokenizerKind};
pub use writer::{ArtifactNaming, ArtifactWriter, PdfArtifactWriter, PlanOnlyWriter, ARTIFACT_EXTENSION};

/// Runs the complete packing pipeline with the given configuration.
///
/// This is the main entry point for the library.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - Source directory is unreadable
/// - An artifact or the report cannot be written
///
/// # Examples
///
/// ```no_run
/// use kb_packer::{Config, run};
///
/// # fn main() -> anyhow::Result<()> {
/// let config = Config::builder()
///     .source_dir("./source_docs")
///     .build()?;
///
/// run(config)?;
/// # Ok(())
/// # }
/// ```
pub fn run(config: Config) -> Result<PipelineStats> {
    Pipeline::new(config)?.run()
}
