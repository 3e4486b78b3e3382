use crate::{
    config::Config,
    error::{Error, Result},
    extract::ExtractorRegistry,
    normalizer::DocumentNormalizer,
    packer::{BatchPacker, Granularity},
    render::{Layout, PageRenderer},
    report::ReportBuilder,
    scanner::Scanner,
    token::TokenEstimator,
    writer::{ArtifactWriter, PdfArtifactWriter, PlanOnlyWriter},
};
use serde::Serialize;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument, warn};

/// Statistics collected during pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    /// Files that passed the extension filter
    pub files_considered: usize,

    /// Files skipped as a whole (size, extraction, OCR, no pages)
    pub files_skipped: usize,

    /// Pages skipped for token size or counting failure
    pub pages_skipped: usize,

    /// Pages placed into artifacts
    pub pages_packed: usize,

    /// Artifacts finalized (planned only, in a dry run)
    pub artifacts_written: usize,

    /// Tokens across all artifacts
    pub total_tokens: usize,

    /// Average tokens per artifact
    pub avg_tokens_per_artifact: usize,

    /// Largest artifact in tokens
    pub max_artifact_tokens: usize,

    /// Smallest artifact in tokens
    pub min_artifact_tokens: usize,

    /// Pages whose failed token count was treated as zero
    pub degraded_token_counts: usize,

    /// Total execution time
    pub duration: Duration,

    /// Time spent listing the source directory
    pub scan_duration: Duration,

    /// Time spent normalizing, packing and writing artifacts
    pub pack_duration: Duration,

    /// Time spent writing the report
    pub report_duration: Duration,

    /// Output directory path
    pub output_directory: String,

    /// Report path, unless this was a dry run
    pub report_path: Option<String>,

    /// Whether nothing was written
    pub dry_run: bool,
}

impl PipelineStats {
    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        let title = if self.dry_run {
            "               Dry Run Summary                  "
        } else {
            "          Knowledge Base Pack Summary           "
        };
        let artifacts_label = if self.dry_run { "Artifacts Planned:" } else { "Artifacts Written:" };

        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║    {}   ║", title);
        println!("╠═══════════════════════════════════════════════════════╣");
        println!(
            "║ Files Considered:     {:>8}                        ║",
            self.files_considered
        );
        println!(
            "║   - Skipped:          {:>8}                        ║",
            self.files_skipped
        );
        println!(
            "║ Pages Packed:         {:>8}                        ║",
            self.pages_packed
        );
        println!(
            "║   - Skipped:          {:>8}                        ║",
            self.pages_skipped
        );
        println!("║                                                       ║");
        println!(
            "║ {:<21} {:>8}                        ║",
            artifacts_label, self.artifacts_written
        );
        println!(
            "║ Total Tokens:         {:>8}                        ║",
            self.total_tokens
        );
        println!(
            "║ Avg Tokens/Artifact:  {:>8}                        ║",
            self.avg_tokens_per_artifact
        );
        println!(
            "║ Min Artifact Size:    {:>8} tokens                 ║",
            self.min_artifact_tokens
        );
        println!(
            "║ Max Artifact Size:    {:>8} tokens                 ║",
            self.max_artifact_tokens
        );
        if self.degraded_token_counts > 0 {
            println!(
                "║ ⚠ Uncounted pages:    {:>8}                        ║",
                self.degraded_token_counts
            );
        }
        println!("║                                                       ║");
        println!("║ Output Directory:                                     ║");
        println!("║   {}", self.output_directory);
        if let Some(report_path) = &self.report_path {
            println!("║ Report:                                               ║");
            println!("║   {}", report_path);
        }
        println!("║                                                       ║");
        println!("║ Timing Breakdown:                                     ║");
        println!(
            "║   - Scanning:         {:>8.2}s                     ║",
            self.scan_duration.as_secs_f64()
        );
        println!(
            "║   - Packing:          {:>8.2}s                     ║",
            self.pack_duration.as_secs_f64()
        );
        println!(
            "║   - Report:           {:>8.2}s                     ║",
            self.report_duration.as_secs_f64()
        );
        println!(
            "║   - Total:            {:>8.2}s                     ║",
            self.duration.as_secs_f64()
        );
        if self.dry_run {
            println!("║                                                       ║");
            println!("║ ⚠ No files were written (dry run mode)               ║");
        }
        println!("╚═══════════════════════════════════════════════════════╝\n");
    }
}

/// Scratch directory owned by one run.
///
/// Cleared when prepared and removed when dropped, on success or error.
#[derive(Debug)]
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    fn prepare(path: &Path) -> Result<Self> {
        match fs::remove_dir_all(path) {
            Ok(()) => debug!("Cleared stale workspace {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(path, e)),
        }
        fs::create_dir_all(path).map_err(|e| Error::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed workspace {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
    }
}

/// Main pipeline orchestrator for packing a document folder.
pub struct Pipeline {
    config: Config,
    estimator: Box<dyn TokenEstimator>,
    registry: ExtractorRegistry,
    writer: Option<Box<dyn ArtifactWriter>>,
}

impl Pipeline {
    /// Creates a new pipeline with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let estimator = config.tokenizer.create(&config.token_model);
        let registry = ExtractorRegistry::from_capabilities(&config.capabilities(), &config.ocr_settings());

        Ok(Self {
            config,
            estimator,
            registry,
            writer: None,
        })
    }

    /// Replaces the token counter.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Replaces the extractor registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ExtractorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the artifact writer. Dry-run mode ignores this.
    #[must_use]
    pub fn with_writer(mut self, writer: Box<dyn ArtifactWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Executes the complete pipeline and returns statistics.
    ///
    /// # Process
    ///
    /// 1. **Scan**: Lists eligible files, skipping oversized ones
    /// 2. **Normalize**: Turns each file into a page stream
    /// 3. **Pack**: Bins pages into token-bounded artifacts as they arrive
    /// 4. **Report**: Writes the merge/skip report once, atomically
    ///
    /// # Errors
    ///
    /// Returns an error on invalid configuration, an unreadable source
    /// directory, or a failed artifact or report write. File and page
    /// problems are recorded in the report instead.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kb_packer::{Config, Pipeline};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::builder()
    ///     .source_dir("./source_docs")
    ///     .build()?;
    ///
    /// let stats = Pipeline::new(config)?.run()?;
    /// stats.print_summary();
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(self), fields(source_dir = %self.config.source_dir.display()))]
    pub fn run(self) -> Result<PipelineStats> {
        let Self {
            config,
            estimator,
            registry,
            writer,
        } = self;
        let start_time = Instant::now();

        info!("Starting pipeline execution");

        if !config.source_dir.exists() {
            warn!(
                "Source directory {} does not exist; creating it empty",
                config.source_dir.display()
            );
            fs::create_dir_all(&config.source_dir).map_err(|e| Error::io(&config.source_dir, e))?;
        }

        // Destinations must be writable before any work is done.
        if !config.dry_run {
            fs::create_dir_all(&config.output_dir).map_err(|e| Error::io(&config.output_dir, e))?;
            if let Some(report_dir) = config
                .report_path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
            {
                fs::create_dir_all(report_dir).map_err(|e| Error::io(report_dir, e))?;
            }
        }

        // A dry run without OCR touches nothing on disk.
        let _workspace = if config.dry_run && !config.use_ocr {
            None
        } else {
            Some(Workspace::prepare(&config.workspace_dir)?)
        };

        let mut report = ReportBuilder::new();

        // Stage 1: Scanning
        info!("Stage 1/3: Scanning {}...", config.source_dir.display());
        let scan_start = Instant::now();
        let scan = Scanner::new(&config)?.scan(&mut report)?;
        let scan_duration = scan_start.elapsed();
        report.set_files_considered(scan.stats.considered);

        info!(
            "✓ Found {} eligible files ({} oversized) in {:.2}s",
            scan.stats.considered,
            scan.stats.oversized,
            scan_duration.as_secs_f64()
        );

        // Stage 2: Normalizing and packing
        info!("Stage 2/3: Packing pages...");
        let pack_start = Instant::now();
        let mut writer: Box<dyn ArtifactWriter> = match writer {
            _ if config.dry_run => {
                warn!("Dry run mode enabled - skipping file writes");
                Box::new(PlanOnlyWriter::new())
            }
            Some(writer) => writer,
            None => Box::new(PdfArtifactWriter::new(
                &config.output_dir,
                &config.workspace_dir,
                Layout::LETTER,
            )),
        };

        let normalizer = DocumentNormalizer::new(&registry, PageRenderer::new(Layout::LETTER), config.use_ocr);
        let mut packer = BatchPacker::new(
            config.max_tokens_per_file,
            estimator.as_ref(),
            writer.as_mut(),
            config.artifact_naming(),
        )
        .strict_token_counting(config.strict_token_counting);

        let mut files_skipped = scan.stats.oversized;
        for file in scan.files {
            let file = Arc::new(file);
            debug!("Processing {}", file.name);

            let Some(pages) = normalizer.normalize(file, &mut report) else {
                files_skipped += 1;
                continue;
            };
            packer.pack_stream(pages, config.granularity, &mut report)?;
        }

        let summary = packer.finish(&mut report)?;
        let pack_duration = pack_start.elapsed();

        let pages_skipped = match config.granularity {
            Granularity::Page => summary.units_skipped,
            Granularity::File => {
                files_skipped += summary.units_skipped;
                0
            }
        };

        info!(
            "✓ Packed {} pages into {} artifacts in {:.2}s",
            summary.pages_packed,
            summary.artifacts,
            pack_duration.as_secs_f64()
        );

        let artifact_tokens: Vec<usize> = report.merged().iter().map(|m| m.total_tokens).collect();
        let total_tokens: usize = artifact_tokens.iter().sum();
        let avg_tokens_per_artifact = if artifact_tokens.is_empty() {
            0
        } else {
            total_tokens / artifact_tokens.len()
        };

        // Stage 3: Report
        let report_start = Instant::now();
        let report_path = if config.dry_run {
            None
        } else {
            info!("Stage 3/3: Writing report...");
            report.build().write_atomic(&config.report_path)?;
            Some(config.report_path.display().to_string())
        };
        let report_duration = report_start.elapsed();

        let duration = start_time.elapsed();
        info!(
            "✓ Pipeline completed successfully in {:.2}s",
            duration.as_secs_f64()
        );

        Ok(PipelineStats {
            files_considered: scan.stats.considered,
            files_skipped,
            pages_skipped,
            pages_packed: summary.pages_packed,
            artifacts_written: summary.artifacts,
            total_tokens,
            avg_tokens_per_artifact,
            max_artifact_tokens: artifact_tokens.iter().copied().max().unwrap_or(0),
            min_artifact_tokens: artifact_tokens.iter().copied().min().unwrap_or(0),
            degraded_token_counts: summary.degraded_counts,
            duration,
            scan_duration,
            pack_duration,
            report_duration,
            output_directory: config.output_dir.display().to_string(),
            report_path,
            dry_run: config.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Report;
    use crate::token::TokenizerKind;
    use assert_fs::prelude::*;

    fn create_test_config(root: &Path) -> Config {
        Config::builder()
            .source_dir(root.join("docs"))
            .output_dir(root.join("out"))
            .report_path(root.join("report.json"))
            .tokenizer(TokenizerKind::Simple)
            .build()
            .unwrap()
    }

    #[test]
    fn test_pipeline_basic_execution() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("docs/a.txt").write_str("alpha beta gamma").unwrap();
        temp.child("docs/b.md").write_str("# heading\n\nbody").unwrap();

        let stats = Pipeline::new(create_test_config(temp.path()))
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(stats.files_considered, 2);
        assert_eq!(stats.artifacts_written, 1);
        assert_eq!(stats.pages_packed, 2);
        temp.child("out/knowledge_base_1.pdf").assert(predicates::path::is_file());

        let report = Report::load(&temp.path().join("report.json")).unwrap();
        assert_eq!(report.total_files_processed, 2);
        assert_eq!(report.merged_files[0].source_files, ["a.txt", "b.md"]);
    }

    #[test]
    fn test_unwritable_report_location_fails_before_packing() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("docs/a.txt").write_str("alpha beta gamma").unwrap();
        temp.child("blocker").write_str("a file, not a directory").unwrap();

        let config = Config::builder()
            .source_dir(temp.path().join("docs"))
            .output_dir(temp.path().join("out"))
            .report_path(temp.path().join("blocker/report.json"))
            .tokenizer(TokenizerKind::Simple)
            .build()
            .unwrap();

        let err = Pipeline::new(config).unwrap().run().unwrap_err();
        assert!(err.to_string().contains("blocker"));
        temp.child("out/knowledge_base_1.pdf").assert(predicates::path::missing());
        temp.child("out/temp_generated_pdfs").assert(predicates::path::missing());
    }

    #[test]
    fn test_workspace_removed_after_run() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("docs/a.txt").write_str("text").unwrap();
        temp.child("out/temp_generated_pdfs/stale.pdf").write_str("old").unwrap();

        Pipeline::new(create_test_config(temp.path()))
            .unwrap()
            .run()
            .unwrap();

        temp.child("out/temp_generated_pdfs").assert(predicates::path::missing());
    }

    #[test]
    fn test_workspace_removed_on_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("docs/a.txt").write_str("text").unwrap();

        struct FailingWriter;
        impl ArtifactWriter for FailingWriter {
            fn write_artifact(&mut self, name: &str, _pages: &[crate::page::Page]) -> Result<u64> {
                Err(Error::io(name, std::io::Error::other("read-only")))
            }
        }

        let result = Pipeline::new(create_test_config(temp.path()))
            .unwrap()
            .with_writer(Box::new(FailingWriter))
            .run();

        assert!(result.is_err());
        temp.child("out/temp_generated_pdfs").assert(predicates::path::missing());
        temp.child("report.json").assert(predicates::path::missing());
    }

    #[test]
    fn test_missing_source_is_created() {
        let temp = assert_fs::TempDir::new().unwrap();

        let stats = Pipeline::new(create_test_config(temp.path()))
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(stats.files_considered, 0);
        temp.child("docs").assert(predicates::path::is_dir());
        temp.child("report.json").assert(predicates::path::is_file());
    }

    #[test]
    fn test_pipeline_dry_run() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("docs/file.txt").write_str("some words").unwrap();

        let config = Config::builder()
            .source_dir(temp.path().join("docs"))
            .output_dir(temp.path().join("out"))
            .report_path(temp.path().join("report.json"))
            .tokenizer(TokenizerKind::Simple)
            .dry_run(true)
            .build()
            .unwrap();

        let stats = Pipeline::new(config).unwrap().run().unwrap();

        assert!(stats.dry_run);
        assert_eq!(stats.artifacts_written, 1);
        assert!(stats.report_path.is_none());
        temp.child("out").assert(predicates::path::missing());
        temp.child("report.json").assert(predicates::path::missing());
    }

    #[test]
    fn test_file_level_skips_are_counted() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("docs/blank.txt").write_str("   \n").unwrap();
        temp.child("docs/ok.txt").write_str("content").unwrap();

        let stats = Pipeline::new(create_test_config(temp.path()))
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.pages_skipped, 0);
        assert_eq!(stats.artifacts_written, 1);
    }
}
