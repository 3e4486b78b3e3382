use anyhow::Context;
use clap::Parser;
use kb_packer::{Config, ConfigFile, Granularity, Pipeline, TokenizerKind};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "kb-packer",
    version,
    author,
    about = "Pack a folder of documents into token-bounded PDF knowledge bases",
    long_about = "Pack a folder of documents into token-bounded PDF knowledge bases.\n\n\
    PDFs with a text layer are passed through page by page; text, Markdown, DOCX and \
    EPUB files are rendered to pages first. Pages are packed in order into PDF artifacts \
    that stay under the token ceiling, and a JSON report lists every artifact and every \
    skipped file or page.\n\n\
    Settings come from built-in defaults, then the --config file, then flags.\n\n\
    USAGE EXAMPLES:\n  \
      # Pack ./source_docs into ./outputs/knowledge_base\n  \
      kb-packer\n\n  \
      # Pack another folder with a smaller ceiling\n  \
      kb-packer --source ./papers --max-tokens 500000\n\n  \
      # Read settings from a file and OCR scanned PDFs\n  \
      kb-packer --config kb.yaml --ocr\n\n  \
      # See which artifacts would be produced\n  \
      kb-packer --dry-run -v"
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE", env = "KB_PACKER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory containing the documents to pack
    #[arg(short, long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Output directory for the artifacts
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Path of the JSON report
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Scratch directory (cleared at start, removed at end)
    #[arg(long, value_name = "PATH")]
    workspace: Option<PathBuf>,

    /// Max tokens per artifact
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Files larger than this many megabytes are skipped
    #[arg(long, value_name = "MB")]
    max_file_size_mb: Option<f64>,

    /// Model whose encoding is used for counting
    #[arg(long)]
    model: Option<String>,

    /// Tokenizer to use
    #[arg(long, value_enum)]
    tokenizer: Option<CliTokenizer>,

    /// OCR scanned PDFs with pdftoppm and tesseract
    #[arg(long)]
    ocr: bool,

    /// Allowed extensions, comma separated
    #[arg(long, value_delimiter = ',', value_name = "EXT,...")]
    file_types: Option<Vec<String>>,

    /// Glob of file names to leave out (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Artifact filename pattern
    #[arg(long)]
    pattern: Option<String>,

    /// Packing unit
    #[arg(long, value_enum)]
    granularity: Option<CliGranularity>,

    /// Skip pages whose token count fails instead of counting them as zero
    #[arg(long)]
    strict_tokens: bool,

    /// Dry run (don't write files)
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliTokenizer {
    Tiktoken,
    Simple,
    Enhanced,
}

impl From<CliTokenizer> for TokenizerKind {
    fn from(t: CliTokenizer) -> Self {
        match t {
            CliTokenizer::Tiktoken => Self::Tiktoken,
            CliTokenizer::Simple => Self::Simple,
            CliTokenizer::Enhanced => Self::Enhanced,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliGranularity {
    /// Pack each page on its own
    Page,
    /// Keep all pages of a file in one artifact
    File,
}

impl From<CliGranularity> for Granularity {
    fn from(g: CliGranularity) -> Self {
        match g {
            CliGranularity::Page => Self::Page,
            CliGranularity::File => Self::File,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_tracing(cli.verbose)?;

    let mut builder = Config::builder();

    if let Some(path) = &cli.config {
        let file = ConfigFile::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        builder = builder.apply_file(file);
    }

    if let Some(source) = cli.source {
        builder = builder.source_dir(source);
    }
    if let Some(output) = cli.output {
        builder = builder.output_dir(output);
    }
    if let Some(report) = cli.report {
        builder = builder.report_path(report);
    }
    if let Some(workspace) = cli.workspace {
        builder = builder.workspace_dir(workspace);
    }
    if let Some(max_tokens) = cli.max_tokens {
        builder = builder.max_tokens_per_file(max_tokens);
    }
    if let Some(mb) = cli.max_file_size_mb {
        builder = builder.max_file_size_mb(mb);
    }
    if let Some(model) = cli.model {
        builder = builder.token_model(model);
    }
    if let Some(tokenizer) = cli.tokenizer {
        builder = builder.tokenizer(tokenizer.into());
    }
    if cli.ocr {
        builder = builder.use_ocr(true);
    }
    if let Some(types) = cli.file_types {
        builder = builder.file_types(types);
    }
    if !cli.exclude.is_empty() {
        builder = builder.exclude_patterns(cli.exclude);
    }
    if let Some(pattern) = cli.pattern {
        builder = builder.output_pattern(pattern);
    }
    if let Some(granularity) = cli.granularity {
        builder = builder.granularity(granularity.into());
    }
    if cli.strict_tokens {
        builder = builder.strict_token_counting(true);
    }

    let config = builder
        .dry_run(cli.dry_run)
        .build()
        .context("Failed to build configuration")?;

    let stats = Pipeline::new(config)
        .context("Failed to create pipeline")?
        .run()
        .context("Pipeline execution failed")?;

    stats.print_summary();

    Ok(())
}

fn setup_tracing(verbosity: u8) -> anyhow::Result<()> {
    let filter = match verbosity {
        0 => EnvFilter::new("kb_packer=info"),
        1 => EnvFilter::new("kb_packer=debug"),
        _ => EnvFilter::new("kb_packer=trace"),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false).with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
