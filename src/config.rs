use crate::error::{Error, Result};
use crate::extract::{Capabilities, Capability, OcrSettings};
use crate::packer::Granularity;
use crate::token::TokenizerKind;
use crate::writer::{ArtifactNaming, ARTIFACT_EXTENSION};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info};

const DEFAULT_SOURCE_DIR: &str = "source_docs";
const DEFAULT_OUTPUT_DIR: &str = "outputs/knowledge_base";
const DEFAULT_REPORT_PATH: &str = "outputs/report.json";
const DEFAULT_WORKSPACE_NAME: &str = "temp_generated_pdfs";
const DEFAULT_MAX_TOKENS: usize = 2_000_000;
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
const DEFAULT_TOKEN_MODEL: &str = "gpt-4";
const DEFAULT_FILE_TYPES: [&str; 5] = [".pdf", ".txt", ".md", ".docx", ".epub"];
const DEFAULT_OUTPUT_PATTERN: &str = "knowledge_base_{index}.{ext}";
const DEFAULT_OCR_LANGUAGE: &str = "eng";
const DEFAULT_TESSERACT_CMD: &str = "tesseract";
const DEFAULT_PDFTOPPM_CMD: &str = "pdftoppm";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Configuration for a packing run.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Directory whose immediate files are packed
    pub source_dir: PathBuf,

    /// Directory artifacts are published to
    pub output_dir: PathBuf,

    /// Where the JSON report is written
    pub report_path: PathBuf,

    /// Scratch directory, cleared at start and removed at end of a run
    pub workspace_dir: PathBuf,

    /// Token ceiling per artifact
    pub max_tokens_per_file: usize,

    /// Files larger than this are skipped unopened
    pub max_file_size_bytes: u64,

    /// Model whose encoding the token counter uses
    pub token_model: String,

    /// Token counter implementation
    pub tokenizer: TokenizerKind,

    /// Whether scanned PDFs go through OCR
    pub use_ocr: bool,

    /// Allowed extensions, lowercase with a leading dot
    pub file_types: Vec<String>,

    /// Glob patterns for file names to leave out
    pub exclude_patterns: Vec<String>,

    /// Artifact name pattern (supports {index}, {index:02}, {index:03}, {ext})
    pub output_pattern: String,

    /// Packing unit
    pub granularity: Granularity,

    /// Skip units whose token count fails instead of counting them as zero
    pub strict_token_counting: bool,

    /// Tesseract language code
    pub ocr_language: String,

    /// `tesseract` executable
    pub tesseract_cmd: String,

    /// `pdftoppm` executable
    pub pdftoppm_cmd: String,

    /// Plan batches without writing artifacts or the report
    pub dry_run: bool,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use kb_packer::Config;
    ///
    /// let config = Config::builder()
    ///     .source_dir("./docs")
    ///     .max_tokens_per_file(500_000)
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Size or token limits are zero
    /// - No file types are allowed
    /// - The token model is empty
    /// - Output pattern is invalid
    /// - The source path exists but is not a directory
    /// - The workspace is, or contains, the source directory, the output
    ///   directory or the report's directory
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens_per_file == 0 {
            return Err(Error::config("max_tokens_per_file must be greater than 0"));
        }

        if self.max_file_size_bytes == 0 {
            return Err(Error::config("max_file_size must be greater than 0"));
        }

        if self.file_types.is_empty() {
            return Err(Error::config("file_types must list at least one extension"));
        }

        if self.token_model.trim().is_empty() {
            return Err(Error::config("token_model must not be empty"));
        }

        if !self.output_pattern.contains("{index") {
            return Err(Error::invalid_pattern(
                &self.output_pattern,
                "Pattern must contain {index} or {index:03} placeholder",
            ));
        }

        if !self.output_pattern.contains("{ext}") {
            return Err(Error::invalid_pattern(
                &self.output_pattern,
                "Pattern must contain {ext} placeholder",
            ));
        }

        if self.output_pattern.contains('/') || self.output_pattern.contains('\\') {
            return Err(Error::invalid_pattern(
                &self.output_pattern,
                "Pattern must be a file name, not a path",
            ));
        }

        if self.source_dir.exists() && !self.source_dir.is_dir() {
            return Err(Error::config(format!(
                "Source path is not a directory: {}",
                self.source_dir.display()
            )));
        }

        // Nothing the run reads or publishes may live under the workspace.
        let workspace = resolve_path(&self.workspace_dir)?;
        let report_dir = self
            .report_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        for (role, path) in [
            ("source", self.source_dir.as_path()),
            ("output", self.output_dir.as_path()),
            ("report", report_dir),
        ] {
            if resolve_path(path)?.starts_with(&workspace) {
                return Err(Error::config(format!(
                    "Workspace directory {} must not contain the {} directory {}",
                    self.workspace_dir.display(),
                    role,
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Extraction capabilities this configuration asks for.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        let requested = Capabilities::none()
            .with(Capability::PlainText)
            .with(Capability::WordProcessor)
            .with(Capability::Ebook);

        if self.use_ocr {
            requested.with(Capability::Ocr)
        } else {
            requested
        }
    }

    /// OCR programs and scratch location.
    #[must_use]
    pub fn ocr_settings(&self) -> OcrSettings {
        OcrSettings {
            tesseract_cmd: self.tesseract_cmd.clone(),
            pdftoppm_cmd: self.pdftoppm_cmd.clone(),
            language: self.ocr_language.clone(),
            scratch_dir: self.workspace_dir.clone(),
        }
    }

    /// Naming scheme for artifacts.
    #[must_use]
    pub fn artifact_naming(&self) -> ArtifactNaming {
        ArtifactNaming::new(&self.output_pattern, ARTIFACT_EXTENSION)
    }
}

impl Default for Config {
    fn default() -> Self {
        let output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        Self {
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            workspace_dir: output_dir.join(DEFAULT_WORKSPACE_NAME),
            output_dir,
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            max_tokens_per_file: DEFAULT_MAX_TOKENS,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_MB * BYTES_PER_MB,
            token_model: DEFAULT_TOKEN_MODEL.to_string(),
            tokenizer: TokenizerKind::default(),
            use_ocr: false,
            file_types: DEFAULT_FILE_TYPES.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: Vec::new(),
            output_pattern: DEFAULT_OUTPUT_PATTERN.to_string(),
            granularity: Granularity::default(),
            strict_token_counting: false,
            ocr_language: DEFAULT_OCR_LANGUAGE.to_string(),
            tesseract_cmd: DEFAULT_TESSERACT_CMD.to_string(),
            pdftoppm_cmd: DEFAULT_PDFTOPPM_CMD.to_string(),
            dry_run: false,
        }
    }
}

/// Lowercases an extension and gives it a leading dot.
fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('*').trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

/// Settings read from a YAML file. Every field is optional.
///
/// The older key names `source_directory`, `output_directory` and
/// `tiktoken_model` are accepted as aliases.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// See [`Config::source_dir`]
    #[serde(alias = "source_directory")]
    pub source_dir: Option<PathBuf>,
    /// See [`Config::output_dir`]
    #[serde(alias = "output_directory")]
    pub output_dir: Option<PathBuf>,
    /// See [`Config::report_path`]
    pub report_path: Option<PathBuf>,
    /// See [`Config::workspace_dir`]
    pub workspace_dir: Option<PathBuf>,
    /// See [`Config::max_tokens_per_file`]
    pub max_tokens_per_file: Option<usize>,
    /// Size ceiling in megabytes
    pub max_file_size_mb: Option<f64>,
    /// See [`Config::token_model`]
    #[serde(alias = "tiktoken_model")]
    pub token_model: Option<String>,
    /// See [`Config::tokenizer`]
    pub tokenizer: Option<TokenizerKind>,
    /// See [`Config::use_ocr`]
    pub use_ocr: Option<bool>,
    /// See [`Config::file_types`]
    pub file_types: Option<Vec<String>>,
    /// See [`Config::exclude_patterns`]
    pub exclude_patterns: Option<Vec<String>>,
    /// See [`Config::output_pattern`]
    pub output_pattern: Option<String>,
    /// See [`Config::granularity`]
    pub granularity: Option<Granularity>,
    /// See [`Config::strict_token_counting`]
    pub strict_token_counting: Option<bool>,
    /// See [`Config::ocr_language`]
    pub ocr_language: Option<String>,
    /// See [`Config::tesseract_cmd`]
    pub tesseract_cmd: Option<String>,
    /// See [`Config::pdftoppm_cmd`]
    pub pdftoppm_cmd: Option<String>,
}

impl ConfigFile {
    /// Reads and parses a YAML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        info!(config_path = ?path, "Loading configuration from file");

        let content = std::fs::read_to_string(path).map_err(|e| {
            error!(error = ?e, config_path = ?path, "Failed to read config file");
            Error::io(path, e)
        })?;

        let file = Self::from_yaml(&content).inspect_err(|e| {
            error!(error = %e, config_path = ?path, "Failed to parse config YAML");
        })?;
        debug!(config_path = ?path, "Parsed config YAML successfully");

        Ok(file)
    }

    /// Parses YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    source_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    report_path: Option<PathBuf>,
    workspace_dir: Option<PathBuf>,
    max_tokens_per_file: Option<usize>,
    max_file_size_bytes: Option<u64>,
    token_model: Option<String>,
    tokenizer: Option<TokenizerKind>,
    use_ocr: Option<bool>,
    file_types: Option<Vec<String>>,
    exclude_patterns: Option<Vec<String>>,
    output_pattern: Option<String>,
    granularity: Option<Granularity>,
    strict_token_counting: Option<bool>,
    ocr_language: Option<String>,
    tesseract_cmd: Option<String>,
    pdftoppm_cmd: Option<String>,
    dry_run: bool,
}

impl ConfigBuilder {
    /// Sets the directory to pack.
    #[must_use]
    pub fn source_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(path.into());
        self
    }

    /// Sets the output directory for artifacts.
    #[must_use]
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Sets the report path.
    #[must_use]
    pub fn report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Sets the scratch directory. Defaults to a subdirectory of the output
    /// directory.
    #[must_use]
    pub fn workspace_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace_dir = Some(path.into());
        self
    }

    /// Sets the token ceiling per artifact.
    #[must_use]
    pub fn max_tokens_per_file(mut self, tokens: usize) -> Self {
        self.max_tokens_per_file = Some(tokens);
        self
    }

    /// Sets the file size ceiling in bytes.
    #[must_use]
    pub fn max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.max_file_size_bytes = Some(bytes);
        self
    }

    /// Sets the file size ceiling in megabytes.
    #[must_use]
    pub fn max_file_size_mb(mut self, mb: f64) -> Self {
        self.max_file_size_bytes = Some((mb.max(0.0) * BYTES_PER_MB as f64) as u64);
        self
    }

    /// Sets the model the token counter resolves.
    #[must_use]
    pub fn token_model(mut self, model: impl Into<String>) -> Self {
        self.token_model = Some(model.into());
        self
    }

    /// Sets the tokenizer implementation.
    #[must_use]
    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.tokenizer = Some(kind);
        self
    }

    /// Enables or disables OCR for scanned PDFs.
    #[must_use]
    pub fn use_ocr(mut self, enabled: bool) -> Self {
        self.use_ocr = Some(enabled);
        self
    }

    /// Sets the allowed extensions (`pdf`, `.PDF` and `*.pdf` are all
    /// accepted).
    #[must_use]
    pub fn file_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.file_types = Some(types.into_iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    /// Sets glob patterns for file names to leave out.
    #[must_use]
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = Some(patterns);
        self
    }

    /// Sets the artifact name pattern.
    ///
    /// Pattern must contain `{index}` and `{ext}` placeholders.
    #[must_use]
    pub fn output_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.output_pattern = Some(pattern.into());
        self
    }

    /// Sets the packing unit.
    #[must_use]
    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Enables or disables strict token counting.
    #[must_use]
    pub fn strict_token_counting(mut self, enabled: bool) -> Self {
        self.strict_token_counting = Some(enabled);
        self
    }

    /// Sets the tesseract language code.
    #[must_use]
    pub fn ocr_language(mut self, language: impl Into<String>) -> Self {
        self.ocr_language = Some(language.into());
        self
    }

    /// Sets the tesseract executable.
    #[must_use]
    pub fn tesseract_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.tesseract_cmd = Some(cmd.into());
        self
    }

    /// Sets the pdftoppm executable.
    #[must_use]
    pub fn pdftoppm_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.pdftoppm_cmd = Some(cmd.into());
        self
    }

    /// Enables dry run mode (no file writes).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Applies every setting present in a config file.
    #[must_use]
    pub fn apply_file(mut self, file: ConfigFile) -> Self {
        if let Some(v) = file.source_dir {
            self = self.source_dir(v);
        }
        if let Some(v) = file.output_dir {
            self = self.output_dir(v);
        }
        if let Some(v) = file.report_path {
            self = self.report_path(v);
        }
        if let Some(v) = file.workspace_dir {
            self = self.workspace_dir(v);
        }
        if let Some(v) = file.max_tokens_per_file {
            self = self.max_tokens_per_file(v);
        }
        if let Some(v) = file.max_file_size_mb {
            self = self.max_file_size_mb(v);
        }
        if let Some(v) = file.token_model {
            self = self.token_model(v);
        }
        if let Some(v) = file.tokenizer {
            self = self.tokenizer(v);
        }
        if let Some(v) = file.use_ocr {
            self = self.use_ocr(v);
        }
        if let Some(v) = file.file_types {
            self = self.file_types(v);
        }
        if let Some(v) = file.exclude_patterns {
            self = self.exclude_patterns(v);
        }
        if let Some(v) = file.output_pattern {
            self = self.output_pattern(v);
        }
        if let Some(v) = file.granularity {
            self = self.granularity(v);
        }
        if let Some(v) = file.strict_token_counting {
            self = self.strict_token_counting(v);
        }
        if let Some(v) = file.ocr_language {
            self = self.ocr_language(v);
        }
        if let Some(v) = file.tesseract_cmd {
            self = self.tesseract_cmd(v);
        }
        if let Some(v) = file.pdftoppm_cmd {
            self = self.pdftoppm_cmd(v);
        }
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<Config> {
        let defaults = Config::default();
        let output_dir = self.output_dir.unwrap_or(defaults.output_dir);
        let workspace_dir = self
            .workspace_dir
            .unwrap_or_else(|| output_dir.join(DEFAULT_WORKSPACE_NAME));

        let mut file_types: Vec<String> = self
            .file_types
            .unwrap_or(defaults.file_types)
            .iter()
            .filter_map(|raw| normalize_extension(raw))
            .collect();
        file_types.sort();
        file_types.dedup();

        let config = Config {
            source_dir: self.source_dir.unwrap_or(defaults.source_dir),
            output_dir,
            report_path: self.report_path.unwrap_or(defaults.report_path),
            workspace_dir,
            max_tokens_per_file: self.max_tokens_per_file.unwrap_or(defaults.max_tokens_per_file),
            max_file_size_bytes: self.max_file_size_bytes.unwrap_or(defaults.max_file_size_bytes),
            token_model: self.token_model.unwrap_or(defaults.token_model),
            tokenizer: self.tokenizer.unwrap_or(defaults.tokenizer),
            use_ocr: self.use_ocr.unwrap_or(defaults.use_ocr),
            file_types,
            exclude_patterns: self.exclude_patterns.unwrap_or(defaults.exclude_patterns),
            output_pattern: self.output_pattern.unwrap_or(defaults.output_pattern),
            granularity: self.granularity.unwrap_or(defaults.granularity),
            strict_token_counting: self
                .strict_token_counting
                .unwrap_or(defaults.strict_token_counting),
            ocr_language: self.ocr_language.unwrap_or(defaults.ocr_language),
            tesseract_cmd: self.tesseract_cmd.unwrap_or(defaults.tesseract_cmd),
            pdftoppm_cmd: self.pdftoppm_cmd.unwrap_or(defaults.pdftoppm_cmd),
            dry_run: self.dry_run,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Absolute form of `path` for overlap checks.
///
/// `.` and `..` are folded lexically, and the longest existing prefix is
/// canonicalized so symlinked spellings of one directory compare equal.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(Error::config("directory paths must not be empty"));
    }

    let absolute = std::path::absolute(path).map_err(|e| Error::io(path, e))?;
    let mut folded = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                folded.pop();
            }
            other => folded.push(other),
        }
    }

    let mut existing = folded.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return Ok(missing.iter().rev().fold(canonical, |acc, part| acc.join(part)));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return Ok(folded.clone()),
        }
    }
}
