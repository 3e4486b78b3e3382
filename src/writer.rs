use crate::{
    error::{Error, Result},
    page::Page,
    pdf::PdfComposer,
    render::Layout,
};
use std::{
    fs,
    io::{BufWriter, Write},
    path::PathBuf,
};
use tracing::{debug, trace};

/// Extension of every artifact this crate writes.
pub const ARTIFACT_EXTENSION: &str = "pdf";

/// Persists finalized batches.
pub trait ArtifactWriter {
    /// Writes `pages` as one artifact called `name` and returns its size in
    /// bytes.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the run.
    fn write_artifact(&mut self, name: &str, pages: &[Page]) -> Result<u64>;
}

/// Expands the output pattern into artifact file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    pattern: String,
    extension: String,
}

impl ArtifactNaming {
    /// Creates a naming scheme from a validated pattern.
    #[must_use]
    pub fn new(pattern: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            extension: extension.into(),
        }
    }

    /// File name for the 1-based artifact `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> String {
        self.pattern
            .replace("{index:03}", &format!("{index:03}"))
            .replace("{index:02}", &format!("{index:02}"))
            .replace("{index}", &index.to_string())
            .replace("{ext}", &self.extension)
    }
}

/// Writes artifacts as PDFs, staging each one before moving it into place.
///
/// Native pages are copied from their source document; rendered pages are
/// typeset onto sheets.
#[derive(Debug, Clone)]
pub struct PdfArtifactWriter {
    output_dir: PathBuf,
    staging_dir: PathBuf,
    layout: Layout,
}

impl PdfArtifactWriter {
    /// Creates a writer that stages in `staging_dir` and publishes to
    /// `output_dir`. Both directories must be on the same filesystem.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            output_dir: output_dir.into(),
            staging_dir: staging_dir.into(),
            layout,
        }
    }

    fn compose(&self, pages: &[Page]) -> Result<PdfComposer> {
        let mut composer = PdfComposer::new(self.layout);
        for page in pages {
            match page.native_page() {
                Some(native) => composer.import_page(native)?,
                None => {
                    for sheet in self.layout.paginate(page.lines()) {
                        composer.add_sheet(&sheet)?;
                    }
                }
            }
            trace!(
                "Laid out {} page {} ({} sheets so far)",
                page.source().name,
                page.number(),
                composer.sheet_count()
            );
        }
        Ok(composer)
    }
}

impl ArtifactWriter for PdfArtifactWriter {
    /// # Process
    ///
    /// 1. Copies native pages and lays rendered pages onto sheets
    /// 2. Serializes the document into the staging directory
    /// 3. Syncs the staged file to disk
    /// 4. Renames it into the output directory
    fn write_artifact(&mut self, name: &str, pages: &[Page]) -> Result<u64> {
        fs::create_dir_all(&self.staging_dir).map_err(|e| Error::io(&self.staging_dir, e))?;
        fs::create_dir_all(&self.output_dir).map_err(|e| Error::io(&self.output_dir, e))?;

        let composer = self.compose(pages)?;
        let staged = self.staging_dir.join(name);
        let target = self.output_dir.join(name);

        let file = fs::File::create(&staged).map_err(|e| Error::io(&staged, e))?;
        let mut writer = BufWriter::new(file);
        composer.write_to(&mut writer)?;
        writer.flush().map_err(|e| Error::io(&staged, e))?;

        let file = writer
            .into_inner()
            .map_err(|e| Error::io(&staged, e.into_error()))?;
        file.sync_all().map_err(|e| Error::io(&staged, e))?;
        drop(file);

        fs::rename(&staged, &target).map_err(|e| Error::io(&target, e))?;

        let size = fs::metadata(&target)
            .map_err(|e| Error::io(&target, e))?
            .len();
        debug!("Wrote {} ({} bytes)", target.display(), size);

        Ok(size)
    }
}

/// Records planned artifact names without touching the filesystem.
#[derive(Debug, Default)]
pub struct PlanOnlyWriter {
    planned: Vec<String>,
}

impl PlanOnlyWriter {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the artifacts that would have been written.
    #[must_use]
    pub fn planned(&self) -> &[String] {
        &self.planned
    }
}

impl ArtifactWriter for PlanOnlyWriter {
    fn write_artifact(&mut self, name: &str, pages: &[Page]) -> Result<u64> {
        debug!("[dry run] Would write {} with {} pages", name, pages.len());
        self.planned.push(name.to_string());
        Ok(0)
    }
}
