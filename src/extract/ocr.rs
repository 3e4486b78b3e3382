//! OCR for scanned PDFs through external programs.
//!
//! Pages are rasterized with `pdftoppm` into a scratch directory, then each
//! image is read with `tesseract`. Both programs must be on `PATH` or
//! configured explicitly.

use super::{ExtractError, Extractor, OcrSettings};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace, warn};

const RASTER_DPI: &str = "300";
const IMAGE_PREFIX: &str = "page";

/// Recognizes text in page-image PDFs.
#[derive(Debug, Clone)]
pub struct OcrExtractor {
    settings: OcrSettings,
}

impl OcrExtractor {
    /// Creates an extractor using the given programs and scratch directory.
    #[must_use]
    pub const fn new(settings: OcrSettings) -> Self {
        Self { settings }
    }

    fn scratch_for(&self, path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.settings.scratch_dir.join(format!("ocr-{stem}"))
    }

    fn rasterize(&self, pdf: &Path, scratch: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        let prefix = scratch.join(IMAGE_PREFIX);
        let output = Command::new(&self.settings.pdftoppm_cmd)
            .args(["-r", RASTER_DPI, "-png"])
            .arg(pdf)
            .arg(&prefix)
            .output();
        check(&self.settings.pdftoppm_cmd, output)?;

        let mut images: Vec<PathBuf> = fs::read_dir(scratch)
            .map_err(|e| ExtractError::io(scratch, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension() == Some(OsStr::new("png")))
            .collect();
        // pdftoppm zero-pads page numbers to a common width.
        images.sort();

        Ok(images)
    }

    fn recognize(&self, image: &Path) -> Result<String, ExtractError> {
        trace!("Running OCR on {}", image.display());
        let output = Command::new(&self.settings.tesseract_cmd)
            .arg(image)
            .arg("stdout")
            .args(["-l", self.settings.language.as_str()])
            .output();
        let output = check(&self.settings.tesseract_cmd, output)?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Extractor for OcrExtractor {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "pdf"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let scratch = self.scratch_for(path);
        if scratch.exists() {
            fs::remove_dir_all(&scratch).map_err(|e| ExtractError::io(&scratch, e))?;
        }
        fs::create_dir_all(&scratch).map_err(|e| ExtractError::io(&scratch, e))?;

        let result = self.rasterize(path, &scratch).and_then(|images| {
            debug!("OCR on {} page images from {}", images.len(), path.display());
            images
                .iter()
                .map(|image| self.recognize(image))
                .collect::<Result<Vec<_>, _>>()
        });

        if let Err(e) = fs::remove_dir_all(&scratch) {
            warn!("Failed to remove OCR scratch {}: {}", scratch.display(), e);
        }

        Ok(result?.join("\n"))
    }
}

/// Turns a spawn error or non-zero exit into an [`ExtractError::Tool`].
fn check(tool: &str, output: std::io::Result<Output>) -> Result<Output, ExtractError> {
    let output = output.map_err(|e| ExtractError::Tool {
        tool: tool.to_string(),
        message: format!("could not start: {e}"),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::Tool {
            tool: tool.to_string(),
            message: format!("{}: {}", output.status, stderr.trim()),
        });
    }

    Ok(output)
}
