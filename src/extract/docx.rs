//! Word-processor documents (`.docx`).
//!
//! Text lives in `word/document.xml`: runs of `<w:t>` inside `<w:p>`
//! paragraphs, with `<w:tab/>` and `<w:br/>` for tabs and manual breaks.

use super::{open_zip, read_zip_entry, ExtractError, Extractor};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;

const DOCUMENT_PART: &str = "word/document.xml";

/// Extracts paragraph text from `.docx` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "docx"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let mut archive = open_zip(path)?;
        let xml = read_zip_entry(&mut archive, DOCUMENT_PART)?;
        document_text(&xml)
    }
}

/// Collects the visible text of a WordprocessingML body.
pub(crate) fn document_text(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event().map_err(ExtractError::malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text_run = true,
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text_run => {
                let text = t.unescape().map_err(ExtractError::malformed)?;
                out.push_str(&text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use std::io::Write;

    const BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>First</w:t></w:r><w:r><w:t xml:space="preserve"> paragraph</w:t></w:r></w:p>
    <w:p><w:r><w:t>A</w:t><w:tab/><w:t>B</w:t><w:br/><w:t>C &amp; D</w:t></w:r></w:p>
    <w:p/>
  </w:body>
</w:document>"#;

    #[test]
    fn test_document_text_paragraphs() {
        let text = document_text(BODY).unwrap();
        assert_eq!(text, "First paragraph\nA\tB\nC & D\n\n");
    }

    #[test]
    fn test_document_text_ignores_markup_whitespace() {
        let text = document_text(BODY).unwrap();
        assert!(!text.contains("  "));
    }

    #[test]
    fn test_extract_from_archive() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("letter.docx");
        let handle = std::fs::File::create(file.path()).unwrap();
        let mut writer = zip::ZipWriter::new(handle);
        writer
            .start_file(DOCUMENT_PART, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(BODY.as_bytes()).unwrap();
        writer.finish().unwrap();

        let text = DocxExtractor.extract(file.path()).unwrap();
        assert!(text.starts_with("First paragraph"));
    }

    #[test]
    fn test_not_a_zip_is_malformed() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("broken.docx");
        file.write_str("plain text, not a container").unwrap();

        let err = DocxExtractor.extract(file.path()).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }
}
