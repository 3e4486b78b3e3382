//! Plain text and markdown.

use super::{ExtractError, Extractor};
use std::path::Path;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// Reads text files, honoring a byte-order mark when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn can_handle(&self, extension: &str) -> bool {
        matches!(extension, "txt" | "md" | "text" | "markdown")
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
        Ok(normalize_line_endings(&decode(&bytes)))
    }
}

/// Decodes bytes by BOM, falling back to lossy UTF-8.
fn decode(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&UTF8_BOM) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    if let Some(rest) = bytes.strip_prefix(&UTF16_LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&UTF16_BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_handles_text_extensions() {
        assert!(PlainTextExtractor.can_handle("txt"));
        assert!(PlainTextExtractor.can_handle("md"));
        assert!(!PlainTextExtractor.can_handle("pdf"));
    }

    #[test]
    fn test_reads_utf8_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("notes.md");
        file.write_str("# Title\r\nbody\r\n").unwrap();

        let text = PlainTextExtractor.extract(file.path()).unwrap();
        assert_eq!(text, "# Title\nbody\n");
    }

    #[test]
    fn test_strips_utf8_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("caf\u{e9}".as_bytes());
        assert_eq!(decode(&bytes), "caf\u{e9}");
    }

    #[test]
    fn test_decodes_utf16_le() {
        let mut bytes = UTF16_LE_BOM.to_vec();
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode(&bytes), "hi");
    }

    #[test]
    fn test_decodes_utf16_be() {
        let mut bytes = UTF16_BE_BOM.to_vec();
        for unit in "ok".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        assert_eq!(decode(&bytes), "ok");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        assert_eq!(decode(&[b'a', 0xFF, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let err = PlainTextExtractor
            .extract(&temp.path().join("missing.txt"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }
}
