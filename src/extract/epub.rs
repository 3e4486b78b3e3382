//! E-book containers (`.epub`).
//!
//! `META-INF/container.xml` points at the package document; its manifest maps
//! ids to content files and its spine gives reading order.

use super::{open_zip, read_zip_entry, ExtractError, Extractor};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

const CONTAINER_PART: &str = "META-INF/container.xml";

/// Elements whose text is not part of the reading content.
const HIDDEN_ELEMENTS: [&[u8]; 4] = [b"head", b"script", b"style", b"title"];

/// Elements that end a line of reading content.
const BLOCK_ELEMENTS: [&[u8]; 14] = [
    b"p", b"div", b"br", b"li", b"tr", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"blockquote",
    b"pre", b"section",
];

/// Extracts chapter text from `.epub` files in spine order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubExtractor;

impl Extractor for EpubExtractor {
    fn name(&self) -> &'static str {
        "epub"
    }

    fn can_handle(&self, extension: &str) -> bool {
        extension == "epub"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let mut archive = open_zip(path)?;

        let container = read_zip_entry(&mut archive, CONTAINER_PART)?;
        let package_path = package_location(&container)?;
        let package = read_zip_entry(&mut archive, &package_path)?;
        let base = package_path
            .rfind('/')
            .map_or("", |slash| &package_path[..=slash]);

        let mut chapters = Vec::new();
        for href in spine_documents(&package)? {
            let entry = format!("{base}{href}");
            match read_zip_entry(&mut archive, &entry).and_then(|xhtml| xhtml_text(&xhtml)) {
                Ok(text) => chapters.push(text),
                Err(e) => warn!("Skipping spine item {}: {}", entry, e),
            }
        }

        Ok(chapters.join("\n\n"))
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, ExtractError> {
    for attr in element.attributes() {
        let attr = attr.map_err(ExtractError::malformed)?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(ExtractError::malformed)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Path of the package document named by `container.xml`.
fn package_location(container: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(container);

    loop {
        match reader.read_event().map_err(ExtractError::malformed)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attribute(&e, b"full-path")? {
                    return Ok(path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(ExtractError::malformed("container.xml names no rootfile"))
}

/// Content hrefs in reading order.
fn spine_documents(package: &str) -> Result<Vec<String>, ExtractError> {
    let mut reader = Reader::from_str(package);
    let mut manifest = HashMap::new();
    let mut spine = Vec::new();

    loop {
        match reader.read_event().map_err(ExtractError::malformed)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attribute(&e, b"id")?, attribute(&e, b"href")?) {
                        manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attribute(&e, b"idref")? {
                        spine.push(idref);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(spine
        .into_iter()
        .filter_map(|id| manifest.get(&id).cloned())
        .collect())
}

/// Visible text of an XHTML document, one line per block element.
pub(crate) fn xhtml_text(xhtml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xhtml);
    let mut out = String::new();
    let mut hidden_depth = 0usize;

    loop {
        match reader.read_event().map_err(ExtractError::malformed)? {
            Event::Start(e) => {
                if HIDDEN_ELEMENTS.contains(&e.local_name().as_ref()) {
                    hidden_depth += 1;
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if HIDDEN_ELEMENTS.contains(&name.as_ref()) {
                    hidden_depth = hidden_depth.saturating_sub(1);
                } else if hidden_depth == 0 && BLOCK_ELEMENTS.contains(&name.as_ref()) {
                    end_line(&mut out);
                }
            }
            Event::Empty(e) => {
                if hidden_depth == 0 && BLOCK_ELEMENTS.contains(&e.local_name().as_ref()) {
                    end_line(&mut out);
                }
            }
            Event::Text(t) if hidden_depth == 0 => {
                // HTML entities such as &nbsp; are not XML; keep the raw text.
                let text = t
                    .unescape()
                    .map(|cow| cow.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                push_inline(&mut out, &text);
            }
            Event::CData(c) if hidden_depth == 0 => {
                push_inline(&mut out, &String::from_utf8_lossy(&c));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out.trim_end().to_string())
}

/// Appends inline text, collapsing markup whitespace.
fn push_inline(out: &mut String, text: &str) {
    let mut words = text.split_whitespace().peekable();
    if words.peek().is_none() {
        return;
    }
    let starts_with_space = text.starts_with(char::is_whitespace);
    if starts_with_space && !out.is_empty() && !out.ends_with(['\n', ' ']) {
        out.push(' ');
    }
    let joined = words.collect::<Vec<_>>().join(" ");
    out.push_str(&joined);
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn end_line(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}
