//! Thin layer over `lopdf` for what the pipeline needs from PDFs: reading
//! pages out of a source document, and composing text sheets and copied
//! source pages into an output document.

use crate::error::{Error, Result};
use crate::render::Layout;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FONT_RESOURCE: &str = "F1";

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITED_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Entries that tie a page to its source document's structure.
const DETACHED_KEYS: [&[u8]; 4] = [b"Parent", b"Annots", b"B", b"StructParents"];

const MAX_TREE_DEPTH: usize = 64;

/// A page object inside an opened source PDF.
#[derive(Debug, Clone)]
pub struct NativePage {
    document: Arc<Document>,
    id: ObjectId,
}

impl NativePage {
    pub(crate) fn new(document: Arc<Document>, id: ObjectId) -> Self {
        Self { document, id }
    }

    /// Object id of the page in its source document.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }
}

/// An opened source PDF.
pub struct PdfSource {
    path: PathBuf,
    document: Arc<Document>,
    pages: Vec<(u32, ObjectId)>,
}

impl PdfSource {
    /// Loads and parses the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid PDF.
    pub fn open(path: &Path) -> Result<Self> {
        let document = Document::load(path).map_err(|e| Error::pdf(path, e))?;
        let pages = document.get_pages().into_iter().collect();

        Ok(Self {
            path: path.to_path_buf(),
            document: Arc::new(document),
            pages,
        })
    }

    /// Number of pages in the document.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Handle to the page object at `index` (0-based).
    #[must_use]
    pub fn page(&self, index: usize) -> Option<NativePage> {
        let (_, id) = self.pages.get(index)?;
        Some(NativePage::new(Arc::clone(&self.document), *id))
    }

    /// Extracts the text of the page at `index` (0-based).
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or the page content
    /// cannot be decoded.
    pub fn page_text(&self, index: usize) -> Result<String> {
        let (number, _) = self
            .pages
            .get(index)
            .ok_or_else(|| Error::pdf(&self.path, format!("page index {index} out of range")))?;

        self.document
            .extract_text(&[*number])
            .map_err(|e| Error::pdf(&self.path, e))
    }

    /// Concatenated text of the first `limit` pages.
    ///
    /// Pages whose text cannot be decoded contribute nothing.
    #[must_use]
    pub fn sample_text(&self, limit: usize) -> String {
        (0..self.page_count().min(limit))
            .filter_map(|index| self.page_text(index).ok())
            .collect()
    }
}

/// Builds an output PDF one sheet at a time.
pub struct PdfComposer {
    layout: Layout,
    document: Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    kids: Vec<Object>,
}

impl PdfComposer {
    /// Starts an empty document using `layout` for every sheet.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = document.add_object(dictionary! {
            "Font" => dictionary! {
                FONT_RESOURCE => font_id,
            },
        });

        Self {
            layout,
            document,
            pages_id,
            resources_id,
            kids: Vec::new(),
        }
    }

    /// Number of sheets added so far.
    #[must_use]
    pub fn sheet_count(&self) -> usize {
        self.kids.len()
    }

    /// Appends one sheet with the given lines, top to bottom.
    ///
    /// Lines must already fit the layout; characters outside Latin-1 are
    /// written as `?`.
    ///
    /// # Errors
    ///
    /// Returns an error if the content stream cannot be encoded.
    pub fn add_sheet(&mut self, lines: &[String]) -> Result<()> {
        let layout = self.layout;
        let mut operations = Vec::with_capacity(lines.len() * 5);
        let left = layout.margin.round() as i64;
        let top = (layout.page_height - layout.margin).round() as i64;
        let leading = layout.leading.round() as i64;
        let font_size = layout.font_size.round() as i64;

        for (row, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            // One text object per line keeps lines separable when the text is
            // extracted again.
            let baseline = top - leading * (row as i64 + 1);
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![FONT_RESOURCE.into(), font_size.into()],
            ));
            operations.push(Operation::new("Td", vec![left.into(), baseline.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(latin1_bytes(line))],
            ));
            operations.push(Operation::new("ET", vec![]));
        }

        let content = Content { operations };
        let encoded = content
            .encode()
            .map_err(|e| Error::pdf("<content stream>", e))?;
        let content_id = self
            .document
            .add_object(Stream::new(dictionary! {}, encoded));
        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
        });
        self.kids.push(page_id.into());

        Ok(())
    }

    /// Appends a copy of a source page, keeping its content streams,
    /// resources and page box as they are.
    ///
    /// Everything the page references is copied into this document; links
    /// back into the source page tree are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the page object is missing from its document.
    pub fn import_page(&mut self, page: &NativePage) -> Result<()> {
        let source = page.document.as_ref();
        let mut dict = source
            .get_dictionary(page.id)
            .map_err(|e| Error::pdf("<source page>", e))?
            .clone();

        let mut parent = dict.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;
        while let Some(parent_id) = parent {
            let Ok(node) = source.get_dictionary(parent_id) else {
                break;
            };
            for key in INHERITED_KEYS {
                if !dict.has(key) {
                    if let Ok(value) = node.get(key) {
                        dict.set(key, value.clone());
                    }
                }
            }
            depth += 1;
            if depth == MAX_TREE_DEPTH {
                break;
            }
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
        for key in DETACHED_KEYS {
            dict.remove(key);
        }

        let mut importer = PageImporter {
            source,
            target: &mut self.document,
            copied: BTreeMap::new(),
        };
        let mut dict = importer.copy_dictionary(&dict);
        dict.set("Parent", self.pages_id);

        let page_id = self.document.add_object(dict);
        self.kids.push(page_id.into());

        Ok(())
    }

    /// Finishes the page tree and serializes the document into `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn write_to<W: Write>(mut self, writer: &mut W) -> Result<()> {
        let layout = self.layout;
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
            "Resources" => self.resources_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                (layout.page_width.round() as i64).into(),
                (layout.page_height.round() as i64).into(),
            ],
        };
        self.document
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.document.trailer.set("Root", catalog_id);
        self.document.compress();

        self.document
            .save_to(writer)
            .map_err(|e| Error::pdf("<output document>", e))
    }
}

/// Deep-copies objects from a source document, allocating fresh ids in the
/// target. Each source object is copied at most once.
struct PageImporter<'a> {
    source: &'a Document,
    target: &'a mut Document,
    copied: BTreeMap<ObjectId, ObjectId>,
}

impl PageImporter<'_> {
    fn copy_reference(&mut self, id: ObjectId) -> ObjectId {
        if let Some(&new_id) = self.copied.get(&id) {
            return new_id;
        }
        let new_id = self.target.new_object_id();
        self.copied.insert(id, new_id);

        let object = match self.source.get_object(id) {
            Ok(Object::Dictionary(dict)) if is_page_tree_node(dict) => Object::Null,
            Ok(object) => self.copy_object(object),
            Err(_) => Object::Null,
        };
        self.target.objects.insert(new_id, object);
        new_id
    }

    fn copy_object(&mut self, object: &Object) -> Object {
        match object {
            Object::Reference(id) => Object::Reference(self.copy_reference(*id)),
            Object::Array(items) => {
                Object::Array(items.iter().map(|item| self.copy_object(item)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(self.copy_dictionary(dict)),
            Object::Stream(stream) => {
                let mut stream = stream.clone();
                stream.dict = self.copy_dictionary(&stream.dict);
                Object::Stream(stream)
            }
            other => other.clone(),
        }
    }

    fn copy_dictionary(&mut self, dict: &Dictionary) -> Dictionary {
        let mut copy = Dictionary::new();
        for (key, value) in dict.iter() {
            copy.set(key.clone(), self.copy_object(value));
        }
        copy
    }
}

fn is_page_tree_node(dict: &Dictionary) -> bool {
    dict.get(b"Type")
        .and_then(Object::as_name)
        .is_ok_and(|name| name == b"Page" || name == b"Pages")
}

/// Encodes a line as Latin-1 bytes for a WinAnsi-encoded font.
fn latin1_bytes(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .collect()
}
