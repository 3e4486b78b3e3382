//! Fixed-layout text pagination.
//!
//! Turns a text blob into letter-sized pages of wrapped Helvetica lines. Page
//! boundaries depend only on the layout constants and the input text, so the
//! same input always yields the same pages.

use crate::file::SourceFile;
use crate::page::Page;
use std::sync::Arc;
use std::vec::IntoIter;

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
const HELVETICA_ASCII_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

/// Width used for Latin-1 characters outside the ASCII table.
const HELVETICA_DEFAULT_WIDTH: u16 = 556;

/// Page geometry and font metrics, in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    /// Page width
    pub page_width: f64,
    /// Page height
    pub page_height: f64,
    /// Margin applied on all four sides
    pub margin: f64,
    /// Font size
    pub font_size: f64,
    /// Distance between baselines
    pub leading: f64,
}

impl Default for Layout {
    fn default() -> Self {
        Self::LETTER
    }
}

impl Layout {
    /// US Letter, 1 inch margins, Helvetica 10/12.
    pub const LETTER: Self = Self {
        page_width: 612.0,
        page_height: 792.0,
        margin: 72.0,
        font_size: 10.0,
        leading: 12.0,
    };

    /// Width available for text.
    #[must_use]
    pub fn usable_width(&self) -> f64 {
        self.page_width - 2.0 * self.margin
    }

    /// Number of lines that fit between the margins.
    #[must_use]
    pub fn lines_per_page(&self) -> usize {
        let usable_height = self.page_height - 2.0 * self.margin;
        ((usable_height / self.leading).floor() as usize).max(1)
    }

    /// Rendered width of `text` in points.
    #[must_use]
    pub fn text_width(&self, text: &str) -> f64 {
        let units: u32 = text.chars().map(|c| u32::from(char_width(c))).sum();
        f64::from(units) * self.font_size / 1000.0
    }

    /// Greedily wraps one line on word boundaries.
    ///
    /// A word wider than the usable width is emitted alone on an over-wide
    /// line rather than split. A blank line wraps to a single empty line.
    #[must_use]
    pub fn wrap_line(&self, line: &str) -> Vec<String> {
        let max_width = self.usable_width();
        let mut wrapped = Vec::new();
        let mut current = String::new();

        for word in line.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }

            let candidate_width = self.text_width(&current) + self.text_width(" ") + self.text_width(word);
            if candidate_width <= max_width {
                current.push(' ');
                current.push_str(word);
            } else {
                wrapped.push(std::mem::take(&mut current));
                current.push_str(word);
            }
        }

        if !current.is_empty() || wrapped.is_empty() {
            wrapped.push(current);
        }

        wrapped
    }

    /// Lays already-sanitized lines onto sheets, wrapping as needed.
    ///
    /// Always returns at least one sheet, which may be empty.
    #[must_use]
    pub fn paginate(&self, lines: &[String]) -> Vec<Vec<String>> {
        let per_page = self.lines_per_page();
        let mut sheets = Vec::new();
        let mut current = Vec::with_capacity(per_page);

        for line in lines {
            for wrapped in self.wrap_line(line) {
                if current.len() == per_page {
                    sheets.push(std::mem::replace(&mut current, Vec::with_capacity(per_page)));
                }
                current.push(wrapped);
            }
        }

        if !current.is_empty() || sheets.is_empty() {
            sheets.push(current);
        }

        sheets
    }
}

fn char_width(c: char) -> u16 {
    match c as u32 {
        code @ 32..=126 => HELVETICA_ASCII_WIDTHS[(code - 32) as usize],
        _ => HELVETICA_DEFAULT_WIDTH,
    }
}

/// Maps text onto the Latin-1 range the output font can show.
///
/// Characters above U+00FF become `?`, tabs become four spaces and other
/// control characters are dropped.
#[must_use]
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\t' => out.push_str("    "),
            c if c.is_control() => {}
            c if (c as u32) > 0xFF => out.push('?'),
            c => out.push(c),
        }
    }
    out
}

/// Produces synthetic pages for sources that are not page-structured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRenderer {
    layout: Layout,
}

impl PageRenderer {
    /// Creates a renderer for the given layout.
    #[must_use]
    pub const fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Renders `text` into a lazy sequence of pages owned by `source`.
    #[must_use]
    pub fn render(&self, source: Arc<SourceFile>, text: &str) -> RenderedPages {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        let lines: Vec<String> = normalized.lines().map(sanitize).collect();

        RenderedPages {
            layout: self.layout,
            source,
            lines: lines.into_iter(),
            pending: Vec::new(),
            next_number: 1,
            done: false,
        }
    }
}

/// Iterator over rendered pages; wraps input lines only as pages are pulled.
#[derive(Debug)]
pub struct RenderedPages {
    layout: Layout,
    source: Arc<SourceFile>,
    lines: IntoIter<String>,
    pending: Vec<String>,
    next_number: usize,
    done: bool,
}

impl Iterator for RenderedPages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.done {
            return None;
        }

        let per_page = self.layout.lines_per_page();
        let mut page_lines = Vec::with_capacity(per_page);

        loop {
            if !self.pending.is_empty() {
                let take = (per_page - page_lines.len()).min(self.pending.len());
                page_lines.extend(self.pending.drain(..take));
            }

            if page_lines.len() == per_page {
                break;
            }

            match self.lines.next() {
                Some(line) => self.pending = self.layout.wrap_line(&line),
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if page_lines.is_empty() && self.next_number > 1 {
            return None;
        }

        let number = self.next_number;
        self.next_number += 1;
        Some(Page::rendered(Arc::clone(&self.source), number, page_lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageOrigin;

    fn source() -> Arc<SourceFile> {
        Arc::new(SourceFile::new("doc.txt", 0))
    }

    #[test]
    fn test_letter_layout_geometry() {
        let layout = Layout::LETTER;
        assert_eq!(layout.usable_width(), 468.0);
        assert_eq!(layout.lines_per_page(), 54);
    }

    #[test]
    fn test_text_width_uses_helvetica_metrics() {
        let layout = Layout::LETTER;
        // 'W' is 944/1000 em, 'i' is 222/1000 em at 10pt.
        assert!((layout.text_width("W") - 9.44).abs() < 1e-9);
        assert!((layout.text_width("i") - 2.22).abs() < 1e-9);
    }

    #[test]
    fn test_wrap_keeps_short_line() {
        let layout = Layout::LETTER;
        assert_eq!(layout.wrap_line("hello world"), vec!["hello world"]);
    }

    #[test]
    fn test_wrap_blank_line_is_preserved() {
        let layout = Layout::LETTER;
        assert_eq!(layout.wrap_line(""), vec![String::new()]);
        assert_eq!(layout.wrap_line("   "), vec![String::new()]);
    }

    #[test]
    fn test_wrap_breaks_on_word_boundaries() {
        let layout = Layout::LETTER;
        let line = vec!["word"; 200].join(" ");
        let wrapped = layout.wrap_line(&line);

        assert!(wrapped.len() > 1);
        for part in &wrapped {
            assert!(layout.text_width(part) <= layout.usable_width());
            assert!(part.split(' ').all(|w| w == "word"));
        }
        let total: usize = wrapped.iter().map(|p| p.split(' ').count()).sum();
        assert_eq!(total, 200);
    }

    #[test]
    fn test_wrap_overlong_word_gets_own_line() {
        let layout = Layout::LETTER;
        let giant = "x".repeat(500);
        let wrapped = layout.wrap_line(&format!("a {giant} b"));

        assert_eq!(wrapped, vec!["a".to_string(), giant, "b".to_string()]);
    }

    #[test]
    fn test_sanitize_replaces_unsupported_chars() {
        assert_eq!(sanitize("caf\u{e9}"), "caf\u{e9}");
        assert_eq!(sanitize("snow \u{2603}"), "snow ?");
        assert_eq!(sanitize("a\tb"), "a    b");
        assert_eq!(sanitize("bell\u{7}"), "bell");
    }

    #[test]
    fn test_render_single_page() {
        let renderer = PageRenderer::default();
        let pages: Vec<_> = renderer.render(source(), "line one\nline two").collect();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].lines(), ["line one", "line two"]);
        assert_eq!(pages[0].number(), 1);
        assert_eq!(pages[0].origin(), PageOrigin::Rendered);
    }

    #[test]
    fn test_render_flushes_at_bottom_margin() {
        let renderer = PageRenderer::default();
        let text = (1..=120).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let pages: Vec<_> = renderer.render(source(), &text).collect();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].lines().len(), 54);
        assert_eq!(pages[1].lines().len(), 54);
        assert_eq!(pages[2].lines().len(), 12);
        assert_eq!(pages[1].lines()[0], "line 55");
        assert_eq!(pages[2].number(), 3);
    }

    #[test]
    fn test_render_exact_page_fill_has_no_trailing_empty_page() {
        let renderer = PageRenderer::default();
        let text = (1..=54).map(|i| format!("l{i}")).collect::<Vec<_>>().join("\n");
        let pages: Vec<_> = renderer.render(source(), &text).collect();

        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = PageRenderer::default();
        let text = "alpha beta gamma\n".repeat(300);
        let first: Vec<_> = renderer.render(source(), &text).map(|p| p.text()).collect();
        let second: Vec<_> = renderer.render(source(), &text).map(|p| p.text()).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_paginate_continues_long_native_text() {
        let layout = Layout::LETTER;
        let lines: Vec<String> = (0..60).map(|i| i.to_string()).collect();
        let sheets = layout.paginate(&lines);

        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[1].len(), 6);
    }

    #[test]
    fn test_paginate_empty_gives_one_blank_sheet() {
        let sheets = Layout::LETTER.paginate(&[]);
        assert_eq!(sheets, vec![Vec::<String>::new()]);
    }
}
