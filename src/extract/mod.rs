//! Document text extraction.
//!
//! Plain text is read as UTF-8. EPUB documents are walked in spine order
//! with `epub` and each XHTML page is rendered to text by `html2text`. PDF
//! text comes from `pdf-extract`. Everything passes through `normalize_text`
//! before segmentation.

use std::path::Path;

use epub::doc::EpubDoc;
use html2text::render::text_renderer::TrivialDecorator;
use tracing::{debug, info, warn};

use crate::error::ExtractionError;

/// Read a document and return normalized, non-empty text.
pub fn extract_text(path: &Path) -> Result<String, ExtractionError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let raw = match extension.as_str() {
        "txt" | "text" | "md" => read_plain(path)?,
        "epub" => read_epub(path)?,
        "pdf" => read_pdf(path)?,
        "" => return Err(ExtractionError::Unsupported("file has no extension".into())),
        other => return Err(ExtractionError::Unsupported(format!(".{}", other))),
    };

    let text = prepare_text(&raw)?;
    info!(path = %path.display(), chars = text.chars().count(), "Extracted document text");
    Ok(text)
}

/// Normalize raw text, rejecting documents with nothing to read.
pub fn prepare_text(raw: &str) -> Result<String, ExtractionError> {
    let text = normalize_text(raw);
    if text.is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(text)
}

/// Join hard-wrapped lines and collapse whitespace, keeping paragraph
/// breaks as a single blank line.
pub fn normalize_text(raw: &str) -> String {
    let raw = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in raw.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if !current.is_empty() {
            // Re-join words hyphenated across a line break.
            if current.ends_with('-') && line.starts_with(char::is_lowercase) {
                current.pop();
            } else {
                current.push(' ');
            }
        }
        current.extend(collapse_whitespace(line));
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs.join("\n\n")
}

fn collapse_whitespace(line: &str) -> impl Iterator<Item = char> + '_ {
    let mut previous_space = false;
    line.chars().filter_map(move |c| {
        if c.is_whitespace() {
            if previous_space {
                return None;
            }
            previous_space = true;
            Some(' ')
        } else {
            previous_space = false;
            Some(c)
        }
    })
}

fn read_plain(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|e| ExtractionError::Malformed {
        path: path.to_path_buf(),
        reason: format!("not valid UTF-8: {}", e),
    })
}

/// Render width handed to `html2text`; wide enough that it never wraps.
const RENDER_WIDTH: usize = 100_000;

fn read_epub(path: &Path) -> Result<String, ExtractionError> {
    let mut doc = EpubDoc::new(path).map_err(|e| ExtractionError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut sections = Vec::new();
    loop {
        match doc.get_current_str() {
            Some((html, _mime)) => sections.push(html_to_text(&html)),
            None => debug!(page = sections.len(), "Skipping unreadable EPUB spine item"),
        }
        if !doc.go_next() {
            break;
        }
    }
    debug!(sections = sections.len(), "EPUB spine read");
    Ok(sections.join("\n\n"))
}

/// Reduce an XHTML document to plain text, keeping block boundaries as
/// paragraph breaks.
pub fn html_to_text(html: &str) -> String {
    html2text::from_read_with_decorator(html.as_bytes(), RENDER_WIDTH, TrivialDecorator::new())
}

fn read_pdf(path: &Path) -> Result<String, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let malformed = |reason: String| ExtractionError::Malformed {
        path: path.to_path_buf(),
        reason,
    };
    // pdf-extract panics on some malformed inputs instead of returning an error.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(malformed(format!("{:?}", e))),
        Err(_) => {
            warn!(path = %path.display(), "PDF parser panicked");
            Err(malformed("PDF parser panicked".into()))
        }
    }
}
