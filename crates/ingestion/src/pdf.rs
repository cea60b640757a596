//! PDF text extraction module
//!
//! Extracts per-page text from in-memory PDF bytes using lopdf. Page order
//! is preserved; a page that yields no text becomes an empty string so page
//! numbering stays aligned with the source.

use crate::errors::IngestionError;
use tracing::{debug, warn};

/// Extract the text of every page, in page order
pub fn extract_pages(bytes: &[u8], source_id: &str) -> Result<Vec<String>, IngestionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestionError::PdfParse {
        source_id: source_id.to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(source_id, page_count = pages.len(), "Extracting text from PDF");

    let mut texts = Vec::with_capacity(pages.len());
    for (page_num, page_id) in pages.iter() {
        let text = match doc.extract_text(&[*page_num]) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(_) => match doc.get_page_content(*page_id) {
                Ok(content) => extract_text_from_content(&content),
                Err(e) => {
                    warn!(source_id, page = page_num, error = %e, "Failed to extract text from page");
                    String::new()
                }
            },
        };
        texts.push(clean_text(&text));
    }

    if texts.iter().all(|t| t.is_empty()) {
        return Err(IngestionError::PdfParse {
            source_id: source_id.to_string(),
            message: "No text content extracted from PDF".to_string(),
        });
    }

    Ok(texts)
}

/// Fallback extraction from a raw content stream (text between BT and ET)
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content_str.lines() {
        let trimmed = line.trim();
        match trimmed {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                text.push(' ');
            }
            _ if in_text_block => {
                if let Some(shown) = extract_text_from_operator(trimmed) {
                    text.push_str(&shown);
                }
            }
            _ => {}
        }
    }

    text
}

/// Text shown by a Tj, TJ, ' or " operator
fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        let start = line.find('(')?;
        let end = line.rfind(')')?;
        if end > start {
            return Some(decode_pdf_string(&line[start + 1..end]));
        }
        return None;
    }

    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();
        for ch in line.chars() {
            match ch {
                '(' => in_paren = true,
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }
        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Collapse whitespace and strip BOMs
fn clean_text(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("Hello   World\n\nTest"), "Hello World Test");
        assert_eq!(clean_text("\u{FEFF}Motion"), "Motion");
    }

    #[test]
    fn test_decode_pdf_string() {
        assert_eq!(decode_pdf_string("Hello\\nWorld"), "Hello\nWorld");
        assert_eq!(decode_pdf_string("Test\\(paren\\)"), "Test(paren)");
    }

    #[test]
    fn test_content_stream_fallback() {
        let stream = b"BT\n/F1 12 Tf\n(Count One) Tj\nET\nBT\n[(Bre) -20 (ach)] TJ\nET\n";
        let text = extract_text_from_content(stream);
        assert_eq!(clean_text(&text), "Count One Breach");
    }

    #[test]
    fn test_invalid_bytes_are_parse_error() {
        let err = extract_pages(b"not a pdf", "/case/motion.pdf").unwrap_err();
        assert!(matches!(err, IngestionError::PdfParse { .. }));
    }
}
