//! HTML to text extraction
//!
//! Keeps visible body text, drops script/style/noscript/template content,
//! and breaks lines at block-level elements.

use crate::errors::IngestionError;
use scraper::{ElementRef, Html, Node, Selector};

const SKIPPED: &[&str] = &["script", "style", "noscript", "template", "head", "svg", "iframe"];

const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "footer", "aside", "nav", "li", "ul",
    "ol", "table", "tr", "td", "th", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
    "br", "hr", "dd", "dt",
];

/// Title and visible text of an HTML page
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlText {
    pub title: Option<String>,
    pub text: String,
}

pub fn extract(html: &str) -> Result<HtmlText, IngestionError> {
    let document = Html::parse_document(html);
    let title_selector =
        Selector::parse("title").map_err(|e| IngestionError::Html(e.to_string()))?;
    let body_selector = Selector::parse("body").map_err(|e| IngestionError::Html(e.to_string()))?;

    let title = document
        .select(&title_selector)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let root = document
        .select(&body_selector)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut raw = String::new();
    collect_text(root, &mut raw);

    Ok(HtmlText {
        title,
        text: collapse_whitespace(&raw),
    })
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED.contains(&name) {
                    continue;
                }
                let block = BLOCKS.contains(&name);
                if block {
                    out.push('\n');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Collapse runs of spaces within lines and drop blank lines
fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_title_and_visible_text() {
        let html = r#"<html><head><title> Smith v. Jones </title>
            <style>p { color: red }</style></head>
            <body><h1>Holding</h1><p>The court   held that
            standing requires concrete injury.</p>
            <script>track();</script><noscript>enable js</noscript>
            <ul><li>First</li><li>Second</li></ul></body></html>"#;

        let page = extract(html).unwrap();
        assert_eq!(page.title.as_deref(), Some("Smith v. Jones"));
        assert!(page.text.contains("Holding"));
        assert!(page.text.contains("The court held that"));
        assert!(page.text.contains("First\nSecond"));
        assert!(!page.text.contains("track()"));
        assert!(!page.text.contains("color: red"));
        assert!(!page.text.contains("enable js"));
    }

    #[test]
    fn test_fragment_without_body() {
        let page = extract("<p>bare fragment</p>").unwrap();
        assert_eq!(page.title, None);
        assert_eq!(page.text, "bare fragment");
    }
}
