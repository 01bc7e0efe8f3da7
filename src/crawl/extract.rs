//! Meaningful-text extraction from crawled HTML.

use std::collections::HashSet;

use scraper::{Html, Selector};

/// Extracted text is capped to keep analysis requests bounded.
const MAX_EXTRACT_CHARS: usize = 4000;

/// Fragments shorter than this carry no signal.
const MIN_FRAGMENT_CHARS: usize = 4;

/// Extract the meaningful text of a page: title, headings, meta
/// descriptions and body content, whitespace-normalized and de-duplicated.
pub fn extract_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html);
    let mut seen: HashSet<String> = HashSet::new();
    let mut fragments: Vec<String> = Vec::new();

    let mut push = |text: &str| {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.len() >= MIN_FRAGMENT_CHARS && seen.insert(normalized.clone()) {
            fragments.push(normalized);
        }
    };

    let heading_selector =
        Selector::parse("title, h1, h2, h3, h4, h5, h6").expect("valid selector");
    for element in document.select(&heading_selector) {
        push(&element.text().collect::<String>());
    }

    let meta_selector = Selector::parse(
        r#"meta[name="description"], meta[name="keywords"], meta[property="og:title"], meta[property="og:description"]"#,
    )
    .expect("valid selector");
    for element in document.select(&meta_selector) {
        if let Some(content) = element.value().attr("content") {
            push(content);
        }
    }

    let content_selector = Selector::parse(
        "p, li, td, th, blockquote, article, section, main, a, span, div",
    )
    .expect("valid selector");
    for element in document.select(&content_selector) {
        // Only direct text nodes; descendants are visited on their own.
        for text in element
            .children()
            .filter_map(|node| node.value().as_text())
        {
            push(text);
        }
    }

    let mut result = String::new();
    for fragment in fragments {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(&fragment);
        if result.len() >= MAX_EXTRACT_CHARS {
            break;
        }
    }

    if result.len() > MAX_EXTRACT_CHARS {
        let mut cut = MAX_EXTRACT_CHARS;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result.truncate(cut);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_title_and_body() {
        let html = r#"
            <html>
              <head>
                <title>Sale Page</title>
                <meta name="description" content="A page describing things for sale">
              </head>
              <body>
                <h1>Big Announcement</h1>
                <p>Contact us on our channel for details.</p>
              </body>
            </html>
        "#;
        let text = extract_text(html);
        assert!(text.contains("Sale Page"));
        assert!(text.contains("A page describing things for sale"));
        assert!(text.contains("Big Announcement"));
        assert!(text.contains("Contact us on our channel for details."));
    }

    #[test]
    fn test_skips_scripts_and_styles() {
        let html = r#"
            <html><body>
              <script>var secret = "do-not-extract";</script>
              <style>.cls { color: red }</style>
              <p>Visible paragraph text</p>
            </body></html>
        "#;
        let text = extract_text(html);
        assert!(text.contains("Visible paragraph text"));
        assert!(!text.contains("do-not-extract"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn test_deduplicates_repeated_fragments() {
        let html = r#"
            <html><body>
              <p>Repeated block</p>
              <p>Repeated block</p>
              <p>Unique block</p>
            </body></html>
        "#;
        let text = extract_text(html);
        assert_eq!(text.matches("Repeated block").count(), 1);
        assert!(text.contains("Unique block"));
    }

    #[test]
    fn test_respects_length_cap() {
        let body: String = (0..200)
            .map(|n| format!("<p>unique paragraph number {} with some padding text</p>", n))
            .collect();
        let html = format!("<html><body>{}</body></html>", body);
        let text = extract_text(&html);
        assert!(text.len() <= MAX_EXTRACT_CHARS);
        assert!(text.len() > MAX_EXTRACT_CHARS / 2);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(extract_text(""), "");
        assert_eq!(extract_text("   "), "");
    }
}
