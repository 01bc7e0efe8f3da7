//! Search and page-crawl stages.

mod extract;
mod page;
mod search;

pub use extract::extract_text;
pub use page::{CrawledPage, PageCrawler};
pub use search::{GoogleSearchClient, SearchError, SearchResult};

use std::sync::OnceLock;

use regex::Regex;

/// Whether a link points at a messenger channel rather than a webpage.
pub fn is_telegram_link(link: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:^|//|\.)(?:t\.me|telegram\.me|telegram\.dog)/").expect("valid pattern")
    });
    pattern.is_match(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_telegram_link() {
        assert!(is_telegram_link("https://t.me/somechannel"));
        assert!(is_telegram_link("http://telegram.me/somechannel"));
        assert!(is_telegram_link("t.me/joinchat/abc"));
        assert!(!is_telegram_link("https://example.com/t.html"));
        assert!(!is_telegram_link("https://example.com/telegram-review"));
    }
}
