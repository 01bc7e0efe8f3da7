//! Page crawler: fetch a post's link and extract its text.

use std::time::Duration;

use reqwest::Client;
use tracing::warn;

use super::extract_text;

/// Result of crawling one page.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub html: String,
    pub text: String,
}

/// HTTP page fetcher with bounded retries and a growing timeout.
pub struct PageCrawler {
    http: Client,
    max_retries: u32,
}

impl PageCrawler {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            max_retries: 3,
        }
    }

    /// Fetch a page and extract its text. Returns None when every attempt
    /// failed; the caller decides whether the post stays crawlable.
    pub async fn crawl(&self, link: &str) -> Option<CrawledPage> {
        let mut attempt_timeout = Duration::from_secs(1);
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_retries {
            let result = self
                .http
                .get(link)
                .timeout(attempt_timeout)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    match response.text().await {
                        Ok(html) => {
                            let text = extract_text(&html);
                            return Some(CrawledPage {
                                html,
                                text: text.trim().to_string(),
                            });
                        }
                        Err(e) => {
                            last_error = Some(e.to_string());
                            warn!("Failed to read page body. link: {}, error: {}", link, e);
                        }
                    }
                }
                Ok(response) => {
                    last_error = Some(format!("status {}", response.status()));
                    warn!(
                        "Page returned an error status. link: {}, status: {}",
                        link,
                        response.status()
                    );
                }
                Err(e) if e.is_timeout() => {
                    last_error = Some(e.to_string());
                    warn!(
                        "Page fetch timed out. link: {}, timeout: {:?}, attempt: {}",
                        link, attempt_timeout, attempt
                    );
                    attempt_timeout += Duration::from_secs(1);
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    warn!("Page fetch failed. link: {}, error: {}", link, e);
                }
            }
        }

        warn!(
            "All page fetch attempts failed. link: {}, attempts: {}, last error: {}",
            link,
            self.max_retries,
            last_error.unwrap_or_default()
        );
        None
    }
}
