//! Search-engine adapter for discovering candidate posts.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// Results come back ten per page at most.
const PAGE_SIZE: u32 = 10;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("search credentials are not configured (GOOGLE_API_KEY / GOOGLE_CSE_ID)")]
    MissingCredentials,
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One search hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub domain: Option<String>,
    pub snippet: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    title: String,
    link: String,
    #[serde(rename = "displayLink")]
    display_link: Option<String>,
    snippet: Option<String>,
}

/// Custom-search client.
pub struct GoogleSearchClient {
    http: Client,
    api_key: String,
    engine_id: String,
    max_retries: u32,
}

impl GoogleSearchClient {
    pub fn new(api_key: String, engine_id: String, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            api_key,
            engine_id,
            max_retries: 3,
        }
    }

    /// Create a client from `GOOGLE_API_KEY` and `GOOGLE_CSE_ID`.
    pub fn from_env(timeout: Duration) -> Result<Self, SearchError> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(SearchError::MissingCredentials)?;
        let engine_id = std::env::var("GOOGLE_CSE_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(SearchError::MissingCredentials)?;
        Ok(Self::new(api_key, engine_id, timeout))
    }

    /// Search one query, paginating until `limit` results or the result set
    /// runs dry.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, SearchError> {
        let mut results = Vec::new();
        let mut start = 1u32;

        while (results.len() as u32) < limit {
            let page = match self.fetch_page(query, start, limit).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Search page fetch failed, stopping pagination: {}", e);
                    break;
                }
            };
            if page.items.is_empty() {
                break;
            }

            for item in page.items {
                results.push(SearchResult {
                    title: item.title,
                    link: item.link,
                    domain: item.display_link,
                    snippet: item.snippet,
                });
                if results.len() as u32 >= limit {
                    break;
                }
            }
            start += PAGE_SIZE;
        }

        Ok(results)
    }

    async fn fetch_page(
        &self,
        query: &str,
        start: u32,
        limit: u32,
    ) -> Result<SearchResponse, SearchError> {
        let num = limit.min(PAGE_SIZE).to_string();
        let start = start.to_string();
        let params = [
            ("key", self.api_key.as_str()),
            ("cx", self.engine_id.as_str()),
            ("q", query),
            ("num", num.as_str()),
            ("start", start.as_str()),
        ];

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .http
                .get(SEARCH_ENDPOINT)
                .query(&params)
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(response) => return Ok(response.json().await?),
                Err(e) if attempt < self.max_retries => {
                    warn!("Search request failed, retrying: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
