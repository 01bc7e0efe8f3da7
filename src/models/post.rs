//! Post models for crawled search results and their analysis payloads.
//!
//! A post starts as a bare search hit (title + link), gains text once the
//! page crawler has visited it, and gains an analysis once a batch job
//! containing it completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A messenger channel reference extracted from a promotion.
///
/// The model returns only `identifier`; `channel_id`, `is_processed` and
/// `error` accrete later as channel-ingestion tasks report back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelIdentifier {
    /// Channel link, handle, or numeric id as it appeared in the content.
    pub identifier: String,
    /// Resolved platform channel id, once ingestion has looked it up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,
    /// Whether the downstream ingestion task has handled this identifier.
    #[serde(default)]
    pub is_processed: bool,
    /// Ingestion error, if the channel could not be collected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single detected promotion with its channel references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promotion {
    /// The promotional content detected in the post.
    pub content: String,
    /// Channel identifiers referenced by the promotion.
    pub identifiers: Vec<ChannelIdentifier>,
}

/// Validated analysis result for one post.
///
/// Both fields are required on the wire; unknown keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostAnalysis {
    /// Whether the post is related to drug promotion.
    pub drugs_related: bool,
    /// Detected promotions with associated channel information.
    pub promotions: Vec<Promotion>,
}

impl PostAnalysis {
    /// True when at least one promotion was detected.
    pub fn has_promotions(&self) -> bool {
        !self.promotions.is_empty()
    }
}

/// A crawled web post queued for analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Unique identifier for this post.
    pub id: String,
    /// Title of the page as shown in search results.
    pub title: String,
    /// URL of the page.
    pub link: String,
    /// Domain of the page (e.g. example.com).
    pub domain: Option<String>,
    /// Search-result snippet, if any.
    pub description: Option<String>,
    /// Raw HTML captured by the page crawler.
    pub html: Option<String>,
    /// Text extracted from the page, absent until crawled.
    pub text: Option<String>,
    /// Analysis result, absent until a batch job completes.
    pub analysis: Option<PostAnalysis>,
    /// Back-reference to the analysis job this post is registered in.
    pub analysis_job_id: Option<String>,
    /// When the post was first seen.
    pub discovered_at: DateTime<Utc>,
    /// When the post was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Create a new post from a search result.
    pub fn new(title: String, link: String, domain: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            link,
            domain,
            description: None,
            html: None,
            text: None,
            analysis: None,
            analysis_job_id: None,
            discovered_at: now,
            updated_at: now,
        }
    }

    /// Whether this post is eligible for batch registration: it has crawled
    /// text and no analysis yet.
    pub fn is_analyzable(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty()) && self.analysis.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_requires_both_keys() {
        let err = serde_json::from_str::<PostAnalysis>(r#"{"drugs_related": true}"#);
        assert!(err.is_err());

        let err = serde_json::from_str::<PostAnalysis>(r#"{"promotions": []}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_analysis_ignores_unknown_keys() {
        let analysis: PostAnalysis = serde_json::from_str(
            r#"{"drugs_related": false, "promotions": [], "confidence": 0.9}"#,
        )
        .unwrap();
        assert!(!analysis.drugs_related);
        assert!(!analysis.has_promotions());
    }

    #[test]
    fn test_identifier_defaults() {
        let parsed: ChannelIdentifier =
            serde_json::from_str(r#"{"identifier": "t.me/example"}"#).unwrap();
        assert_eq!(parsed.identifier, "t.me/example");
        assert!(!parsed.is_processed);
        assert!(parsed.channel_id.is_none());
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_post_analyzable() {
        let mut post = Post::new(
            "Title".to_string(),
            "https://example.com/p/1".to_string(),
            Some("example.com".to_string()),
        );
        assert!(!post.is_analyzable());

        post.text = Some("some content".to_string());
        assert!(post.is_analyzable());

        post.analysis = Some(PostAnalysis {
            drugs_related: false,
            promotions: Vec::new(),
        });
        assert!(!post.is_analyzable());
    }
}
