//! Post persistence.
//!
//! Posts are owned by the crawl pipeline; the batcher only writes the
//! analysis payload and the job back-reference. Channel write-backs address
//! identifier objects inside the stored analysis JSON through the dotted
//! wire path carried by channel tasks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::{connect, parse_datetime, to_option, Result};
use crate::models::{Post, PostAnalysis};

/// One identifier awaiting channel ingestion, addressed by its wire path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIdentifier {
    pub post_id: String,
    /// Dotted path of the identifier object inside the post document,
    /// e.g. `analysis.promotions.0.identifiers.1`.
    pub path: String,
    pub identifier: String,
}

/// Parse the dotted identifier wire path into (promotion, identifier) indices.
pub fn parse_identifier_path(path: &str) -> Option<(usize, usize)> {
    let mut parts = path.split('.');
    if parts.next()? != "analysis" || parts.next()? != "promotions" {
        return None;
    }
    let promotion = parts.next()?.parse().ok()?;
    if parts.next()? != "identifiers" {
        return None;
    }
    let identifier = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((promotion, identifier))
}

fn identifier_json_path(path: &str, field: &str) -> Option<String> {
    let (promotion, identifier) = parse_identifier_path(path)?;
    Some(format!(
        "$.promotions[{}].identifiers[{}].{}",
        promotion, identifier, field
    ))
}

/// Repository for crawled posts.
pub struct PostRepository {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl PostRepository {
    /// Open the repository and ensure its schema exists.
    pub fn new(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
            busy_timeout,
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path, self.busy_timeout)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL UNIQUE,
                domain TEXT,
                description TEXT,
                html TEXT,
                text TEXT,
                analysis TEXT,
                analysis_job_id TEXT,
                discovered_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_job ON posts (analysis_job_id);
        "#,
        )?;
        Ok(())
    }

    /// Insert a post row.
    pub fn insert(&self, post: &Post) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO posts (id, title, link, domain, description, html, text,
                               analysis, analysis_job_id, discovered_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                post.id,
                post.title,
                post.link,
                post.domain,
                post.description,
                post.html,
                post.text,
                post.analysis
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                post.analysis_job_id,
                post.discovered_at.to_rfc3339(),
                post.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Store a freshly discovered search result, deduplicated by link.
    ///
    /// The page text is withheld until the crawl stage has visited the link.
    /// Returns the new post id, or None when the link was already known.
    pub fn insert_discovered(&self, post: &Post) -> Result<Option<String>> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO posts (id, title, link, domain, description, discovered_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (link) DO NOTHING
            "#,
            params![
                post.id,
                post.title,
                post.link,
                post.domain,
                post.description,
                post.discovered_at.to_rfc3339(),
                post.updated_at.to_rfc3339(),
            ],
        )?;
        if inserted == 1 {
            Ok(Some(post.id.clone()))
        } else {
            tracing::debug!("Post already discovered, skipping. link: {}", post.link);
            Ok(None)
        }
    }

    /// Get a post by id.
    pub fn get(&self, post_id: &str) -> Result<Option<Post>> {
        let conn = self.connect()?;
        to_option(conn.query_row(
            "SELECT * FROM posts WHERE id = ?1",
            params![post_id],
            row_to_post,
        ))
    }

    /// Get a post by link.
    pub fn get_by_link(&self, link: &str) -> Result<Option<Post>> {
        let conn = self.connect()?;
        to_option(conn.query_row(
            "SELECT * FROM posts WHERE link = ?1",
            params![link],
            row_to_post,
        ))
    }

    /// Store the crawl result for a post.
    pub fn set_content(&self, post_id: &str, html: &str, text: &str) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE posts SET html = ?1, text = ?2, updated_at = ?3 WHERE id = ?4",
            params![html, text, Utc::now().to_rfc3339(), post_id],
        )?;
        Ok(changed == 1)
    }

    /// Apply a validated analysis onto a post.
    ///
    /// The write is an unconditional set of the full payload, so applying
    /// the same result twice converges to the same state.
    pub fn set_analysis(&self, post_id: &str, analysis: &PostAnalysis) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE posts SET analysis = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(analysis)?,
                Utc::now().to_rfc3339(),
                post_id
            ],
        )?;
        Ok(changed == 1)
    }

    /// Bump a post's modification timestamp.
    pub fn touch(&self, post_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE posts SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), post_id],
        )?;
        Ok(changed == 1)
    }

    /// Posts registered into a job that still await analysis.
    pub fn posts_for_job(&self, job_id: &str) -> Result<Vec<Post>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM posts
            WHERE analysis_job_id = ?1
              AND analysis IS NULL
              AND text IS NOT NULL AND text != ''
            ORDER BY discovered_at ASC
            "#,
        )?;
        let posts = stmt
            .query_map(params![job_id], row_to_post)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Crawled posts eligible for (re-)registration: they have text, no
    /// analysis, and no membership in an active job. Posts whose previous
    /// job failed pass this filter.
    pub fn registrable_posts(&self) -> Result<Vec<Post>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM posts p
            WHERE p.text IS NOT NULL AND p.text != ''
              AND p.analysis IS NULL
              AND (p.analysis_job_id IS NULL OR p.analysis_job_id NOT IN (
                  SELECT id FROM analysis_jobs
                  WHERE status IN ('accepting', 'pending', 'submitted', 'processed')))
            ORDER BY p.discovered_at ASC
            "#,
        )?;
        let posts = stmt
            .query_map([], row_to_post)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// All identifiers inside stored analyses that no channel task has
    /// handled yet, addressed by their wire paths.
    pub fn unprocessed_identifiers(&self) -> Result<Vec<PendingIdentifier>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT p.id,
                   promo.key,
                   ident.key,
                   json_extract(ident.value, '$.identifier')
            FROM posts p,
                 json_each(p.analysis, '$.promotions') AS promo,
                 json_each(promo.value, '$.identifiers') AS ident
            WHERE p.analysis IS NOT NULL
              AND json_extract(ident.value, '$.identifier') IS NOT NULL
              AND json_extract(ident.value, '$.is_processed') IS NOT 1
            ORDER BY p.id, promo.key, ident.key
            "#,
        )?;
        let pending = stmt
            .query_map([], |row| {
                let post_id: String = row.get(0)?;
                let promo_idx: i64 = row.get(1)?;
                let ident_idx: i64 = row.get(2)?;
                let identifier: String = row.get(3)?;
                Ok(PendingIdentifier {
                    post_id,
                    path: format!(
                        "analysis.promotions.{}.identifiers.{}",
                        promo_idx, ident_idx
                    ),
                    identifier,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    /// Record the resolved channel id for one identifier.
    pub fn set_identifier_channel(
        &self,
        post_id: &str,
        path: &str,
        channel_id: i64,
    ) -> Result<bool> {
        let Some(json_path) = identifier_json_path(path, "channel_id") else {
            return Err(super::RepositoryError::NotFound(format!(
                "invalid identifier path: {}",
                path
            )));
        };
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE posts SET analysis = json_set(analysis, ?1, ?2), updated_at = ?3
             WHERE id = ?4 AND analysis IS NOT NULL",
            params![json_path, channel_id, Utc::now().to_rfc3339(), post_id],
        )?;
        Ok(changed == 1)
    }

    /// Mark one identifier as handled, optionally recording the ingestion
    /// error that ended it.
    pub fn mark_identifier_processed(
        &self,
        post_id: &str,
        path: &str,
        error: Option<&str>,
    ) -> Result<bool> {
        let Some((promotion, identifier)) = parse_identifier_path(path) else {
            return Err(super::RepositoryError::NotFound(format!(
                "invalid identifier path: {}",
                path
            )));
        };
        let prefix = format!("$.promotions[{}].identifiers[{}]", promotion, identifier);
        let processed_path = format!("{}.is_processed", prefix);
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let changed = match error {
            Some(error) => {
                let error_path = format!("{}.error", prefix);
                conn.execute(
                    "UPDATE posts
                     SET analysis = json_set(analysis, ?1, json('true'), ?2, ?3),
                         updated_at = ?4
                     WHERE id = ?5 AND analysis IS NOT NULL",
                    params![processed_path, error_path, error, now, post_id],
                )?
            }
            None => conn.execute(
                "UPDATE posts
                 SET analysis = json_set(analysis, ?1, json('true')), updated_at = ?2
                 WHERE id = ?3 AND analysis IS NOT NULL",
                params![processed_path, now, post_id],
            )?,
        };
        Ok(changed == 1)
    }

    /// Total number of posts.
    pub fn count(&self) -> Result<u32> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u32)
    }

    /// Number of posts with an applied analysis.
    pub fn count_analyzed(&self) -> Result<u32> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE analysis IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }
}

fn row_to_post(row: &Row) -> rusqlite::Result<Post> {
    let analysis: Option<String> = row.get("analysis")?;
    Ok(Post {
        id: row.get("id")?,
        title: row.get("title")?,
        link: row.get("link")?,
        domain: row.get("domain")?,
        description: row.get("description")?,
        html: row.get("html")?,
        text: row.get("text")?,
        analysis: analysis.as_deref().and_then(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| tracing::warn!("Stored analysis is not decodable: {}", e))
                .ok()
        }),
        analysis_job_id: row.get("analysis_job_id")?,
        discovered_at: parse_datetime(&row.get::<_, String>("discovered_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}
