use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Article, Edition, EditionEntry, NewArticle, Source, SourcePollInfo};

use super::migrations;

/// All persistence goes through a single SQLite connection, so every
/// mutation in the process is serialized into one total order.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.busy_timeout(Duration::from_millis(5000))?;
            conn.query_row("PRAGMA journal_mode=WAL", [], |_row| Ok(()))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            migrations::apply(conn)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Source operations

    pub async fn insert_source(&self, url: String, title: Option<String>) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO source (url, title) VALUES (?1, ?2)",
                    params![url, title],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_all_sources(&self) -> Result<Vec<Source>> {
        let sources = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, url, title, etag, last_modified, created_at, updated_at
                     FROM source ORDER BY id",
                )?;
                let sources = stmt
                    .query_map([], |row| Ok(source_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sources)
            })
            .await?;
        Ok(sources)
    }

    pub async fn delete_source(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM source WHERE id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await?;
        Ok(deleted)
    }

    /// Sources in poll order (id ascending) with their cached validators.
    pub async fn list_sources_for_poll(&self) -> Result<Vec<SourcePollInfo>> {
        let sources = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, url, etag, last_modified FROM source ORDER BY id")?;
                let sources = stmt
                    .query_map([], |row| {
                        Ok(SourcePollInfo {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            etag: row.get(2)?,
                            last_modified: row.get(3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sources)
            })
            .await?;
        Ok(sources)
    }

    pub async fn update_source_validators(
        &self,
        id: i64,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE source SET etag = ?1, last_modified = ?2, updated_at = datetime('now')
                     WHERE id = ?3",
                    params![etag, last_modified, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Article operations

    /// Insert-or-update keyed by canonical_id, as one atomic statement.
    /// An empty canonical_id is an explicit no-op: identity is mandatory
    /// for deduplication, so such items are never stored.
    pub async fn upsert_article(&self, article: NewArticle) -> Result<()> {
        if article.canonical_id.is_empty() {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO article (source_id, canonical_id, canonical_url, title, summary, author, published_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                       ON CONFLICT(canonical_id) DO UPDATE SET
                           title = excluded.title,
                           summary = excluded.summary,
                           author = excluded.author,
                           published_at = excluded.published_at,
                           updated_at = excluded.updated_at"#,
                    params![
                        article.source_id,
                        article.canonical_id,
                        article.canonical_url,
                        article.title,
                        article.summary,
                        article.author,
                        fmt_ts(article.published_at),
                        fmt_ts(article.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn get_article_by_canonical_id(
        &self,
        canonical_id: String,
    ) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, source_id, canonical_id, canonical_url, title, summary, author, published_at, updated_at
                     FROM article WHERE canonical_id = ?1",
                )?;
                let article = stmt
                    .query_row(params![canonical_id], |row| Ok(article_from_row(row)))
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    #[allow(dead_code)]
    pub async fn count_articles_for_source(&self, source_id: i64) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM article WHERE source_id = ?1",
                    params![source_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Article ids in a closed publish-time window, newest first with id
    /// descending as the tie-break.
    #[allow(dead_code)]
    pub async fn list_articles_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(i64, DateTime<Utc>)>> {
        let (start, end) = (fmt_ts(start), fmt_ts(end));
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, published_at FROM article
                     WHERE published_at >= ?1 AND published_at <= ?2
                     ORDER BY published_at DESC, id DESC",
                )?;
                let articles = stmt
                    .query_map(params![start, end], |row| {
                        let id: i64 = row.get(0)?;
                        let published: String = row.get(1)?;
                        Ok((id, published))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles
            .into_iter()
            .map(|(id, published)| (id, parse_datetime(&published).unwrap_or_else(Utc::now)))
            .collect())
    }

    // Edition operations

    /// Builds the edition for local_date in one transaction: upsert the
    /// edition row (created_at preserved on conflict), wipe its links,
    /// re-rank the window, insert dense 1-based positions, commit. Any
    /// failure rolls the whole run back.
    pub async fn replace_edition(
        &self,
        local_date: String,
        published_at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64> {
        let published_at = fmt_ts(published_at);
        let (window_start, window_end) = (fmt_ts(window_start), fmt_ts(window_end));
        let edition_id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO edition (local_date, published_at) VALUES (?1, ?2)
                     ON CONFLICT(local_date) DO UPDATE SET published_at = excluded.published_at",
                    params![local_date, published_at],
                )?;
                let edition_id: i64 = tx.query_row(
                    "SELECT id FROM edition WHERE local_date = ?1",
                    params![local_date],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "DELETE FROM edition_article WHERE edition_id = ?1",
                    params![edition_id],
                )?;
                let article_ids: Vec<i64> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM article
                         WHERE published_at >= ?1 AND published_at <= ?2
                         ORDER BY published_at DESC, id DESC",
                    )?;
                    let ids = stmt
                        .query_map(params![window_start, window_end], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    ids
                };
                for (i, article_id) in article_ids.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO edition_article (edition_id, article_id, position)
                         VALUES (?1, ?2, ?3)",
                        params![edition_id, article_id, (i + 1) as i64],
                    )?;
                }
                tx.commit()?;
                Ok(edition_id)
            })
            .await?;
        Ok(edition_id)
    }

    #[allow(dead_code)]
    pub async fn get_edition(&self, local_date: String) -> Result<Option<Edition>> {
        let edition = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, local_date, published_at, created_at FROM edition
                     WHERE local_date = ?1",
                )?;
                let edition = stmt
                    .query_row(params![local_date], |row| Ok(edition_from_row(row)))
                    .optional()?;
                Ok(edition)
            })
            .await?;
        Ok(edition)
    }

    /// Entries of one edition in position order.
    #[allow(dead_code)]
    pub async fn edition_entries(&self, edition_id: i64) -> Result<Vec<EditionEntry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT article_id, position FROM edition_article
                     WHERE edition_id = ?1 ORDER BY position",
                )?;
                let entries = stmt
                    .query_map(params![edition_id], |row| {
                        Ok(EditionEntry {
                            article_id: row.get(0)?,
                            position: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }
}

/// All instants are stored as RFC3339 UTC text, so lexicographic order in
/// SQL matches chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn source_from_row(row: &Row) -> Source {
    Source {
        id: row.get(0).unwrap(),
        url: row.get(1).unwrap(),
        title: row.get(2).unwrap(),
        etag: row.get(3).unwrap(),
        last_modified: row.get(4).unwrap(),
        created_at: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn article_from_row(row: &Row) -> Article {
    Article {
        id: row.get(0).unwrap(),
        source_id: row.get(1).unwrap(),
        canonical_id: row.get(2).unwrap(),
        canonical_url: row.get(3).unwrap(),
        title: row.get(4).unwrap(),
        summary: row.get(5).unwrap(),
        author: row.get(6).unwrap(),
        published_at: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn edition_from_row(row: &Row) -> Edition {
    Edition {
        id: row.get(0).unwrap(),
        local_date: row.get(1).unwrap(),
        published_at: row
            .get::<_, String>(2)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        created_at: row
            .get::<_, String>(3)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}
