use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered feed source. The url is immutable after creation; the
/// cached validators (etag, last_modified) are written only by the poller
/// after a successful fetch cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The subset of a source needed for one poll cycle.
#[derive(Debug, Clone)]
pub struct SourcePollInfo {
    pub id: i64,
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub canonical_id: String,
    pub canonical_url: String,
    pub title: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An article as parsed from a feed, ready for upsert by canonical_id.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub source_id: i64,
    pub canonical_id: String,
    pub canonical_url: String,
    pub title: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The daily snapshot row. Exactly one edition exists per civil date;
/// re-assembly updates published_at but keeps id and created_at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edition {
    pub id: i64,
    pub local_date: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One ranked entry of an edition. Positions are 1-based and dense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditionEntry {
    pub article_id: i64,
    pub position: i64,
}

/// Per-run summary of a poll cycle. Soft failures are absorbed during the
/// run; this report is how they stay observable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Sources that returned a 2xx body which parsed as a feed.
    pub sources_polled: u32,
    /// Sources answering 304 Not Modified.
    pub sources_unchanged: u32,
    /// Sources skipped on transport, status, or parse errors.
    pub sources_failed: u32,
    /// Items written (inserted or updated) through the upsert.
    pub items_upserted: u32,
    /// Items whose upsert failed and was skipped.
    pub items_failed: u32,
}
