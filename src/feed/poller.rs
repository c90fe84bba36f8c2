use std::time::Duration;

use chrono::Utc;
use feed_rs::parser;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode};

use crate::db::Repository;
use crate::error::Result;
use crate::identity;
use crate::models::{NewArticle, PollReport, SourcePollInfo};

enum SourceOutcome {
    /// Server answered 304; nothing to do.
    Unchanged,
    Fetched { upserted: u32, failed: u32 },
}

pub struct FeedPoller {
    client: Client,
}

impl FeedPoller {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("feedpress/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Runs one conditional fetch-parse-upsert cycle over every source,
    /// in id order. A broken source never blocks the others: transport,
    /// status, and parse errors are logged, counted, and skipped. The
    /// only hard error is failing to read the source list itself.
    pub async fn poll_all(&self, repo: &Repository) -> Result<PollReport> {
        let sources = repo.list_sources_for_poll().await?;
        let mut report = PollReport::default();

        for source in sources {
            match self.poll_source(repo, &source).await {
                Ok(SourceOutcome::Unchanged) => report.sources_unchanged += 1,
                Ok(SourceOutcome::Fetched { upserted, failed }) => {
                    report.sources_polled += 1;
                    report.items_upserted += upserted;
                    report.items_failed += failed;
                }
                Err(e) => {
                    tracing::warn!("Skipping source {} ({}): {}", source.id, source.url, e);
                    report.sources_failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn poll_source(&self, repo: &Repository, source: &SourcePollInfo) -> Result<SourceOutcome> {
        let mut request = self.client.get(&source.url);
        if let Some(etag) = &source.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &source.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(SourceOutcome::Unchanged);
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("unexpected status: HTTP {}", response.status()).into());
        }

        // Capture the new validators before the body consumes the response.
        let etag = header_string(&response, ETAG);
        let last_modified = header_string(&response, LAST_MODIFIED);

        let bytes = response.bytes().await?;
        // The default parser invents an id for guid-less entries, which
        // would defeat the content-hash fallback; keep such ids empty so
        // canonical_id() decides.
        let feed = parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build()
            .parse(&bytes[..])?;

        let mut upserted = 0;
        let mut failed = 0;
        for entry in feed.entries {
            let article = article_from_entry(source.id, entry);
            match repo.upsert_article(article).await {
                Ok(()) => upserted += 1,
                Err(e) => {
                    tracing::warn!("Skipping item from source {}: {}", source.id, e);
                    failed += 1;
                }
            }
        }

        // Validators are persisted only after a fully parsed 2xx cycle.
        repo.update_source_validators(source.id, etag, last_modified)
            .await?;

        Ok(SourceOutcome::Fetched { upserted, failed })
    }
}

impl Default for FeedPoller {
    fn default() -> Self {
        Self::new()
    }
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn article_from_entry(source_id: i64, entry: feed_rs::model::Entry) -> NewArticle {
    // Prefer the explicit publish time, fall back to the update time,
    // then to the current instant for undated items.
    let published = entry.published.or(entry.updated).unwrap_or_else(Utc::now);

    let canonical_url = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let title = entry
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());
    let canonical_id = identity::canonical_id(&entry.id, &canonical_url, &title, published);

    NewArticle {
        source_id,
        canonical_id,
        canonical_url,
        title,
        summary: entry.summary.map(|s| s.content),
        author: entry.authors.first().map(|a| a.name.clone()),
        published_at: published,
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ETAG_V1: &str = "\"v1\"";
    const LAST_MOD_V1: &str = "Mon, 06 Sep 2021 00:00:00 GMT";

    /// Two-item feed whose guids are namespaced by `guid_prefix`, so
    /// tests polling several sources get disjoint canonical ids.
    fn sample_rss(guid_prefix: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>{guid_prefix}1</guid>
      <author>writer@example.com (Writer One)</author>
      <pubDate>Mon, 06 Sep 2021 00:00:00 GMT</pubDate>
      <description>First</description>
    </item>
    <item>
      <title>Item 2</title>
      <link>http://example.com/2</link>
      <guid>{guid_prefix}2</guid>
      <pubDate>Mon, 06 Sep 2021 01:00:00 GMT</pubDate>
      <description>Second</description>
    </item>
  </channel>
</rss>"#
        )
    }

    async fn test_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    async fn mount_feed(server: &MockServer, route: &str, guid_prefix: &str) {
        // Conditional requests short-circuit; everything else gets the body.
        Mock::given(method("GET"))
            .and(path(route))
            .and(header("If-None-Match", ETAG_V1))
            .respond_with(ResponseTemplate::new(304))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", ETAG_V1)
                    .insert_header("Last-Modified", LAST_MOD_V1)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(sample_rss(guid_prefix)),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn poll_parses_items_and_caches_validators() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed", "g").await;

        let (_dir, repo) = test_repo().await;
        let source_id = repo
            .insert_source(format!("{}/feed", server.uri()), None)
            .await
            .unwrap();

        let report = FeedPoller::new().poll_all(&repo).await.unwrap();
        assert_eq!(report.sources_polled, 1);
        assert_eq!(report.items_upserted, 2);
        assert_eq!(report.sources_failed, 0);
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 2);

        let article = repo
            .get_article_by_canonical_id("g1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.title, "Item 1");
        assert_eq!(article.canonical_url, "http://example.com/1");

        let sources = repo.list_sources_for_poll().await.unwrap();
        assert_eq!(sources[0].etag.as_deref(), Some(ETAG_V1));
        assert_eq!(sources[0].last_modified.as_deref(), Some(LAST_MOD_V1));
    }

    #[tokio::test]
    async fn second_poll_short_circuits_on_304() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed", "g").await;

        let (_dir, repo) = test_repo().await;
        let source_id = repo
            .insert_source(format!("{}/feed", server.uri()), None)
            .await
            .unwrap();

        let poller = FeedPoller::new();
        poller.poll_all(&repo).await.unwrap();
        let report = poller.poll_all(&repo).await.unwrap();

        assert_eq!(report.sources_unchanged, 1);
        assert_eq!(report.items_upserted, 0);
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 2);

        let sources = repo.list_sources_for_poll().await.unwrap();
        assert_eq!(sources[0].etag.as_deref(), Some(ETAG_V1));
    }

    #[tokio::test]
    async fn repolling_by_guid_never_duplicates() {
        let server = MockServer::start().await;
        // No validators in the response, so every poll re-downloads.
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(sample_rss("g")),
            )
            .mount(&server)
            .await;

        let (_dir, repo) = test_repo().await;
        let source_id = repo
            .insert_source(format!("{}/feed", server.uri()), None)
            .await
            .unwrap();

        let poller = FeedPoller::new();
        poller.poll_all(&repo).await.unwrap();
        poller.poll_all(&repo).await.unwrap();
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn guidless_dated_items_dedup_by_content_hash() {
        let server = MockServer::start().await;
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>No Guids</title>
    <link>http://example.com/</link>
    <description>d</description>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <pubDate>Mon, 06 Sep 2021 00:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/rss+xml")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let (_dir, repo) = test_repo().await;
        let source_id = repo
            .insert_source(format!("{}/feed", server.uri()), None)
            .await
            .unwrap();

        let poller = FeedPoller::new();
        poller.poll_all(&repo).await.unwrap();
        poller.poll_all(&repo).await.unwrap();
        // (link, title, published) hash identically on both polls.
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn one_broken_source_never_blocks_the_others() {
        let server = MockServer::start().await;
        mount_feed(&server, "/a", "a").await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_feed(&server, "/c", "c").await;

        let (_dir, repo) = test_repo().await;
        let a = repo
            .insert_source(format!("{}/a", server.uri()), None)
            .await
            .unwrap();
        let b = repo
            .insert_source(format!("{}/b", server.uri()), None)
            .await
            .unwrap();
        let c = repo
            .insert_source(format!("{}/c", server.uri()), None)
            .await
            .unwrap();

        let report = FeedPoller::new().poll_all(&repo).await.unwrap();
        assert_eq!(report.sources_polled, 2);
        assert_eq!(report.sources_failed, 1);
        assert_eq!(repo.count_articles_for_source(a).await.unwrap(), 2);
        assert_eq!(repo.count_articles_for_source(b).await.unwrap(), 0);
        assert_eq!(repo.count_articles_for_source(c).await.unwrap(), 2);
        let from_c = repo
            .get_article_by_canonical_id("c1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from_c.source_id, c);

        // The failed source keeps its (absent) validators.
        let sources = repo.list_sources_for_poll().await.unwrap();
        let broken = sources.iter().find(|s| s.id == b).unwrap();
        assert!(broken.etag.is_none());
    }

    #[tokio::test]
    async fn unparseable_body_is_a_soft_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", ETAG_V1)
                    .set_body_string("this is not a feed"),
            )
            .mount(&server)
            .await;

        let (_dir, repo) = test_repo().await;
        let source_id = repo
            .insert_source(format!("{}/feed", server.uri()), None)
            .await
            .unwrap();

        let report = FeedPoller::new().poll_all(&repo).await.unwrap();
        assert_eq!(report.sources_failed, 1);
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 0);

        // Validators must not be persisted for a failed cycle.
        let sources = repo.list_sources_for_poll().await.unwrap();
        assert!(sources[0].etag.is_none());
    }
}
