use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

/// Computes the deduplication identity for a feed item.
///
/// A non-empty guid wins verbatim. Otherwise the identity is a content
/// hash over (link, title, published instant in RFC3339 UTC), so the same
/// logical item hashes identically across polls and process restarts.
///
/// Known limitation: when an item has neither a guid nor a parseable
/// publish date, the caller substitutes "now" before hashing, so such
/// items are not deduplicated across polls.
pub fn canonical_id(guid: &str, link: &str, title: &str, published: DateTime<Utc>) -> String {
    if !guid.is_empty() {
        return guid.to_string();
    }
    let stamp = published.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut hasher = Sha256::new();
    hasher.update(link.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(stamp.as_bytes());
    hex::encode(hasher.finalize())
}
