use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::db::Repository;
use crate::error::Result;

/// Builds (or rebuilds) the edition for the civil date of `now` in `tz`.
///
/// The article selection is a rolling `[now - 24h, now]` lookback in
/// absolute time, not midnight-to-midnight. Re-running with the same
/// `now` is idempotent; re-running later fully replaces the article set,
/// so items that aged out of the window drop off the edition.
pub async fn assemble_daily_edition(repo: &Repository, now: DateTime<Utc>, tz: Tz) -> Result<i64> {
    let local_date = local_date_for(now, tz);
    let window_start = now - Duration::hours(24);
    let edition_id = repo
        .replace_edition(local_date.clone(), now, window_start, now)
        .await?;
    tracing::info!("Assembled edition {} for {}", edition_id, local_date);
    Ok(edition_id)
}

fn local_date_for(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%Y-%m-%d").to_string()
}
