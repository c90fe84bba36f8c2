use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::assembler;
use crate::db::Repository;
use crate::feed::FeedPoller;

/// Per-job execution lane with exactly two states: idle and running.
/// A job body only runs while holding the lane's guard, so a second
/// invocation of the same job can never start mid-run.
pub struct JobLane {
    name: &'static str,
    running: AtomicBool,
}

impl JobLane {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Acquires the lane, or returns None while a run is in flight.
    pub fn try_begin(self: &Arc<Self>) -> Option<JobRun> {
        if self.running.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(JobRun {
                lane: Arc::clone(self),
            })
        }
    }
}

/// Releases the lane on drop, including on panic or timeout.
pub struct JobRun {
    lane: Arc<JobLane>,
}

impl Drop for JobRun {
    fn drop(&mut self) {
        self.lane.running.store(false, Ordering::Release);
    }
}

/// Hourly fetch job: fires at every minute-0 boundary, runs one poll
/// cycle bound by `timeout`. Missed ticks are skipped, never queued, and
/// a failed or timed-out run only logs and waits for the next tick.
pub fn spawn_hourly_fetch(
    repo: Arc<Repository>,
    poller: Arc<FeedPoller>,
    timeout: StdDuration,
) -> JoinHandle<()> {
    let lane = JobLane::new("fetch");
    tokio::spawn(async move {
        let until_first = duration_until(next_hour_boundary(Utc::now()));
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + until_first,
            StdDuration::from_secs(3600),
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(_run) = lane.try_begin() else {
                tracing::warn!("{} tick skipped: previous run still in flight", lane.name());
                continue;
            };
            match tokio::time::timeout(timeout, poller.poll_all(&repo)).await {
                Ok(Ok(report)) => tracing::info!(
                    "Fetch cycle: {} polled, {} unchanged, {} failed, {} items upserted, {} items skipped",
                    report.sources_polled,
                    report.sources_unchanged,
                    report.sources_failed,
                    report.items_upserted,
                    report.items_failed,
                ),
                Ok(Err(e)) => tracing::warn!("fetch job error: {}", e),
                Err(_) => tracing::warn!("fetch job timed out after {:?}", timeout),
            }
        }
    })
}

/// Daily assemble job: sleeps until the next occurrence of
/// `publish_time` in `tz`, then assembles the edition for that instant,
/// bound by `timeout`. Independent of the fetch job's lane and schedule.
pub fn spawn_daily_assemble(
    repo: Arc<Repository>,
    tz: Tz,
    publish_time: NaiveTime,
    timeout: StdDuration,
) -> JoinHandle<()> {
    let lane = JobLane::new("assemble");
    tokio::spawn(async move {
        loop {
            let next = next_publish_instant(Utc::now(), tz, publish_time);
            tokio::time::sleep(duration_until(next)).await;
            let Some(_run) = lane.try_begin() else {
                tracing::warn!("{} tick skipped: previous run still in flight", lane.name());
                continue;
            };
            let now = Utc::now();
            match tokio::time::timeout(timeout, assembler::assemble_daily_edition(&repo, now, tz))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!("assemble job error: {}", e),
                Err(_) => tracing::warn!("assemble job timed out after {:?}", timeout),
            }
        }
    })
}

/// The first top-of-hour instant strictly after `after`.
pub fn next_hour_boundary(after: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = after
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("hour truncation is always valid");
    truncated + Duration::hours(1)
}

/// The next occurrence of `publish_time` in `tz` strictly after `after`.
/// A local time erased by a DST gap resolves to the following day.
pub fn next_publish_instant(after: DateTime<Utc>, tz: Tz, publish_time: NaiveTime) -> DateTime<Utc> {
    let mut date = after.with_timezone(&tz).date_naive();
    loop {
        if let Some(local) = tz.from_local_datetime(&date.and_time(publish_time)).earliest() {
            let instant = local.with_timezone(&Utc);
            if instant > after {
                return instant;
            }
        }
        date = date.succ_opt().expect("date overflow");
    }
}

fn duration_until(instant: DateTime<Utc>) -> StdDuration {
    (instant - Utc::now()).to_std().unwrap_or(StdDuration::ZERO)
}
