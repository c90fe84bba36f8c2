use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

mod assembler;
mod config;
mod db;
mod error;
mod feed;
mod identity;
mod models;
mod scheduler;

use config::Config;
use db::Repository;
use error::Result;
use feed::FeedPoller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (info level by default, RUST_LOG overrides)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config = Config::load()?;
    let tz = config.timezone()?;
    let publish_time = config.publish_time()?;

    // Opening the store applies pending migrations; failures here are
    // fatal, unlike anything that happens inside a scheduled run.
    let repo = Arc::new(Repository::new(&config.db_path).await?);

    // One-shot maintenance flags run a single cycle and exit.
    if args.len() >= 3 && args[1] == "--add-source" {
        let url = args[2].clone();
        let title = args.get(3).cloned();
        let id = repo.insert_source(url.clone(), title).await?;
        println!("Added source {} ({})", id, url);
        return Ok(());
    }

    if args.len() >= 2 && args[1] == "--list-sources" {
        for source in repo.get_all_sources().await? {
            println!(
                "{}\t{}\t{}",
                source.id,
                source.url,
                source.title.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    }

    if args.len() >= 3 && args[1] == "--delete-source" {
        let id: i64 = args[2]
            .parse()
            .map_err(|_| error::AppError::Config(format!("invalid source id: {}", args[2])))?;
        if repo.delete_source(id).await? {
            println!("Deleted source {}", id);
        } else {
            println!("No source {}", id);
        }
        return Ok(());
    }

    if args.len() >= 2 && args[1] == "--fetch-once" {
        let report = FeedPoller::new().poll_all(&repo).await?;
        println!(
            "Polled {} sources ({} unchanged, {} failed), {} items upserted, {} skipped",
            report.sources_polled,
            report.sources_unchanged,
            report.sources_failed,
            report.items_upserted,
            report.items_failed,
        );
        return Ok(());
    }

    if args.len() >= 2 && args[1] == "--assemble-once" {
        let edition_id = assembler::assemble_daily_edition(&repo, Utc::now(), tz).await?;
        println!("Assembled edition {}", edition_id);
        return Ok(());
    }

    let poller = Arc::new(FeedPoller::new());
    let fetch = scheduler::spawn_hourly_fetch(
        Arc::clone(&repo),
        poller,
        Duration::from_secs(config.fetch_timeout_secs),
    );
    let assemble = scheduler::spawn_daily_assemble(
        Arc::clone(&repo),
        tz,
        publish_time,
        Duration::from_secs(config.assemble_timeout_secs),
    );

    tracing::info!(
        "feedpress running: hourly fetch, daily assemble at {} {}",
        config.publish_time,
        config.timezone
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    fetch.abort();
    assemble.abort();

    Ok(())
}
