use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Utc};
use clap::Parser;
use hearth_calendar::{
    CalendarFetch, CalendarSource, Engine, EngineSettings, HttpFetcher, JsonSnapshotStore,
    KeywordTables, RefreshCycle, RetryConfig, SnapshotStore, SourceRole, TravelLocation, Traveler,
    WorkHoursHidden,
};
use hearth_core::{ClassificationConfig, Config, FeedConfig, FeedFormat, FeedRole};

#[derive(Parser, Debug)]
#[command(name = "hearth", version, about = "Household dashboard calendar aggregator")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refresh once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    hearth_core::init()?;
    let args = Args::parse();

    let (config, _) = Config::load_validated(args.config.as_deref())?;

    let sources = config
        .feeds
        .iter()
        .map(calendar_source)
        .collect::<Result<Vec<_>>>()?;

    let fetcher = HttpFetcher::new(
        Duration::from_secs(config.refresh.request_timeout_secs),
        RetryConfig::with_max_retries(config.refresh.max_retries),
    )
    .context("Failed to build HTTP client")?;

    let store = JsonSnapshotStore::new(config.snapshot_path());
    tracing::info!(
        "Hearth started with {} calendars, publishing to {}",
        sources.len(),
        store.path().display()
    );

    let offset = TimeDelta::hours(i64::from(config.calendar.utc_offset_hours));
    let cycle = RefreshCycle::new(Engine::new(engine_settings(&config)), sources, fetcher, store);

    if args.once {
        let (today, now) = local_now(offset);
        cycle
            .run_once(today, now)
            .await
            .context("Refresh failed")?;
        return Ok(());
    }

    let period = Duration::from_secs(u64::from(config.refresh.interval_minutes.max(1)) * 60);
    run_forever(&cycle, period, offset).await;

    tracing::info!("Hearth stopped");
    Ok(())
}

async fn run_forever<F: CalendarFetch, S: SnapshotStore>(
    cycle: &RefreshCycle<F, S>,
    period: Duration,
    offset: TimeDelta,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (today, now) = local_now(offset);
                if let Err(e) = cycle.run_once(today, now).await {
                    tracing::error!("Refresh failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }
}

/// Current local date and time under the fixed offset.
fn local_now(offset: TimeDelta) -> (NaiveDate, NaiveDateTime) {
    let utc = Utc::now().naive_utc();
    let now = utc.checked_add_signed(offset).unwrap_or(utc);
    (now.date(), now)
}

fn calendar_source(feed: &FeedConfig) -> Result<CalendarSource> {
    let role = match feed.role {
        FeedRole::Household => SourceRole::Household,
        FeedRole::ParentWork => SourceRole::ParentWork,
        FeedRole::Child => SourceRole::Child,
    };

    match feed.format {
        FeedFormat::Ics => {
            let url = feed
                .url
                .as_deref()
                .with_context(|| format!("Feed '{}' has no url", feed.name))?;
            Ok(CalendarSource::ics(&feed.name, role, url))
        }
        FeedFormat::Google => {
            let calendar_id = feed
                .calendar_id
                .as_deref()
                .with_context(|| format!("Feed '{}' has no calendar_id", feed.name))?;
            let api_key = feed
                .api_key
                .as_deref()
                .with_context(|| format!("Feed '{}' has no api_key", feed.name))?;
            Ok(CalendarSource::google(&feed.name, role, calendar_id, api_key))
        }
    }
}

fn engine_settings(config: &Config) -> EngineSettings {
    EngineSettings {
        utc_offset_hours: config.calendar.utc_offset_hours,
        window_days: config.calendar.window_days,
        shared_identity: config.calendar.shared_identity.clone(),
        collapse_shared_events: config.calendar.collapse_shared_events,
        work_hours: WorkHoursHidden {
            start_hour: config.calendar.work_hours.start,
            end_hour: config.calendar.work_hours.end,
        },
        tables: keyword_tables(&config.classification),
    }
}

fn keyword_tables(classification: &ClassificationConfig) -> KeywordTables {
    let mut tables = KeywordTables::default();

    if let Some(locations) = &classification.travel_locations {
        tables = tables.with_travel_locations(
            locations
                .iter()
                .map(|l| TravelLocation {
                    keyword: l.keyword.clone(),
                    timezone: l.timezone.clone(),
                })
                .collect(),
        );
    }
    if let Some(travelers) = &classification.travelers {
        tables = tables.with_travelers(
            travelers
                .iter()
                .map(|t| Traveler {
                    name: t.name.clone(),
                    keywords: t.keywords.clone(),
                })
                .collect(),
        );
    }
    if let Some(keywords) = &classification.closure_keywords {
        tables = tables.with_closure_keywords(keywords.clone());
    }

    tables
}
