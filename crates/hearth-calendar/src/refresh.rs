//! One refresh cycle: fetch, assemble and publish a snapshot.

use chrono::{NaiveDate, NaiveDateTime};

use crate::engine::{CalendarFetch, Engine};
use crate::error::CalendarError;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::types::CalendarSource;

pub struct RefreshCycle<F, S> {
    engine: Engine,
    sources: Vec<CalendarSource>,
    fetcher: F,
    store: S,
}

impl<F: CalendarFetch, S: SnapshotStore> RefreshCycle<F, S> {
    pub fn new(engine: Engine, sources: Vec<CalendarSource>, fetcher: F, store: S) -> Self {
        Self {
            engine,
            sources,
            fetcher,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run the engine for `today` and publish the result.
    ///
    /// When every source failed the previous events are kept and only the
    /// failure list and timestamp change.
    pub async fn run_once(
        &self,
        today: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<Snapshot, CalendarError> {
        let outcome = self
            .engine
            .produce_timeline(&self.sources, &self.fetcher, today)
            .await?;

        let snapshot = if outcome.all_failed() {
            let previous = match self.store.load() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!("Could not read previous snapshot: {}", e);
                    Snapshot::default()
                }
            };
            tracing::warn!(
                "All {} calendars failed, keeping {} previous events",
                outcome.failures.len(),
                previous.events.len()
            );
            Snapshot {
                generated_at: Some(now),
                failed_sources: outcome.failures,
                ..previous
            }
        } else {
            Snapshot::from_timeline(outcome.timeline, outcome.failures, today, now)
        };

        self.store.save(&snapshot)?;
        tracing::info!(
            "Published {} events for {} ({} failed sources)",
            snapshot.events.len(),
            today,
            snapshot.failed_sources.len()
        );
        Ok(snapshot)
    }
}
