//! The aggregation engine: fetch, normalize, expand, classify, aggregate.

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregator, DEFAULT_SHARED_IDENTITY};
use crate::classify::{Classifier, KeywordTables, Verdict, VisibilityPolicy, WorkHoursHidden};
use crate::error::CalendarError;
use crate::normalize::Normalizer;
use crate::recurrence;
use crate::types::{CalendarSource, Payload, SchoolClosureBucket, Timeline, TravelSignal, Window};

/// Capability to fetch one source's payload for a window.
pub trait CalendarFetch: Send + Sync {
    fn fetch(
        &self,
        source: &CalendarSource,
        window: &Window,
    ) -> impl Future<Output = Result<Payload, CalendarError>> + Send;
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub utc_offset_hours: i32,
    pub window_days: u32,
    pub shared_identity: String,
    pub collapse_shared_events: bool,
    pub work_hours: WorkHoursHidden,
    pub tables: KeywordTables,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            utc_offset_hours: 1,
            window_days: 7,
            shared_identity: DEFAULT_SHARED_IDENTITY.to_string(),
            collapse_shared_events: false,
            work_hours: WorkHoursHidden::default(),
            tables: KeywordTables::default(),
        }
    }
}

/// A source that could not be fetched this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    pub timeline: Timeline,
    pub failures: Vec<SourceFailure>,
    /// Sources whose fetch succeeded.
    pub fetched: usize,
}

impl RefreshOutcome {
    pub fn all_failed(&self) -> bool {
        self.fetched == 0 && !self.failures.is_empty()
    }
}

pub struct Engine {
    window_days: u32,
    normalizer: Normalizer,
    classifier: Classifier,
    aggregator: Aggregator,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            window_days: settings.window_days,
            normalizer: Normalizer::new(settings.utc_offset_hours),
            classifier: Classifier::new(settings.tables, settings.work_hours),
            aggregator: Aggregator::new(settings.shared_identity)
                .with_collapse(settings.collapse_shared_events),
        }
    }

    /// Replace the role-based visibility policy for one source.
    pub fn with_policy(
        mut self,
        source: impl Into<String>,
        policy: impl VisibilityPolicy + 'static,
    ) -> Self {
        self.classifier = self.classifier.with_policy(source, policy);
        self
    }

    pub fn window_for(&self, today: NaiveDate) -> Result<Window, CalendarError> {
        Window::starting_at(today, self.window_days)
    }

    /// Fetch every source in order, then assemble the timeline.
    ///
    /// A failing source is logged and recorded; it never stops the others.
    pub async fn produce_timeline<F: CalendarFetch>(
        &self,
        sources: &[CalendarSource],
        fetcher: &F,
        today: NaiveDate,
    ) -> Result<RefreshOutcome, CalendarError> {
        let window = self.window_for(today)?;
        let mut fetched = Vec::with_capacity(sources.len());
        let mut failures = Vec::new();

        for source in sources {
            match fetcher.fetch(source, &window).await {
                Ok(payload) => fetched.push((source.clone(), payload)),
                Err(e) => {
                    tracing::warn!("Skipping calendar '{}': {}", source.name, e);
                    failures.push(SourceFailure {
                        source: source.name.clone(),
                        message: e.user_message(),
                    });
                }
            }
        }

        let timeline = self.assemble_in(&fetched, window, today);
        Ok(RefreshOutcome {
            timeline,
            failures,
            fetched: fetched.len(),
        })
    }

    /// Pure stage over already fetched payloads.
    pub fn assemble_timeline(
        &self,
        fetched: &[(CalendarSource, Payload)],
        today: NaiveDate,
    ) -> Result<Timeline, CalendarError> {
        let window = self.window_for(today)?;
        Ok(self.assemble_in(fetched, window, today))
    }

    fn assemble_in(
        &self,
        fetched: &[(CalendarSource, Payload)],
        window: Window,
        today: NaiveDate,
    ) -> Timeline {
        let mut instances = Vec::new();
        let mut closures = SchoolClosureBucket::new();
        let mut travel: Vec<TravelSignal> = Vec::new();

        for (source, payload) in fetched {
            let events = self.normalizer.normalize(source, payload);
            let (mut shown, mut hidden, mut closed) = (0usize, 0usize, 0usize);

            for event in &events {
                for instance in recurrence::expand(event, &source.name, &window) {
                    let classification = self.classifier.classify(source, &instance);
                    travel.extend(classification.travel);

                    match classification.verdict {
                        Verdict::Show => {
                            shown += 1;
                            instances.push(instance);
                        }
                        Verdict::Hide => hidden += 1,
                        Verdict::SchoolClosure => {
                            closed += 1;
                            closures.report(instance.date, source.name.as_str());
                        }
                    }
                }
            }

            tracing::info!(
                "Calendar '{}': {} events, {} shown, {} hidden, {} closure days",
                source.name,
                events.len(),
                shown,
                hidden,
                closed
            );
        }

        if !closures.is_empty() {
            tracing::debug!("{} school closure days in window", closures.len());
        }
        let (events, current_travel) = self.aggregator.aggregate(instances, &closures, &travel, today);

        Timeline {
            events,
            current_travel,
            school_closures: closures,
        }
    }
}
