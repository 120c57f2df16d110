//! Timeline assembly across sources.

use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDate, NaiveTime};

use crate::types::{EventInstance, SchoolClosureBucket, TemporalAnchor, TravelSignal};

/// Title of the synthetic entry for a day without school.
pub const SCHOOL_CLOSURE_TITLE: &str = "No School";

pub const DEFAULT_SHARED_IDENTITY: &str = "family";

/// Merges per-source instances into one ordered timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregator {
    shared_identity: String,
    collapse_shared_events: bool,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SHARED_IDENTITY)
    }
}

impl Aggregator {
    pub fn new(shared_identity: impl Into<String>) -> Self {
        Self {
            shared_identity: shared_identity.into(),
            collapse_shared_events: false,
        }
    }

    /// Merge the same event appearing on several calendars into one shared entry.
    pub fn with_collapse(mut self, enabled: bool) -> Self {
        self.collapse_shared_events = enabled;
        self
    }

    /// Fold closures in, sort, and pick today's travel signal.
    pub fn aggregate(
        &self,
        instances: Vec<EventInstance>,
        closures: &SchoolClosureBucket,
        travel_candidates: &[TravelSignal],
        today: NaiveDate,
    ) -> (Vec<EventInstance>, Option<TravelSignal>) {
        let mut timeline = if self.collapse_shared_events {
            self.collapse(instances)
        } else {
            instances
        };

        timeline.extend(self.closure_instances(closures));
        timeline.sort_by(|a, b| {
            a.sort_key
                .cmp(&b.sort_key)
                .then_with(|| a.source.cmp(&b.source))
        });

        (timeline, current_travel(travel_candidates, today))
    }

    fn closure_instances<'a>(
        &'a self,
        closures: &'a SchoolClosureBucket,
    ) -> impl Iterator<Item = EventInstance> + 'a {
        closures.iter().filter_map(move |(date, sources)| {
            let owner = match sources.len() {
                0 => return None,
                1 => sources.iter().next()?.clone(),
                _ => self.shared_identity.clone(),
            };
            Some(EventInstance::at(
                SCHOOL_CLOSURE_TITLE,
                "",
                owner,
                TemporalAnchor::AllDay(*date),
            ))
        })
    }

    /// One entry per (title, date, time) group. A group reported by two or more
    /// sources belongs to the shared identity, otherwise to its sole source.
    fn collapse(&self, instances: Vec<EventInstance>) -> Vec<EventInstance> {
        let mut index: HashMap<(String, NaiveDate, Option<NaiveTime>), usize> = HashMap::new();
        let mut groups: Vec<(EventInstance, BTreeSet<String>)> = Vec::new();

        for instance in instances {
            let key = (
                instance.title.trim().to_lowercase(),
                instance.date,
                instance.time,
            );

            match index.get(&key) {
                Some(&slot) => {
                    groups[slot].1.insert(instance.source);
                }
                None => {
                    index.insert(key, groups.len());
                    let sources = BTreeSet::from([instance.source.clone()]);
                    groups.push((instance, sources));
                }
            }
        }

        groups
            .into_iter()
            .map(|(mut instance, sources)| {
                if sources.len() > 1 {
                    tracing::debug!(
                        "Collapsing '{}' on {} shared by {:?}",
                        instance.title,
                        instance.date,
                        sources
                    );
                    instance.source = self.shared_identity.clone();
                }
                instance
            })
            .collect()
    }
}

fn current_travel(candidates: &[TravelSignal], today: NaiveDate) -> Option<TravelSignal> {
    let mut todays = candidates.iter().filter(|t| t.date == today);
    let first = todays.next()?;

    let others: Vec<&str> = todays
        .filter(|t| t.location != first.location || t.traveler != first.traveler)
        .map(|t| t.location.as_str())
        .collect();
    if !others.is_empty() {
        tracing::info!(
            "Ambiguous travel for {}: using {}, ignoring {:?}",
            today,
            first.location,
            others
        );
    }

    Some(first.clone())
}
