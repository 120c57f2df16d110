//! Calendar aggregation for the Hearth dashboard.
//!
//! Merges several household calendar feeds into one week-long timeline with
//! recurrence expansion, per-source visibility, travel detection and school
//! closure consolidation.

pub mod aggregate;
pub mod classify;
pub mod client;
pub mod engine;
pub mod error;
pub mod ics;
pub mod normalize;
pub mod recurrence;
pub mod refresh;
pub mod retry;
pub mod snapshot;
pub mod types;

pub use aggregate::{Aggregator, SCHOOL_CLOSURE_TITLE};
pub use classify::{
    AlwaysVisible, Classifier, KeywordTables, TravelLocation, Traveler, VisibilityPolicy,
    WorkHoursHidden,
};
pub use client::HttpFetcher;
pub use engine::{CalendarFetch, Engine, EngineSettings, RefreshOutcome, SourceFailure};
pub use error::CalendarError;
pub use normalize::Normalizer;
pub use recurrence::{expand, RepetitionRule};
pub use refresh::RefreshCycle;
pub use retry::RetryConfig;
pub use snapshot::{JsonSnapshotStore, Snapshot, SnapshotStore};
pub use types::{
    CalendarSource, EventInstance, FeedLocation, Payload, RawEvent, SchoolClosureBucket,
    SourceRole, TemporalAnchor, Timeline, TravelSignal, Window,
};
