//! Engine data model: sources, raw events, instances and derived signals.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

/// Household role of a calendar's owner. Drives visibility and closure rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    #[default]
    Household,
    ParentWork,
    Child,
}

/// Where a source's payload comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLocation {
    /// Line-oriented iCalendar feed.
    Ics { url: String },
    /// Google Calendar v3 API, already expanded upstream.
    Google { calendar_id: String, api_key: String },
}

/// A configured calendar feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSource {
    pub name: String,
    pub role: SourceRole,
    pub feed: FeedLocation,
}

impl CalendarSource {
    pub fn ics(name: impl Into<String>, role: SourceRole, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            feed: FeedLocation::Ics { url: url.into() },
        }
    }

    pub fn google(
        name: impl Into<String>,
        role: SourceRole,
        calendar_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            feed: FeedLocation::Google {
                calendar_id: calendar_id.into(),
                api_key: api_key.into(),
            },
        }
    }
}

/// Start of an event, resolved to local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalAnchor {
    AllDay(NaiveDate),
    Timed(NaiveDateTime),
}

impl TemporalAnchor {
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::AllDay(d) => *d,
            Self::Timed(dt) => dt.date(),
        }
    }

    pub fn time(&self) -> Option<NaiveTime> {
        match self {
            Self::AllDay(_) => None,
            Self::Timed(dt) => Some(dt.time()),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// The same anchor moved `days` later, keeping its time of day.
    pub fn shifted(&self, days: u64) -> Option<Self> {
        match self {
            Self::AllDay(d) => d.checked_add_days(Days::new(days)).map(Self::AllDay),
            Self::Timed(dt) => dt.checked_add_days(Days::new(days)).map(Self::Timed),
        }
    }
}

/// A normalized event record, before expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub title: String,
    pub location: String,
    pub start: TemporalAnchor,
    /// Raw `RRULE` value, interpreted by the expander.
    pub repetition: Option<String>,
    /// Local end of the series, resolved from the rule's `UNTIL`.
    pub repeat_until: Option<TemporalAnchor>,
    pub exception_dates: BTreeSet<NaiveDate>,
}

impl RawEvent {
    pub fn single(title: impl Into<String>, start: TemporalAnchor) -> Self {
        Self {
            title: title.into(),
            location: String::new(),
            start,
            repetition: None,
            repeat_until: None,
            exception_dates: BTreeSet::new(),
        }
    }
}

/// One concrete occurrence on the dashboard timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInstance {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    #[serde(rename = "calendar")]
    pub source: String,
    pub is_all_day: bool,
    pub sort_key: NaiveDateTime,
}

impl EventInstance {
    /// Build an instance of `title` at `anchor`, owned by `source`.
    pub fn at(
        title: impl Into<String>,
        location: impl Into<String>,
        source: impl Into<String>,
        anchor: TemporalAnchor,
    ) -> Self {
        let date = anchor.date();
        let time = anchor.time();
        Self {
            title: title.into(),
            location: location.into(),
            date,
            time,
            source: source.into(),
            is_all_day: anchor.is_all_day(),
            sort_key: date.and_time(time.unwrap_or_default()),
        }
    }
}

/// Inclusive date range the engine materializes instances for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    start: NaiveDate,
    end: NaiveDate,
}

impl Window {
    /// Fails when `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CalendarError> {
        if start > end {
            return Err(CalendarError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// `days` days beginning at `today`. Zero days is an invalid window.
    pub fn starting_at(today: NaiveDate, days: u32) -> Result<Self, CalendarError> {
        let end = if days == 0 {
            today.pred_opt().unwrap_or(NaiveDate::MIN)
        } else {
            today
                .checked_add_days(Days::new(u64::from(days) - 1))
                .unwrap_or(NaiveDate::MAX)
        };
        Self::new(today, end)
    }

    /// The dashboard default: today and the six days after it.
    pub fn week_from(today: NaiveDate) -> Result<Self, CalendarError> {
        Self::starting_at(today, 7)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Someone is away, derived from an all-day event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelSignal {
    /// `None` when no traveler keyword matched.
    pub traveler: Option<String>,
    pub location: String,
    pub timezone: String,
    pub date: NaiveDate,
}

/// Dates on which child calendars report school closed, with the reporting sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchoolClosureBucket(BTreeMap<NaiveDate, BTreeSet<String>>);

impl SchoolClosureBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, date: NaiveDate, source: impl Into<String>) {
        self.0.entry(date).or_default().insert(source.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &BTreeSet<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Output of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub events: Vec<EventInstance>,
    pub current_travel: Option<TravelSignal>,
    pub school_closures: SchoolClosureBucket,
}

/// A fetched source payload.
#[derive(Debug, Clone)]
pub enum Payload {
    /// iCalendar text.
    Ics(String),
    /// Already-expanded events from the upstream calendar API.
    Structured(Vec<ApiEvent>),
}

// API Response Types

/// Google Calendar API event response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub summary: Option<String>,
    pub location: Option<String>,
    pub start: Option<ApiEventTime>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
    pub time_zone: Option<String>,
}

/// API response for event list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<ApiEvent>,
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_week_window_is_seven_days_inclusive() {
        let window = Window::week_from(date(2024, 6, 10)).unwrap();
        assert_eq!(window.start(), date(2024, 6, 10));
        assert_eq!(window.end(), date(2024, 6, 16));
        assert!(window.contains(date(2024, 6, 16)));
        assert!(!window.contains(date(2024, 6, 17)));
        assert!(!window.contains(date(2024, 6, 9)));
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let result = Window::new(date(2024, 6, 10), date(2024, 6, 9));
        assert!(matches!(result, Err(CalendarError::InvalidWindow { .. })));
        assert!(Window::starting_at(date(2024, 6, 10), 0).is_err());
    }

    #[test]
    fn test_instance_sort_key_uses_midnight_for_all_day() {
        let all_day = EventInstance::at("Trip", "", "papa", TemporalAnchor::AllDay(date(2024, 6, 10)));
        assert_eq!(all_day.time, None);
        assert!(all_day.is_all_day);
        assert_eq!(all_day.sort_key, date(2024, 6, 10).and_hms_opt(0, 0, 0).unwrap());

        let timed = EventInstance::at(
            "Swim",
            "Pool",
            "wren",
            TemporalAnchor::Timed(date(2024, 6, 10).and_hms_opt(16, 30, 0).unwrap()),
        );
        assert_eq!(timed.time, NaiveTime::from_hms_opt(16, 30, 0));
        assert!(!timed.is_all_day);
    }

    #[test]
    fn test_closure_bucket_deduplicates_sources() {
        let mut bucket = SchoolClosureBucket::new();
        bucket.report(date(2024, 6, 12), "wren");
        bucket.report(date(2024, 6, 12), "wren");
        bucket.report(date(2024, 6, 12), "ellis");

        assert_eq!(bucket.len(), 1);
        let (day, sources) = bucket.iter().next().unwrap();
        assert_eq!(*day, date(2024, 6, 12));
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn test_instance_serializes_source_as_calendar() {
        let instance = EventInstance::at("Trip", "", "papa", TemporalAnchor::AllDay(date(2024, 6, 10)));
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["calendar"], "papa");
        assert!(json.get("location").is_none());
    }

    #[test]
    fn test_api_event_deserializes() {
        let json = r#"{
            "id": "event456",
            "summary": "Holiday",
            "start": {"date": "2024-02-01"},
            "end": {"date": "2024-02-02"}
        }"#;

        let api_event: ApiEvent = serde_json::from_str(json).unwrap();
        assert_eq!(api_event.summary.as_deref(), Some("Holiday"));
        assert_eq!(api_event.start.unwrap().date.as_deref(), Some("2024-02-01"));
    }
}
