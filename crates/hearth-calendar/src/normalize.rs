//! Record normalization: source payloads into canonical [`RawEvent`]s.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

use crate::ics::{self, DateValue, VEventRecord};
use crate::recurrence;
use crate::types::{ApiEvent, CalendarSource, Payload, RawEvent, TemporalAnchor};

/// Records considered per source and fetch.
pub const MAX_RECORDS_PER_SOURCE: usize = 100;

const LOCAL_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S";
const DATE_FORMAT: &str = "%Y%m%d";

/// Resolves source records into local-time [`RawEvent`]s.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    utc_offset: Duration,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Normalizer {
    /// `utc_offset_hours` is the fixed local offset applied to UTC stamps.
    pub fn new(utc_offset_hours: i32) -> Self {
        Self {
            utc_offset: Duration::hours(i64::from(utc_offset_hours)),
        }
    }

    /// Turn one fetched payload into raw events. Records without a title or a
    /// resolvable start are skipped.
    pub fn normalize(&self, source: &CalendarSource, payload: &Payload) -> Vec<RawEvent> {
        let events: Vec<RawEvent> = match payload {
            Payload::Ics(content) => ics::read_events(content, MAX_RECORDS_PER_SOURCE)
                .into_iter()
                .filter_map(|record| self.event_from_record(record))
                .collect(),
            Payload::Structured(items) => items
                .iter()
                .take(MAX_RECORDS_PER_SOURCE)
                .filter_map(|item| self.event_from_api(item))
                .collect(),
        };

        tracing::debug!("Normalized {} events from '{}'", events.len(), source.name);
        events
    }

    fn event_from_record(&self, record: VEventRecord) -> Option<RawEvent> {
        let title = record.summary.unwrap_or_default();
        if title.is_empty() {
            tracing::debug!("Dropping record without a title");
            return None;
        }

        let Some(start) = record.dtstart.as_ref().and_then(|v| self.resolve_anchor(v)) else {
            tracing::debug!("Dropping '{}': no resolvable start", title);
            return None;
        };

        let exception_dates: BTreeSet<NaiveDate> = record
            .exdates
            .iter()
            .filter_map(|v| self.resolve_anchor(v))
            .map(|anchor| anchor.date())
            .collect();

        let repeat_until = record
            .rrule
            .as_deref()
            .and_then(recurrence::until_value)
            .and_then(|raw| self.resolve_anchor(&DateValue::plain(raw)));

        Some(RawEvent {
            title,
            location: record.location.unwrap_or_default(),
            start,
            repetition: record.rrule,
            repeat_until,
            exception_dates,
        })
    }

    fn event_from_api(&self, event: &ApiEvent) -> Option<RawEvent> {
        if event.status.as_deref() == Some("cancelled") {
            tracing::debug!("Dropping cancelled event {}", event.id);
            return None;
        }

        let title = event.summary.as_deref().map(str::trim).unwrap_or_default();
        if title.is_empty() {
            tracing::debug!("Dropping event {} without a title", event.id);
            return None;
        }

        let start = event.start.as_ref().and_then(|time| {
            if let Some(date_time) = &time.date_time {
                let utc = DateTime::parse_from_rfc3339(date_time).ok()?.naive_utc();
                utc.checked_add_signed(self.utc_offset).map(TemporalAnchor::Timed)
            } else {
                time.date
                    .as_deref()
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                    .map(TemporalAnchor::AllDay)
            }
        });

        let Some(start) = start else {
            tracing::debug!("Dropping event {}: no resolvable start", event.id);
            return None;
        };

        Some(RawEvent {
            title: title.to_string(),
            location: event.location.as_deref().map(str::trim).unwrap_or_default().to_string(),
            start,
            repetition: None,
            repeat_until: None,
            exception_dates: BTreeSet::new(),
        })
    }

    /// Resolve a date property to local time.
    ///
    /// Bare 8-digit values and `VALUE=DATE` are all-day. A trailing `Z` marks UTC,
    /// shifted by the fixed offset. Anything else with a `T` is already local.
    pub fn resolve_anchor(&self, value: &DateValue) -> Option<TemporalAnchor> {
        let raw = value.raw.trim();

        if value.is_date || (raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit())) {
            let date = NaiveDate::parse_from_str(raw.get(..8)?, DATE_FORMAT).ok()?;
            return Some(TemporalAnchor::AllDay(date));
        }

        if !raw.contains('T') {
            return None;
        }

        let local = NaiveDateTime::parse_from_str(raw.get(..15)?, LOCAL_STAMP_FORMAT).ok()?;
        if raw.ends_with('Z') {
            local.checked_add_signed(self.utc_offset).map(TemporalAnchor::Timed)
        } else {
            Some(TemporalAnchor::Timed(local))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::types::{ApiEventTime, SourceRole, Window};

    fn value(raw: &str) -> DateValue {
        DateValue {
            raw: raw.to_string(),
            is_date: false,
            tzid: None,
        }
    }

    fn source() -> CalendarSource {
        CalendarSource::ics("wren", SourceRole::Child, "https://example.com/wren.ics")
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> TemporalAnchor {
        TemporalAnchor::Timed(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_resolve_utc_applies_offset() {
        let normalizer = Normalizer::new(1);
        assert_eq!(
            normalizer.resolve_anchor(&value("20240610T090000Z")),
            Some(at(2024, 6, 10, 10, 0))
        );

        // Late UTC stamps roll into the next local day.
        assert_eq!(
            normalizer.resolve_anchor(&value("20240610T233000Z")),
            Some(at(2024, 6, 11, 0, 30))
        );
    }

    #[test]
    fn test_resolve_local_is_unchanged() {
        let normalizer = Normalizer::new(1);
        let mut with_tz = value("20240610T090000");
        with_tz.tzid = Some("Europe/Berlin".into());
        assert_eq!(normalizer.resolve_anchor(&with_tz), Some(at(2024, 6, 10, 9, 0)));
    }

    #[test]
    fn test_resolve_dates() {
        let normalizer = Normalizer::new(1);
        let expected = TemporalAnchor::AllDay(NaiveDate::from_ymd_opt(2024, 6, 12).unwrap());
        assert_eq!(normalizer.resolve_anchor(&value("20240612")), Some(expected));

        let mut flagged = value("20240612");
        flagged.is_date = true;
        assert_eq!(normalizer.resolve_anchor(&flagged), Some(expected));
    }

    #[test]
    fn test_resolve_garbage() {
        let normalizer = Normalizer::new(1);
        assert_eq!(normalizer.resolve_anchor(&value("")), None);
        assert_eq!(normalizer.resolve_anchor(&value("tomorrow")), None);
        assert_eq!(normalizer.resolve_anchor(&value("20241340T250000")), None);
        assert_eq!(normalizer.resolve_anchor(&value("2024061")), None);
    }

    #[test]
    fn test_normalize_ics_skips_untitled_and_unanchored() {
        let content = "BEGIN:VEVENT\r\n\
SUMMARY:Football\r\n\
DTSTART:20240610T170000\r\n\
RRULE:FREQ=WEEKLY\r\n\
EXDATE:20240617T170000,20240624T170000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:   \r\n\
DTSTART:20240611\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:No start\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Bad start\r\n\
DTSTART:soon\r\n\
END:VEVENT\r\n";

        let events = Normalizer::new(1).normalize(&source(), &Payload::Ics(content.to_string()));
        assert_eq!(events.len(), 1);

        let football = &events[0];
        assert_eq!(football.title, "Football");
        assert_eq!(football.location, "");
        assert_eq!(football.repetition.as_deref(), Some("FREQ=WEEKLY"));
        assert!(football
            .exception_dates
            .contains(&NaiveDate::from_ymd_opt(2024, 6, 17).unwrap()));
        assert!(football
            .exception_dates
            .contains(&NaiveDate::from_ymd_opt(2024, 6, 24).unwrap()));
    }

    #[test]
    fn test_utc_until_is_resolved_to_local_time() {
        let content = "BEGIN:VEVENT\r\n\
SUMMARY:Night shift\r\n\
DTSTART:20240601T233000Z\r\n\
RRULE:FREQ=DAILY;UNTIL=20240612T233000Z\r\n\
END:VEVENT\r\n";

        let events = Normalizer::new(1).normalize(&source(), &Payload::Ics(content.to_string()));
        assert_eq!(events[0].repeat_until, Some(at(2024, 6, 13, 0, 30)));

        // The last occurrence is 00:30 local on the 13th, exactly the bound.
        let window = Window::week_from(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()).unwrap();
        let dates: Vec<NaiveDate> = recurrence::expand(&events[0], "papa", &window)
            .iter()
            .map(|i| i.date)
            .collect();
        let expected: Vec<NaiveDate> = (10..=13)
            .map(|d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap())
            .collect();
        assert_eq!(dates, expected);
    }

    #[test]
    fn test_normalize_caps_records() {
        let mut content = String::new();
        for i in 0..150 {
            content.push_str(&format!(
                "BEGIN:VEVENT\r\nSUMMARY:Event {}\r\nDTSTART:20240610\r\nEND:VEVENT\r\n",
                i
            ));
        }
        let events = Normalizer::default().normalize(&source(), &Payload::Ics(content));
        assert_eq!(events.len(), MAX_RECORDS_PER_SOURCE);
    }

    #[test]
    fn test_normalize_structured() {
        let items = vec![
            ApiEvent {
                id: "a".into(),
                summary: Some("Standup".into()),
                location: Some(" Office ".into()),
                start: Some(ApiEventTime {
                    date_time: Some("2024-06-10T07:30:00Z".into()),
                    date: None,
                    time_zone: None,
                }),
                status: Some("confirmed".into()),
            },
            ApiEvent {
                id: "b".into(),
                summary: Some("Cancelled thing".into()),
                location: None,
                start: Some(ApiEventTime {
                    date_time: None,
                    date: Some("2024-06-10".into()),
                    time_zone: None,
                }),
                status: Some("cancelled".into()),
            },
            ApiEvent {
                id: "c".into(),
                summary: Some("Ferien".into()),
                location: None,
                start: Some(ApiEventTime {
                    date_time: None,
                    date: Some("2024-06-12".into()),
                    time_zone: None,
                }),
                status: None,
            },
        ];

        let events = Normalizer::new(1).normalize(&source(), &Payload::Structured(items));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start, at(2024, 6, 10, 8, 30));
        assert_eq!(events[0].location, "Office");
        assert!(events[0].repetition.is_none());
        assert_eq!(
            events[1].start,
            TemporalAnchor::AllDay(NaiveDate::from_ymd_opt(2024, 6, 12).unwrap())
        );
    }
}
