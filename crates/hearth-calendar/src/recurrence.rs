//! Recurrence expansion.
//!
//! Turns a [`RawEvent`] into the concrete [`EventInstance`]s that fall inside a
//! [`Window`]. Only the rule subset a household dashboard needs is understood:
//! `FREQ` (daily, weekly, monthly), `INTERVAL`, `UNTIL` and `COUNT`. Other rule
//! parts are ignored and the base frequency still applies.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::types::{EventInstance, RawEvent, TemporalAnchor, Window};

/// Upper bound on instances produced for a single event.
pub const MAX_INSTANCES_PER_EVENT: usize = 10;

/// Base repetition unit of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// Every day.
    Daily,
    /// Every seven days.
    Weekly,
    /// Approximated as a fixed 30-day stride.
    Monthly,
}

impl Frequency {
    fn base_stride_days(self) -> u64 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }
}

/// Why a rule could not be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// No `FREQ` part.
    #[error("rule has no FREQ")]
    MissingFrequency,

    /// A `FREQ` other than daily, weekly or monthly.
    #[error("unsupported frequency: {0}")]
    UnsupportedFrequency(String),

    /// A part that is not `KEY=VALUE` or has an unreadable value.
    #[error("invalid rule part: {0}")]
    InvalidPart(String),

    /// Stepping the series left the representable date range.
    #[error("date arithmetic overflow")]
    Overflow,
}

/// Parsed repetition rule. The event's own start is the phase reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepetitionRule {
    /// Base unit of the stride.
    pub frequency: Frequency,
    /// Stride multiplier, at least 1.
    pub interval: u32,
    /// Series end bound as written. A UTC stamp is taken at face value here;
    /// the normalizer stores the offset-resolved bound on the event.
    pub until: Option<TemporalAnchor>,
    /// Total occurrences, counted from the anchor.
    pub count: Option<u32>,
}

impl FromStr for RepetitionRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut frequency = None;
        let mut interval = 1;
        let mut until = None;
        let mut count = None;

        for part in s.trim().split(';').filter(|p| !p.trim().is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RuleError::InvalidPart(part.to_string()))?;
            let value = value.trim();

            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        other => return Err(RuleError::UnsupportedFrequency(other.to_string())),
                    });
                }
                "INTERVAL" => {
                    interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| RuleError::InvalidPart(part.to_string()))?;
                }
                "UNTIL" => {
                    until = Some(
                        parse_bound(value).ok_or_else(|| RuleError::InvalidPart(part.to_string()))?,
                    );
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| RuleError::InvalidPart(part.to_string()))?,
                    );
                }
                _ => {}
            }
        }

        Ok(Self {
            frequency: frequency.ok_or(RuleError::MissingFrequency)?,
            interval,
            until,
            count,
        })
    }
}

impl RepetitionRule {
    /// Days between consecutive occurrences.
    pub fn stride_days(&self) -> Result<u64, RuleError> {
        self.frequency
            .base_stride_days()
            .checked_mul(u64::from(self.interval))
            .ok_or(RuleError::Overflow)
    }

    /// Occurrences of `event` inside `window`, at most [`MAX_INSTANCES_PER_EVENT`].
    pub fn occurrences(
        &self,
        event: &RawEvent,
        source: &str,
        window: &Window,
    ) -> Result<Vec<EventInstance>, RuleError> {
        let stride = self.stride_days()?;
        let until = event.repeat_until.or(self.until);
        let (mut current, mut ordinal) = self.fast_forward(event.start, stride, window.start())?;
        let mut instances = Vec::new();

        while instances.len() < MAX_INSTANCES_PER_EVENT {
            let date = current.date();
            if date > window.end() {
                break;
            }
            if until.is_some_and(|bound| is_past(&current, &bound)) {
                break;
            }
            if self.count.is_some_and(|count| ordinal >= u64::from(count)) {
                break;
            }

            if window.contains(date) && !event.exception_dates.contains(&date) {
                instances.push(instance_of(event, source, current));
            }

            current = match current.shifted(stride) {
                Some(next) => next,
                None => break,
            };
            ordinal += 1;
        }

        Ok(instances)
    }

    /// First occurrence on or after `window_start`, with its ordinal in the series.
    fn fast_forward(
        &self,
        anchor: TemporalAnchor,
        stride: u64,
        window_start: NaiveDate,
    ) -> Result<(TemporalAnchor, u64), RuleError> {
        if anchor.date() >= window_start {
            return Ok((anchor, 0));
        }

        match self.frequency {
            Frequency::Daily | Frequency::Weekly => {
                let behind = u64::try_from((window_start - anchor.date()).num_days())
                    .map_err(|_| RuleError::Overflow)?;
                let steps = behind.div_ceil(stride);
                let days = steps.checked_mul(stride).ok_or(RuleError::Overflow)?;
                let landed = anchor.shifted(days).ok_or(RuleError::Overflow)?;
                Ok((landed, steps))
            }
            Frequency::Monthly => {
                let mut current = anchor;
                let mut steps = 0;
                while current.date() < window_start {
                    current = current.shifted(stride).ok_or(RuleError::Overflow)?;
                    steps += 1;
                }
                Ok((current, steps))
            }
        }
    }
}

/// Raw `UNTIL` value of a rule text, if present.
pub fn until_value(rule: &str) -> Option<&str> {
    rule.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("UNTIL")
            .then_some(value.trim())
    })
}

fn parse_bound(value: &str) -> Option<TemporalAnchor> {
    let stamp = value.strip_suffix('Z').unwrap_or(value);
    if stamp.len() == 8 {
        return NaiveDate::parse_from_str(stamp, "%Y%m%d")
            .ok()
            .map(TemporalAnchor::AllDay);
    }
    NaiveDateTime::parse_from_str(stamp.get(..15)?, "%Y%m%dT%H%M%S")
        .ok()
        .map(TemporalAnchor::Timed)
}

/// Whether `occurrence` lies beyond the series end `bound`.
fn is_past(occurrence: &TemporalAnchor, bound: &TemporalAnchor) -> bool {
    match (occurrence, bound) {
        (TemporalAnchor::Timed(at), TemporalAnchor::Timed(limit)) => at > limit,
        (_, TemporalAnchor::AllDay(last)) => occurrence.date() > *last,
        (TemporalAnchor::AllDay(day), TemporalAnchor::Timed(limit)) => *day > limit.date(),
    }
}

/// Expand `event` into instances inside `window`.
///
/// A rule that cannot be interpreted degrades to a single occurrence at the
/// event's own start.
pub fn expand(event: &RawEvent, source: &str, window: &Window) -> Vec<EventInstance> {
    let Some(text) = event.repetition.as_deref() else {
        return single(event, source, window);
    };

    match text
        .parse::<RepetitionRule>()
        .and_then(|rule| rule.occurrences(event, source, window))
    {
        Ok(instances) => instances,
        Err(e) => {
            tracing::warn!(
                "Treating '{}' from '{}' as non-repeating: {} ({})",
                event.title,
                source,
                e,
                text
            );
            single(event, source, window)
        }
    }
}

fn single(event: &RawEvent, source: &str, window: &Window) -> Vec<EventInstance> {
    let date = event.start.date();
    if window.contains(date) && !event.exception_dates.contains(&date) {
        vec![instance_of(event, source, event.start)]
    } else {
        Vec::new()
    }
}

fn instance_of(event: &RawEvent, source: &str, anchor: TemporalAnchor) -> EventInstance {
    EventInstance::at(&event.title, &event.location, source, anchor)
}
