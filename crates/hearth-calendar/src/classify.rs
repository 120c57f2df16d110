//! Instance classification: travel detection, per-source visibility and school
//! closures.
//!
//! The keyword heuristics live in [`KeywordTables`] so they can be replaced from
//! configuration and tested on their own.

use std::collections::HashMap;

use chrono::{NaiveDate, Timelike};

use crate::types::{CalendarSource, EventInstance, SourceRole, TravelSignal};

/// A place keyword and the timezone to show for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelLocation {
    pub keyword: String,
    pub timezone: String,
}

/// A household member and the words that identify them in event text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traveler {
    pub name: String,
    pub keywords: Vec<String>,
}

const DEFAULT_LOCATIONS: &[(&str, &str)] = &[
    ("munich", "Europe/Berlin"),
    ("new york", "America/New_York"),
    ("london", "Europe/London"),
    ("paris", "Europe/Paris"),
    ("tokyo", "Asia/Tokyo"),
    ("singapore", "Asia/Singapore"),
    ("sydney", "Australia/Sydney"),
    ("dubai", "Asia/Dubai"),
    ("east coast", "America/New_York"),
    ("west coast", "America/Los_Angeles"),
    ("los angeles", "America/Los_Angeles"),
    ("california", "America/Los_Angeles"),
    ("chicago", "America/Chicago"),
    ("boston", "America/New_York"),
];

const DEFAULT_TRAVELERS: &[(&str, &[&str])] = &[
    ("Papa", &["papa", "joshua"]),
    ("Daddy", &["daddy", "scott"]),
];

const DEFAULT_CLOSURE_KEYWORDS: &[&str] = &[
    "schule",
    "schulfrei",
    "ferien",
    "no school",
    "kein unterricht",
    "holiday",
    "vacation",
];

/// Ordered keyword tables. Earlier entries win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTables {
    travel_locations: Vec<TravelLocation>,
    travelers: Vec<Traveler>,
    closure_keywords: Vec<String>,
}

impl Default for KeywordTables {
    fn default() -> Self {
        Self {
            travel_locations: DEFAULT_LOCATIONS
                .iter()
                .map(|(keyword, timezone)| TravelLocation {
                    keyword: keyword.to_string(),
                    timezone: timezone.to_string(),
                })
                .collect(),
            travelers: DEFAULT_TRAVELERS
                .iter()
                .map(|(name, keywords)| Traveler {
                    name: name.to_string(),
                    keywords: keywords.iter().map(|k| k.to_string()).collect(),
                })
                .collect(),
            closure_keywords: DEFAULT_CLOSURE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl KeywordTables {
    pub fn with_travel_locations(mut self, locations: Vec<TravelLocation>) -> Self {
        self.travel_locations = locations
            .into_iter()
            .map(|l| TravelLocation {
                keyword: l.keyword.trim().to_lowercase(),
                timezone: l.timezone,
            })
            .filter(|l| !l.keyword.is_empty())
            .collect();
        self
    }

    pub fn with_travelers(mut self, travelers: Vec<Traveler>) -> Self {
        self.travelers = travelers
            .into_iter()
            .map(|t| Traveler {
                name: t.name,
                keywords: lowercase_keywords(t.keywords),
            })
            .collect();
        self
    }

    pub fn with_closure_keywords(mut self, keywords: Vec<String>) -> Self {
        self.closure_keywords = lowercase_keywords(keywords);
        self
    }

    /// Match `title` and `location` against the place table.
    ///
    /// The first place keyword found wins; the traveler is the first identity
    /// whose keyword also appears, if any.
    pub fn detect_travel(&self, title: &str, location: &str, date: NaiveDate) -> Option<TravelSignal> {
        let text = format!("{} {}", title, location).to_lowercase();
        let place = self
            .travel_locations
            .iter()
            .find(|l| text.contains(l.keyword.as_str()))?;

        let traveler = self
            .travelers
            .iter()
            .find(|t| t.keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|t| t.name.clone());

        Some(TravelSignal {
            traveler,
            location: title_case(&place.keyword),
            timezone: place.timezone.clone(),
            date,
        })
    }

    pub fn is_school_closure(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.closure_keywords.iter().any(|k| title.contains(k.as_str()))
    }
}

fn lowercase_keywords(keywords: Vec<String>) -> Vec<String> {
    keywords
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Per-source predicate deciding whether an instance reaches the timeline.
pub trait VisibilityPolicy: Send + Sync {
    fn is_visible(&self, instance: &EventInstance) -> bool;
}

/// Shows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl VisibilityPolicy for AlwaysVisible {
    fn is_visible(&self, _instance: &EventInstance) -> bool {
        true
    }
}

/// Hides timed instances starting within `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkHoursHidden {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for WorkHoursHidden {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
        }
    }
}

impl VisibilityPolicy for WorkHoursHidden {
    fn is_visible(&self, instance: &EventInstance) -> bool {
        match instance.time {
            Some(time) if !instance.is_all_day => {
                !(self.start_hour..self.end_hour).contains(&time.hour())
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Show,
    Hide,
    /// Divert into the school-closure bucket.
    SchoolClosure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    /// Reported even when the instance itself is hidden.
    pub travel: Option<TravelSignal>,
}

/// Runs the classification passes for each instance.
pub struct Classifier {
    tables: KeywordTables,
    work_hours: WorkHoursHidden,
    policies: HashMap<String, Box<dyn VisibilityPolicy>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(KeywordTables::default(), WorkHoursHidden::default())
    }
}

impl Classifier {
    pub fn new(tables: KeywordTables, work_hours: WorkHoursHidden) -> Self {
        Self {
            tables,
            work_hours,
            policies: HashMap::new(),
        }
    }

    /// Use `policy` for the source named `source` instead of its role default.
    pub fn with_policy(
        mut self,
        source: impl Into<String>,
        policy: impl VisibilityPolicy + 'static,
    ) -> Self {
        self.policies.insert(source.into(), Box::new(policy));
        self
    }

    fn is_visible(&self, source: &CalendarSource, instance: &EventInstance) -> bool {
        if let Some(policy) = self.policies.get(&source.name) {
            return policy.is_visible(instance);
        }
        match source.role {
            SourceRole::ParentWork => self.work_hours.is_visible(instance),
            SourceRole::Household | SourceRole::Child => AlwaysVisible.is_visible(instance),
        }
    }

    /// Travel detection, then visibility, then school-closure detection.
    pub fn classify(&self, source: &CalendarSource, instance: &EventInstance) -> Classification {
        let travel = if instance.is_all_day {
            self.tables
                .detect_travel(&instance.title, &instance.location, instance.date)
        } else {
            None
        };

        let verdict = if !self.is_visible(source, instance) {
            Verdict::Hide
        } else if source.role == SourceRole::Child
            && instance.is_all_day
            && self.tables.is_school_closure(&instance.title)
        {
            Verdict::SchoolClosure
        } else {
            Verdict::Show
        };

        Classification { verdict, travel }
    }
}
