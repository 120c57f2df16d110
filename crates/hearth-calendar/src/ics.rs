//! iCalendar tokenizing.
//!
//! Splits a feed into `VEVENT` blocks and parses each block on its own with the
//! icalendar content-line parser, so one malformed block never takes the rest of
//! the feed down with it. Only the properties the engine reads are kept.

use icalendar::parser::{read_calendar, unfold, Component, Property};

use crate::error::CalendarError;

/// A date or date-time property value with the parameters that affect its meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateValue {
    pub raw: String,
    /// `VALUE=DATE` was given.
    pub is_date: bool,
    pub tzid: Option<String>,
}

impl DateValue {
    /// A value with no parameters, as found inside a rule.
    pub fn plain(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            is_date: false,
            tzid: None,
        }
    }
}

/// Typed view of one `VEVENT` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VEventRecord {
    pub summary: Option<String>,
    pub location: Option<String>,
    pub dtstart: Option<DateValue>,
    pub rrule: Option<String>,
    pub exdates: Vec<DateValue>,
}

/// Unfold `content` and cut it into raw `VEVENT` blocks, at most `limit` of them.
pub fn event_blocks(content: &str, limit: usize) -> Vec<String> {
    let unfolded = unfold(content);
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in unfolded.lines() {
        let line = line.trim_end_matches('\r');

        if current.is_none() {
            if line.eq_ignore_ascii_case("BEGIN:VEVENT") {
                current = Some(vec![line]);
            }
            continue;
        }

        if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
        if !line.eq_ignore_ascii_case("END:VEVENT") {
            continue;
        }

        if let Some(finished) = current.take() {
            let mut block = finished.join("\r\n");
            block.push_str("\r\n");
            blocks.push(block);
        }
        if blocks.len() == limit {
            break;
        }
    }

    blocks
}

/// Parse one `BEGIN:VEVENT … END:VEVENT` block.
pub fn parse_block(block: &str) -> Result<VEventRecord, CalendarError> {
    let calendar = read_calendar(block).map_err(|e| CalendarError::InvalidPayload(e.to_string()))?;
    let vevent = calendar
        .components
        .iter()
        .find_map(find_vevent)
        .ok_or_else(|| CalendarError::InvalidPayload("block has no VEVENT".to_string()))?;

    Ok(VEventRecord {
        summary: vevent.find_prop("SUMMARY").map(|p| unescape_text(p.val.as_ref())),
        location: vevent.find_prop("LOCATION").map(|p| unescape_text(p.val.as_ref())),
        dtstart: vevent.find_prop("DTSTART").map(date_values).and_then(|v| v.into_iter().next()),
        rrule: vevent
            .find_prop("RRULE")
            .map(|p| p.val.as_ref().trim().to_string())
            .filter(|r| !r.is_empty()),
        exdates: vevent
            .properties
            .iter()
            .filter(|p| p.name == "EXDATE")
            .flat_map(date_values)
            .collect(),
    })
}

/// Tokenize a whole feed, dropping blocks that do not parse.
pub fn read_events(content: &str, limit: usize) -> Vec<VEventRecord> {
    event_blocks(content, limit)
        .iter()
        .filter_map(|block| match parse_block(block) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("Dropping malformed VEVENT block: {}", e);
                None
            }
        })
        .collect()
}

fn find_vevent<'a, 'b>(component: &'b Component<'a>) -> Option<&'b Component<'a>> {
    if component.name == "VEVENT" {
        return Some(component);
    }
    component.components.iter().find_map(find_vevent)
}

/// Split a (possibly comma-separated) date property into its values.
fn date_values(prop: &Property) -> Vec<DateValue> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| DateValue {
            raw: s.to_string(),
            is_date,
            tzid: tzid.clone(),
        })
        .collect()
}

/// Undo TEXT escaping. Line breaks become spaces for single-line display.
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push(' '),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out.trim().to_string()
}
