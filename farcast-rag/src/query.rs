//! Time-aware query synthesis.
//!
//! Retrieval queries are built from per-slot templates filled with the
//! segment's **in-universe** broadcast date — wall clock shifted by the
//! station's future-year offset — so relevance tracks broadcast time, not
//! real-world time. Templates are data, not code: the defaults ship with
//! the crate and deployments may override them from a file.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::Deserialize;

use farcast_core::{Segment, SlotType};

/// Embedded default templates.
const DEFAULT_TEMPLATES: &str = include_str!("../templates/slots.toml");

/// Per-slot retrieval templates keyed by slot name.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryTemplates {
    slots: HashMap<String, String>,
}

impl QueryTemplates {
    /// The templates embedded in the crate.
    pub fn embedded() -> Self {
        toml::from_str(DEFAULT_TEMPLATES).expect("embedded templates parse")
    }

    /// Load overridden templates from a TOML file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("read {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| format!("parse {}: {e}", path.display()))
    }

    fn template_for(&self, slot: SlotType) -> &str {
        self.slots
            .get(slot.name())
            .map(String::as_str)
            .unwrap_or("notable facts and events of {month} {day}, {year}")
    }
}

/// Builds retrieval queries anchored in the station's fictional calendar.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    templates: QueryTemplates,
    future_year_offset: i32,
}

impl QueryBuilder {
    pub fn new(templates: QueryTemplates, future_year_offset: i32) -> Self {
        Self {
            templates,
            future_year_offset,
        }
    }

    /// The segment's in-universe broadcast instant: its scheduled start
    /// (falling back to now) shifted by the future-year offset.
    pub fn reference_time(&self, segment: &Segment) -> DateTime<Utc> {
        let base = segment.scheduled_start_ts.unwrap_or_else(Utc::now);
        shift_year(base, self.future_year_offset)
    }

    /// Fill the slot template with the reference date.
    pub fn build(&self, segment: &Segment) -> String {
        let reference = self.reference_time(segment);
        self.templates
            .template_for(segment.slot_type)
            .replace("{year}", &reference.year().to_string())
            .replace("{month}", &reference.format("%B").to_string())
            .replace("{day}", &reference.day().to_string())
    }
}

/// Shift a timestamp by whole years, clamping Feb 29 to Feb 28 when the
/// target year is not a leap year.
fn shift_year(ts: DateTime<Utc>, years: i32) -> DateTime<Utc> {
    let year = ts.year() + years;
    let day = if ts.month() == 2 && ts.day() == 29 { 28 } else { ts.day() };
    Utc.with_ymd_and_hms(year, ts.month(), day, ts.hour(), ts.minute(), ts.second())
        .single()
        .unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_at(slot: SlotType, ts: &str) -> Segment {
        Segment::new(slot, "en")
            .with_scheduled_start(ts.parse().expect("valid timestamp"))
    }

    #[test]
    fn reference_time_adds_the_offset() {
        let builder = QueryBuilder::new(QueryTemplates::embedded(), 500);
        let segment = segment_at(SlotType::News, "2026-03-15T12:00:00Z");
        let reference = builder.reference_time(&segment);
        assert_eq!(reference.year(), 2526);
        assert_eq!(reference.month(), 3);
        assert_eq!(reference.day(), 15);
    }

    #[test]
    fn leap_day_clamps_in_non_leap_target() {
        let shifted = shift_year("2024-02-29T08:00:00Z".parse().unwrap(), 501);
        assert_eq!(shifted.year(), 2525);
        assert_eq!(shifted.month(), 2);
        assert_eq!(shifted.day(), 28);
    }

    #[test]
    fn news_query_carries_the_fictional_date() {
        let builder = QueryBuilder::new(QueryTemplates::embedded(), 500);
        let segment = segment_at(SlotType::News, "2026-03-15T12:00:00Z");
        let query = builder.build(&segment);
        assert!(query.contains("2526"), "{query}");
        assert!(query.contains("March"), "{query}");
        assert!(query.contains("15"), "{query}");
    }

    #[test]
    fn every_slot_has_a_template() {
        let templates = QueryTemplates::embedded();
        for slot in [
            SlotType::News,
            SlotType::Culture,
            SlotType::Tech,
            SlotType::Interview,
            SlotType::Panel,
            SlotType::Dialogue,
            SlotType::StationId,
            SlotType::Weather,
            SlotType::History,
        ] {
            assert!(
                templates.slots.contains_key(slot.name()),
                "missing template for {slot}"
            );
        }
    }
}
