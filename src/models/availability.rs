use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde_json::Value;

use super::grid::{is_display_hour, Day, StoredCell};

/// A provider's stored intent: recurring weekly pattern plus one-off date
/// overrides. Never contains pending or booked state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Availability {
    pub weekly: HashMap<Day, BTreeMap<u8, StoredCell>>,
    pub overrides: BTreeMap<NaiveDate, BTreeMap<u8, StoredCell>>,
}

impl Availability {
    /// Parses the two nested maps stored on the provider record. Malformed
    /// shapes never fail: unknown days, dates or hours are skipped and any
    /// value other than `true`/`"available"` reads as blocked.
    pub fn from_values(weekly_pattern: &Value, date_overrides: &Value) -> Self {
        let mut weekly = HashMap::new();
        if let Some(days) = weekly_pattern.as_object() {
            for (key, hours) in days {
                match Day::parse(key) {
                    Some(day) => {
                        weekly.insert(day, parse_hours(hours));
                    }
                    None => tracing::debug!(key = %key, "ignoring unknown weekday in pattern"),
                }
            }
        }

        let mut overrides = BTreeMap::new();
        if let Some(dates) = date_overrides.as_object() {
            for (key, hours) in dates {
                match NaiveDate::parse_from_str(key, "%Y-%m-%d") {
                    Ok(date) => {
                        overrides.insert(date, parse_hours(hours));
                    }
                    Err(_) => tracing::debug!(key = %key, "ignoring malformed override date"),
                }
            }
        }

        Self { weekly, overrides }
    }

    pub fn from_json(weekly_pattern: &str, date_overrides: &str) -> Self {
        let weekly: Value = serde_json::from_str(weekly_pattern).unwrap_or(Value::Null);
        let overrides: Value = serde_json::from_str(date_overrides).unwrap_or(Value::Null);
        Self::from_values(&weekly, &overrides)
    }

    /// Stored intent for one cell: override for that date, else the weekly
    /// value, else blocked.
    pub fn stored_cell(&self, day: Day, date: NaiveDate, hour: u8) -> StoredCell {
        if let Some(cell) = self.overrides.get(&date).and_then(|h| h.get(&hour)) {
            return *cell;
        }
        self.weekly
            .get(&day)
            .and_then(|h| h.get(&hour))
            .copied()
            .unwrap_or(StoredCell::Blocked)
    }
}

fn parse_hours(value: &Value) -> BTreeMap<u8, StoredCell> {
    let mut hours = BTreeMap::new();
    let Some(map) = value.as_object() else {
        return hours;
    };
    for (key, raw) in map {
        let Ok(hour) = key.trim().parse::<i64>() else {
            continue;
        };
        if !is_display_hour(hour) {
            continue;
        }
        hours.insert(hour as u8, parse_cell(raw));
    }
    hours
}

/// `true` is free. The string `"available"` (any case) is a legacy alias for
/// `true` still present in older provider records; everything else is blocked.
fn parse_cell(value: &Value) -> StoredCell {
    match value {
        Value::Bool(true) => StoredCell::Free,
        Value::String(s) if s.eq_ignore_ascii_case("available") => StoredCell::Free,
        _ => StoredCell::Blocked,
    }
}
