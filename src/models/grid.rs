use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

pub const FIRST_HOUR: u8 = 7;
pub const LAST_HOUR: u8 = 19;
pub const HOURS_PER_DAY: usize = (LAST_HOUR - FIRST_HOUR + 1) as usize;
pub const DAYS_PER_WEEK: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub const ALL: [Day; DAYS_PER_WEEK] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
        Day::Saturday,
        Day::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }

    /// Accepts full names and three-letter abbreviations, any case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => Some(Day::Monday),
            "tuesday" | "tue" => Some(Day::Tuesday),
            "wednesday" | "wed" => Some(Day::Wednesday),
            "thursday" | "thu" => Some(Day::Thursday),
            "friday" | "fri" => Some(Day::Friday),
            "saturday" | "sat" => Some(Day::Saturday),
            "sunday" | "sun" => Some(Day::Sunday),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Day::Monday => 0,
            Day::Tuesday => 1,
            Day::Wednesday => 2,
            Day::Thursday => 3,
            Day::Friday => 4,
            Day::Saturday => 5,
            Day::Sunday => 6,
        }
    }

    /// Calendar date of this day within the week starting at `week_of`.
    pub fn date_in_week(&self, week_of: NaiveDate) -> NaiveDate {
        week_of + Duration::days(self.index() as i64)
    }
}

/// Monday of the calendar week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn is_display_hour(hour: i64) -> bool {
    (FIRST_HOUR as i64..=LAST_HOUR as i64).contains(&hour)
}

/// Hours `[start, start + span - 1]`, or `None` when the run leaves the grid.
pub fn covered_hours(start_hour: i64, span: i64) -> Option<std::ops::RangeInclusive<u8>> {
    if span < 1 || !is_display_hour(start_hour) {
        return None;
    }
    let end = start_hour.checked_add(span - 1)?;
    if !is_display_hour(end) {
        return None;
    }
    Some(start_hour as u8..=end as u8)
}

/// The provider's stored intent for one hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredCell {
    Free,
    Blocked,
}

/// One cell of the composed view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Cell {
    #[serde(rename = "available")]
    Free,
    #[serde(rename = "unavailable")]
    Blocked,
    Pending { reservation_id: String },
    Booked { reservation_id: String },
}

impl Cell {
    pub fn is_free(&self) -> bool {
        matches!(self, Cell::Free)
    }
}

impl From<StoredCell> for Cell {
    fn from(stored: StoredCell) -> Self {
        match stored {
            StoredCell::Free => Cell::Free,
            StoredCell::Blocked => Cell::Blocked,
        }
    }
}
