use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::grid::{Cell, Day, FIRST_HOUR, LAST_HOUR};
use crate::models::{Availability, Reservation, ReservationStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayView {
    pub day: Day,
    pub date: NaiveDate,
    pub hours: BTreeMap<u8, Cell>,
}

/// Weekly pattern + overrides + live reservations for one display week.
/// Built per request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedView {
    pub week_of: NaiveDate,
    pub days: Vec<DayView>,
}

impl ComposedView {
    pub fn cell(&self, day: Day, hour: u8) -> Option<&Cell> {
        self.days.get(day.index()).and_then(|d| d.hours.get(&hour))
    }
}

/// Precedence per cell: accepted reservation, then pending reservation,
/// then date override, then weekly pattern, then unavailable.
/// Reservations of other weeks or in a terminal declined state are ignored.
pub fn compose(
    availability: &Availability,
    week_of: NaiveDate,
    reservations: &[Reservation],
) -> ComposedView {
    let mut days: Vec<DayView> = Day::ALL
        .iter()
        .map(|&day| {
            let date = day.date_in_week(week_of);
            let hours = (FIRST_HOUR..=LAST_HOUR)
                .map(|hour| (hour, availability.stored_cell(day, date, hour).into()))
                .collect();
            DayView { day, date, hours }
        })
        .collect();

    let active = reservations
        .iter()
        .filter(|r| r.week_of == week_of && r.status.is_active());

    for reservation in active {
        let day_view = &mut days[reservation.day.index()];
        for hour in reservation.hours() {
            if hour < FIRST_HOUR as i64 || hour > LAST_HOUR as i64 {
                continue;
            }
            let Some(cell) = day_view.hours.get_mut(&(hour as u8)) else {
                continue;
            };
            if let Some(overlay) = overlay_for(reservation, cell) {
                *cell = overlay;
            }
        }
    }

    ComposedView { week_of, days }
}

fn overlay_for(reservation: &Reservation, current: &Cell) -> Option<Cell> {
    let reservation_id = reservation.id.clone();
    match reservation.status {
        ReservationStatus::Accepted => match current {
            Cell::Booked { .. } => None,
            _ => Some(Cell::Booked { reservation_id }),
        },
        ReservationStatus::PendingApproval | ReservationStatus::Pending => match current {
            Cell::Booked { .. } | Cell::Pending { .. } => None,
            _ => Some(Cell::Pending { reservation_id }),
        },
        ReservationStatus::Declined => None,
    }
}
