use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Day, Reservation, ReservationStatus};
use crate::state::AppState;

#[derive(Clone, Debug, Serialize)]
pub struct ReservationEvent {
    pub provider_id: String,
    pub reservation_id: String,
    pub status: ReservationStatus,
    pub week_of: NaiveDate,
    pub day: Day,
    pub start_hour: i64,
    pub span: i64,
}

impl ReservationEvent {
    pub fn new(reservation: &Reservation, status: ReservationStatus) -> Self {
        Self {
            provider_id: reservation.provider_id.clone(),
            reservation_id: reservation.id.clone(),
            status,
            week_of: reservation.week_of,
            day: reservation.day,
            start_hour: reservation.start_hour,
            span: reservation.span,
        }
    }
}

pub fn publish(state: &AppState, reservation: &Reservation, status: ReservationStatus) {
    // no subscribers is fine
    let _ = state.events_tx.send(ReservationEvent::new(reservation, status));
}
