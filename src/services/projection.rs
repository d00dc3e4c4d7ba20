//! Read models built from the composed view: the provider's own dashboard,
//! and the privacy-filtered public projection.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::db::queries::{self, ReservationFilter};
use crate::errors::AppError;
use crate::models::grid::{week_start, Cell, Day};
use crate::models::{Provider, Reservation, ReservationStatus};
use crate::services::composer::{compose, ComposedView};
use crate::state::AppState;

pub const DEFAULT_PUBLIC_LIMIT: i64 = 200;
pub const MAX_PUBLIC_LIMIT: i64 = 500;

fn load_view(
    state: &AppState,
    provider_id: &str,
    week_of: NaiveDate,
) -> Result<(Provider, Vec<Reservation>, ComposedView), AppError> {
    let db = state.db()?;
    let provider = queries::get_provider(&db, provider_id)?
        .ok_or_else(|| AppError::NotFound(format!("provider {provider_id}")))?;
    let active = queries::get_active_reservations_for_week(&db, provider_id, week_of)?;
    let view = compose(&provider.availability(), week_of, &active);
    Ok((provider, active, view))
}

// ── Provider dashboard ──

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub provider_id: String,
    pub week_of: NaiveDate,
    pub view: ComposedView,
    /// Reservations still waiting on a hold confirmation or a decision.
    pub awaiting: Vec<Reservation>,
}

pub fn provider_dashboard(
    state: &AppState,
    provider_id: &str,
    week_of: NaiveDate,
) -> Result<Dashboard, AppError> {
    let week_of = week_start(week_of);
    let (_, active, view) = load_view(state, provider_id, week_of)?;
    let awaiting = active
        .into_iter()
        .filter(|r| r.status.is_awaiting_decision())
        .collect();

    Ok(Dashboard {
        provider_id: provider_id.to_string(),
        week_of,
        view,
        awaiting,
    })
}

// ── Public projection ──

/// A composed cell with the reservation id stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicCell {
    Available,
    Unavailable,
    Pending,
    Booked,
}

impl From<&Cell> for PublicCell {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Free => PublicCell::Available,
            Cell::Blocked => PublicCell::Unavailable,
            Cell::Pending { .. } => PublicCell::Pending,
            Cell::Booked { .. } => PublicCell::Booked,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicDay {
    pub day: Day,
    pub date: NaiveDate,
    pub hours: BTreeMap<u8, PublicCell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicReservation {
    pub day: Day,
    pub start_hour: i64,
    pub span: i64,
    pub status: ReservationStatus,
    pub service_name: Option<String>,
    pub duration_minutes: i64,
    pub buffer_before_minutes: i64,
    pub buffer_after_minutes: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&Reservation> for PublicReservation {
    fn from(r: &Reservation) -> Self {
        Self {
            day: r.day,
            start_hour: r.start_hour,
            span: r.span,
            status: r.status,
            service_name: r.service_name.clone(),
            duration_minutes: r.duration_minutes,
            buffer_before_minutes: r.buffer_before_minutes,
            buffer_after_minutes: r.buffer_after_minutes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicAvailability {
    pub provider_id: String,
    pub display_name: String,
    pub week_of: NaiveDate,
    pub days: Vec<PublicDay>,
    pub reservations: Vec<PublicReservation>,
}

#[derive(Debug, Clone, Default)]
pub struct PublicQuery {
    /// Empty means every active status.
    pub statuses: Vec<ReservationStatus>,
    pub day: Option<Day>,
    pub since: Option<NaiveDateTime>,
    pub limit: Option<i64>,
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PUBLIC_LIMIT).clamp(1, MAX_PUBLIC_LIMIT)
}

/// Current-week availability for anonymous and client callers. Declined
/// reservations never appear; the status filter narrows the active set.
pub fn public_availability(
    state: &AppState,
    provider_id: &str,
    today: NaiveDate,
    query: &PublicQuery,
) -> Result<PublicAvailability, AppError> {
    let week_of = week_start(today);
    let (provider, _, view) = load_view(state, provider_id, week_of)?;

    let statuses: Vec<ReservationStatus> = if query.statuses.is_empty() {
        ReservationStatus::ACTIVE.to_vec()
    } else {
        query.statuses.iter().copied().filter(|s| s.is_active()).collect()
    };

    let reservations = if statuses.is_empty() {
        Vec::new()
    } else {
        let db = state.db()?;
        queries::list_reservations(
            &db,
            &ReservationFilter {
                provider_id: Some(provider_id.to_string()),
                statuses,
                week_of: Some(week_of),
                day: query.day,
                since: query.since,
                limit: clamp_limit(query.limit),
            },
        )?
        .iter()
        .map(PublicReservation::from)
        .collect()
    };

    let days = view
        .days
        .iter()
        .map(|d| PublicDay {
            day: d.day,
            date: d.date,
            hours: d.hours.iter().map(|(hour, cell)| (*hour, PublicCell::from(cell))).collect(),
        })
        .collect();

    Ok(PublicAvailability {
        provider_id: provider.id,
        display_name: provider.display_name,
        week_of,
        days,
        reservations,
    })
}
