use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::authenticate;
use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Day, PaymentState, ReservationStatus};
use crate::services::calendar::generate_ics;
use crate::services::lifecycle::{self, CreateRequest, Decision};
use crate::services::projection::{self, Dashboard};
use crate::state::AppState;

// POST /api/reservations
#[derive(Deserialize)]
pub struct CreateReservationBody {
    pub provider_id: String,
    pub day: String,
    pub start_hour: i64,
    pub service_key: Option<String>,
    pub amount: i64,
    pub week_of: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct CreateReservationResponse {
    id: String,
    status: ReservationStatus,
    payment_state: PaymentState,
    week_of: NaiveDate,
    day: Day,
    start_hour: i64,
    span: i64,
    approval_url: Option<String>,
}

pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateReservationBody>,
) -> Result<Response, AppError> {
    let actor = authenticate(&headers, &state.config)?;

    let day = Day::parse(&body.day)
        .ok_or_else(|| AppError::Validation(format!("invalid day: {}", body.day)))?;
    let service_key = body
        .service_key
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());

    let created = lifecycle::create(
        &state,
        &actor,
        CreateRequest {
            provider_id: body.provider_id.trim().to_string(),
            day,
            start_hour: body.start_hour,
            service_key,
            amount: body.amount,
            week_of: body.week_of,
        },
    )
    .await?;

    let r = created.reservation;
    let response = CreateReservationResponse {
        id: r.id,
        status: r.status,
        payment_state: r.payment_state,
        week_of: r.week_of,
        day: r.day,
        start_hour: r.start_hour,
        span: r.span,
        approval_url: created.approval_url,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

// POST /api/reservations/:id/accept, /api/reservations/:id/decline
#[derive(Serialize)]
pub struct DecisionResponse {
    reservation_id: String,
    status: ReservationStatus,
    payment_state: PaymentState,
    applied: bool,
    dashboard: Dashboard,
}

async fn decide(
    state: &AppState,
    headers: &HeaderMap,
    id: &str,
    decision: Decision,
) -> Result<Json<DecisionResponse>, AppError> {
    let actor = authenticate(headers, &state.config)?;
    let outcome = lifecycle::resolve(state, &actor, id, decision).await?;
    let r = outcome.reservation;
    let dashboard = projection::provider_dashboard(state, &r.provider_id, r.week_of)?;

    Ok(Json(DecisionResponse {
        reservation_id: r.id,
        status: r.status,
        payment_state: r.payment_state,
        applied: outcome.applied,
        dashboard,
    }))
}

pub async fn accept_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DecisionResponse>, AppError> {
    decide(&state, &headers, &id, Decision::Accept).await
}

pub async fn decline_reservation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DecisionResponse>, AppError> {
    decide(&state, &headers, &id, Decision::Decline).await
}

// GET /api/reservations/:id/calendar.ics
pub async fn download_ics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let actor = authenticate(&headers, &state.config)?;

    let (reservation, provider_name) = {
        let db = state.db()?;
        let reservation = queries::get_reservation(&db, &id)?
            .ok_or_else(|| AppError::NotFound(format!("reservation {id}")))?;
        let provider_name = queries::get_provider(&db, &reservation.provider_id)?
            .map(|p| p.display_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "your provider".to_string());
        (reservation, provider_name)
    };

    if reservation.client_id != actor.id && !actor.acts_for(&reservation.provider_id) {
        return Err(AppError::Forbidden("not a party to this reservation".to_string()));
    }
    if reservation.status != ReservationStatus::Accepted {
        return Err(AppError::Conflict("reservation is not accepted".to_string()));
    }

    let ics = generate_ics(&reservation, &provider_name);
    let filename = format!("reservation-{}.ics", reservation.id);

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        ics,
    )
        .into_response())
}

// GET /api/provider/dashboard
#[derive(Deserialize)]
pub struct DashboardQuery {
    pub week_of: Option<NaiveDate>,
    /// Admins only; providers always see their own grid.
    pub provider_id: Option<String>,
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<Dashboard>, AppError> {
    let actor = authenticate(&headers, &state.config)?;

    let provider_id = match query.provider_id {
        Some(id) if actor.acts_for(&id) => id,
        Some(_) => {
            return Err(AppError::Forbidden(
                "cannot view another provider's dashboard".to_string(),
            ))
        }
        None if actor.is_admin() => {
            return Err(AppError::Validation("provider_id is required for admins".to_string()))
        }
        None => actor.id.clone(),
    };

    let week_of = query.week_of.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(projection::provider_dashboard(&state, &provider_id, week_of)?))
}
