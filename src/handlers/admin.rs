use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::require_admin;
use crate::db::queries::{self, ReservationFilter};
use crate::errors::AppError;
use crate::models::{Provider, Reservation, ReservationStatus, ServiceOffering};
use crate::services::lifecycle;
use crate::services::span::MAX_SERVICE_MINUTES;
use crate::state::AppState;

const MAX_LIST_LIMIT: i64 = 500;

// PUT /api/admin/providers/:id
#[derive(Deserialize)]
pub struct ProviderBody {
    pub display_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub weekly_pattern: Value,
    #[serde(default)]
    pub date_overrides: Value,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceOffering>,
}

fn ensure_map(field: &str, value: &Value) -> Result<(), AppError> {
    match value {
        Value::Null | Value::Object(_) => Ok(()),
        _ => Err(AppError::Validation(format!("{field} must be an object"))),
    }
}

fn ensure_service_minutes(services: &BTreeMap<String, ServiceOffering>) -> Result<(), AppError> {
    for (key, service) in services {
        let fields = [
            ("duration_minutes", service.duration_minutes),
            ("buffer_before_minutes", service.buffer_before_minutes),
            ("buffer_after_minutes", service.buffer_after_minutes),
        ];
        for (field, minutes) in fields {
            if !(0..=MAX_SERVICE_MINUTES).contains(&minutes) {
                return Err(AppError::Validation(format!(
                    "service {key}: {field} must be between 0 and {MAX_SERVICE_MINUTES}"
                )));
            }
        }
    }
    Ok(())
}

pub async fn upsert_provider(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ProviderBody>,
) -> Result<Json<Provider>, AppError> {
    require_admin(&headers, &state.config)?;

    let id = id.trim().to_string();
    let display_name = body.display_name.trim().to_string();
    if id.is_empty() || display_name.is_empty() {
        return Err(AppError::Validation("id and display_name are required".to_string()));
    }
    ensure_map("weekly_pattern", &body.weekly_pattern)?;
    ensure_map("date_overrides", &body.date_overrides)?;
    ensure_service_minutes(&body.services)?;

    let provider = Provider {
        id,
        display_name,
        contact_email: body.contact_email.filter(|e| !e.trim().is_empty()),
        contact_phone: body.contact_phone.filter(|p| !p.trim().is_empty()),
        weekly_pattern: body.weekly_pattern,
        date_overrides: body.date_overrides,
        services: body.services,
    };

    {
        let db = state.db()?;
        queries::save_provider(&db, &provider)?;
    }
    tracing::info!(provider_id = %provider.id, "provider saved");

    Ok(Json(provider))
}

// GET /api/admin/reservations
#[derive(Deserialize)]
pub struct ReservationsQuery {
    pub provider_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_reservations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ReservationsQuery>,
) -> Result<Json<Vec<Reservation>>, AppError> {
    require_admin(&headers, &state.config)?;

    let statuses = match query.status.as_deref() {
        Some(raw) => vec![ReservationStatus::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("invalid status: {raw}")))?],
        None => Vec::new(),
    };

    let filter = ReservationFilter {
        provider_id: query.provider_id,
        statuses,
        limit: query.limit.unwrap_or(50).clamp(1, MAX_LIST_LIMIT),
        ..Default::default()
    };

    let reservations = {
        let db = state.db()?;
        queries::list_reservations(&db, &filter)?
    };
    Ok(Json(reservations))
}

// POST /api/admin/reservations/:id/retry-settlement
pub async fn retry_settlement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Reservation>, AppError> {
    require_admin(&headers, &state.config)?;
    Ok(Json(lifecycle::retry_settlement(&state, &id).await?))
}

// POST /api/admin/reservations/expire
#[derive(Serialize)]
pub struct ExpireResponse {
    expired: Vec<String>,
}

pub async fn expire_reservations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ExpireResponse>, AppError> {
    require_admin(&headers, &state.config)?;
    let expired = lifecycle::expire_stale(&state, Utc::now().naive_utc()).await?;
    if !expired.is_empty() {
        tracing::info!(count = expired.len(), "expired stale reservations");
    }
    Ok(Json(ExpireResponse { expired }))
}
