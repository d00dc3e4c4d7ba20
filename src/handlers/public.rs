use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Day, ReservationStatus};
use crate::services::projection::{self, PublicQuery};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    /// Comma-separated statuses.
    pub status: Option<String>,
    pub day: Option<String>,
    pub since: Option<String>,
    pub limit: Option<i64>,
}

fn parse_since(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl AvailabilityQuery {
    fn into_public_query(self) -> Result<PublicQuery, AppError> {
        let mut statuses = Vec::new();
        for raw in self.status.as_deref().unwrap_or("").split(',') {
            if raw.trim().is_empty() {
                continue;
            }
            let status = ReservationStatus::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("invalid status: {raw}")))?;
            statuses.push(status);
        }

        let day = match self.day.as_deref() {
            Some(raw) => Some(
                Day::parse(raw).ok_or_else(|| AppError::Validation(format!("invalid day: {raw}")))?,
            ),
            None => None,
        };

        let since = match self.since.as_deref() {
            Some(raw) => Some(
                parse_since(raw)
                    .ok_or_else(|| AppError::Validation(format!("invalid since: {raw}")))?,
            ),
            None => None,
        };

        Ok(PublicQuery {
            statuses,
            day,
            since,
            limit: self.limit,
        })
    }
}

// GET /api/providers/:id/availability
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, AppError> {
    let query = query.into_public_query()?;
    let today = Utc::now().date_naive();
    let view = projection::public_availability(&state, &provider_id, today, &query)?;

    Ok(([(header::CACHE_CONTROL, "no-store")], Json(view)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_since_formats() {
        assert!(parse_since("2025-06-16T08:30:00").is_some());
        assert!(parse_since("2025-06-16 08:30:00").is_some());
        assert_eq!(
            parse_since("2025-06-16"),
            NaiveDate::from_ymd_opt(2025, 6, 16).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert!(parse_since("yesterday").is_none());
    }
}
