use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod admin;
pub mod events;
pub mod health;
pub mod public;
pub mod reservations;
pub mod webhook;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/reservations", post(reservations::create_reservation))
        .route(
            "/api/reservations/:id/accept",
            post(reservations::accept_reservation),
        )
        .route(
            "/api/reservations/:id/decline",
            post(reservations::decline_reservation),
        )
        .route(
            "/api/reservations/:id/calendar.ics",
            get(reservations::download_ics),
        )
        .route("/api/provider/dashboard", get(reservations::dashboard))
        .route("/api/provider/events", get(events::events_stream))
        .route(
            "/api/providers/:id/availability",
            get(public::availability),
        )
        .route("/webhook/payments", post(webhook::payment_webhook))
        .route("/api/admin/providers/:id", put(admin::upsert_provider))
        .route("/api/admin/reservations", get(admin::list_reservations))
        .route(
            "/api/admin/reservations/:id/retry-settlement",
            post(admin::retry_settlement),
        )
        .route(
            "/api/admin/reservations/expire",
            post(admin::expire_reservations),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
