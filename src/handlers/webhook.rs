use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::services::lifecycle::{self, HoldConfirmation};
use crate::services::payments::verify_signature;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-payment-signature";

#[derive(Deserialize)]
pub struct PaymentEvent {
    pub event_type: String,
    pub reservation_id: String,
    pub hold_reference: Option<String>,
    pub transaction_id: Option<String>,
}

// POST /webhook/payments
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let secret = &state.config.payment_webhook_secret;
    if secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not configured, rejecting payment webhook");
        return Err(AppError::Integrity("webhook signing is not configured".to_string()));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if signature.is_empty() {
        tracing::warn!("payment webhook without signature");
        return Err(AppError::Integrity("missing signature".to_string()));
    }
    if !verify_signature(secret, &body, signature) {
        tracing::warn!("invalid payment webhook signature");
        return Err(AppError::Integrity("invalid signature".to_string()));
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed payment event: {e}")))?;

    tracing::info!(
        event_type = %event.event_type,
        reservation_id = %event.reservation_id,
        "payment webhook"
    );

    match event.event_type.as_str() {
        "hold.confirmed" => {
            let hold_reference = event
                .hold_reference
                .filter(|h| !h.trim().is_empty())
                .ok_or_else(|| AppError::Validation("hold_reference is required".to_string()))?;
            let outcome = lifecycle::confirm_hold(
                &state,
                HoldConfirmation {
                    reservation_id: event.reservation_id,
                    hold_reference,
                    transaction_id: event.transaction_id,
                },
            )
            .await
            .inspect_err(|e| {
                if matches!(e, AppError::Integrity(_)) {
                    tracing::warn!(error = %e, "payment webhook rejected");
                }
            })?;
            Ok(Json(json!({ "ok": true, "outcome": outcome })))
        }
        "hold.denied" => {
            let applied = lifecycle::deny_hold(&state, &event.reservation_id).await?;
            Ok(Json(json!({ "ok": true, "applied": applied })))
        }
        other => {
            tracing::info!(event_type = %other, "ignoring unhandled payment event");
            Ok(Json(json!({ "ok": true, "ignored": true })))
        }
    }
}
