//! Reservation state machine.
//!
//! `pending_approval -> pending -> accepted | declined`, with `declined` also
//! reachable from `pending_approval`. Every transition goes through
//! [`next_status`] and is persisted as a conditional update, so two racing
//! callers can never both apply the same step, and funds are captured or
//! released only by the caller whose update landed.

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::auth::Actor;
use crate::db::queries::{self, ClaimOutcome, StatusChange};
use crate::errors::AppError;
use crate::models::grid::{week_start, Day};
use crate::models::{PaymentState, Reservation, ReservationStatus};
use crate::services::composer::compose;
use crate::services::events;
use crate::services::payments::Resolution;
use crate::services::retry::retry_with_backoff;
use crate::services::span::required_span;
use crate::services::validator::ensure_reservable;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    HoldConfirmed,
    HoldDenied,
    Accept,
    Decline,
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Advance(ReservationStatus),
    /// Nothing to do; the reservation is already past this event.
    AlreadyResolved,
    Rejected(&'static str),
}

pub fn next_status(current: ReservationStatus, event: LifecycleEvent) -> Step {
    use LifecycleEvent::*;
    use ReservationStatus::*;

    match (current, event) {
        (PendingApproval, HoldConfirmed) => Step::Advance(Pending),
        (_, HoldConfirmed) => Step::AlreadyResolved,

        (PendingApproval, HoldDenied) => Step::Advance(Declined),
        (_, HoldDenied) => Step::AlreadyResolved,

        (Pending, Accept) => Step::Advance(Accepted),
        (PendingApproval, Accept) => Step::Rejected("payment hold has not been confirmed yet"),
        (Accepted | Declined, Accept) => Step::AlreadyResolved,

        (PendingApproval | Pending, Decline | Expire) => Step::Advance(Declined),
        (Accepted | Declined, Decline | Expire) => Step::AlreadyResolved,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
}

impl Decision {
    fn event(self) -> LifecycleEvent {
        match self {
            Decision::Accept => LifecycleEvent::Accept,
            Decision::Decline => LifecycleEvent::Decline,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub reservation: Reservation,
    /// False when the reservation was already resolved and nothing changed.
    pub applied: bool,
}

// ── Create ──

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub provider_id: String,
    pub day: Day,
    pub start_hour: i64,
    pub service_key: Option<String>,
    pub amount: i64,
    pub week_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Created {
    pub reservation: Reservation,
    pub approval_url: Option<String>,
}

pub async fn create(
    state: &AppState,
    client: &Actor,
    req: CreateRequest,
) -> Result<Created, AppError> {
    if req.amount <= 0 {
        return Err(AppError::Validation("amount must be positive".to_string()));
    }

    let provider = {
        let db = state.db()?;
        queries::get_provider(&db, &req.provider_id)?
            .ok_or_else(|| AppError::NotFound(format!("provider {}", req.provider_id)))?
    };

    if provider.id == client.id {
        return Err(AppError::Validation("providers cannot book themselves".to_string()));
    }

    let service = match req.service_key.as_deref() {
        Some(key) => Some(
            provider
                .service(key)
                .cloned()
                .ok_or_else(|| AppError::Validation(format!("unknown service: {key}")))?,
        ),
        None => None,
    };
    let (duration, before, after) = service
        .as_ref()
        .map(|s| (s.duration_minutes, s.buffer_before_minutes, s.buffer_after_minutes))
        .unwrap_or((0, 0, 0));
    let span = required_span(duration, before, after);

    let reservation = {
        let mut db = state.db()?;
        let week_of = week_start(req.week_of.unwrap_or_else(|| Utc::now().date_naive()));
        let active = queries::get_active_reservations_for_week(&db, &provider.id, week_of)?;
        let view = compose(&provider.availability(), week_of, &active);
        ensure_reservable(&view, req.day, req.start_hour, span)?;

        let now = Utc::now().naive_utc();
        let reservation = Reservation {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: provider.id.clone(),
            client_id: client.id.clone(),
            week_of,
            day: req.day,
            start_hour: req.start_hour,
            span,
            service_key: req.service_key.clone(),
            service_name: service.as_ref().map(|s| s.name.clone()),
            duration_minutes: duration.max(0),
            buffer_before_minutes: before.max(0),
            buffer_after_minutes: after.max(0),
            status: ReservationStatus::PendingApproval,
            payment_state: PaymentState::None,
            amount: req.amount,
            currency: state.config.payment_currency.clone(),
            checkout_reference: None,
            hold_reference: None,
            capture_reference: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        };

        match queries::insert_reservation(&mut db, &reservation)? {
            ClaimOutcome::Created => reservation,
            ClaimOutcome::Conflict => {
                tracing::info!(
                    provider_id = %reservation.provider_id,
                    day = reservation.day.as_str(),
                    start_hour = reservation.start_hour,
                    "lost slot claim race"
                );
                return Err(AppError::Conflict(
                    "this slot was just taken, please pick another".to_string(),
                ));
            }
        }
    };

    tracing::info!(
        reservation_id = %reservation.id,
        provider_id = %reservation.provider_id,
        day = reservation.day.as_str(),
        start_hour = reservation.start_hour,
        span = reservation.span,
        "reservation created"
    );

    let hold = state
        .payments
        .open_hold(&reservation.id, reservation.amount, &reservation.currency)
        .await;

    match hold {
        Ok(hold) => {
            {
                let db = state.db()?;
                queries::record_checkout(&db, &reservation.id, &hold.checkout_reference)?;
            }
            events::publish(state, &reservation, ReservationStatus::PendingApproval);
            let reservation = reload(state, &reservation.id)?;
            Ok(Created {
                reservation,
                approval_url: hold.approval_url,
            })
        }
        Err(e) => {
            tracing::error!(
                reservation_id = %reservation.id,
                error = %e,
                "failed to open payment hold"
            );
            let mut db = state.db()?;
            queries::apply_status_change(
                &mut db,
                &StatusChange {
                    id: &reservation.id,
                    from: ReservationStatus::PendingApproval,
                    to: ReservationStatus::Declined,
                    payment_state: PaymentState::HoldFailed,
                    hold_reference: None,
                    transaction_id: None,
                    release_claims: true,
                },
            )?;
            Err(AppError::Payment("could not open a payment hold, please try again".to_string()))
        }
    }
}

// ── Provider decision ──

pub async fn resolve(
    state: &AppState,
    actor: &Actor,
    reservation_id: &str,
    decision: Decision,
) -> Result<Outcome, AppError> {
    let current = reload(state, reservation_id)?;
    if !actor.acts_for(&current.provider_id) {
        tracing::warn!(
            actor = %actor.id,
            reservation_id = %reservation_id,
            "decision attempted by non-owner"
        );
        return Err(AppError::Forbidden(
            "only the owning provider can decide on this reservation".to_string(),
        ));
    }

    let target = match next_status(current.status, decision.event()) {
        Step::Advance(to) => to,
        Step::AlreadyResolved => {
            return Ok(Outcome {
                reservation: current,
                applied: false,
            })
        }
        Step::Rejected(reason) => return Err(AppError::Conflict(reason.to_string())),
    };

    let payment_state = match (target, current.hold_reference.is_some()) {
        (ReservationStatus::Accepted, _) => PaymentState::CapturePending,
        (_, true) => PaymentState::ReleasePending,
        (_, false) => PaymentState::Released,
    };

    let applied = {
        let mut db = state.db()?;
        queries::apply_status_change(
            &mut db,
            &StatusChange {
                id: reservation_id,
                from: current.status,
                to: target,
                payment_state,
                hold_reference: None,
                transaction_id: None,
                release_claims: target == ReservationStatus::Declined,
            },
        )?
    };

    if !applied {
        // someone else moved it between our read and the conditional update
        let latest = reload(state, reservation_id)?;
        if latest.status.is_terminal() {
            return Ok(Outcome {
                reservation: latest,
                applied: false,
            });
        }
        return Err(AppError::Conflict(
            "reservation changed while deciding, please retry".to_string(),
        ));
    }

    tracing::info!(
        reservation_id = %reservation_id,
        provider_id = %current.provider_id,
        status = target.as_str(),
        "reservation resolved"
    );
    events::publish(state, &current, target);

    match (target, current.hold_reference.as_deref()) {
        (ReservationStatus::Accepted, hold) => {
            settle(state, reservation_id, hold, Resolution::Capture).await?;
        }
        (_, Some(hold)) => {
            settle(state, reservation_id, Some(hold), Resolution::Release).await?;
        }
        (_, None) => {}
    }

    Ok(Outcome {
        reservation: reload(state, reservation_id)?,
        applied: true,
    })
}

// ── Payment collaborator callbacks ──

#[derive(Debug, Clone)]
pub struct HoldConfirmation {
    pub reservation_id: String,
    pub hold_reference: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Confirmed,
    Duplicate,
    /// Authorization arrived after the reservation was declined; voided.
    LateHoldReleased,
}

pub async fn confirm_hold(
    state: &AppState,
    confirmation: HoldConfirmation,
) -> Result<ConfirmOutcome, AppError> {
    let current = {
        let db = state.db()?;
        queries::get_reservation(&db, &confirmation.reservation_id)?
    }
    .ok_or_else(|| {
        AppError::Integrity(format!(
            "confirmation references unknown reservation {}",
            confirmation.reservation_id
        ))
    })?;
    apply_confirmation(state, current, confirmation).await
}

/// Applies a hold confirmation against the row as last read.
async fn apply_confirmation(
    state: &AppState,
    current: Reservation,
    confirmation: HoldConfirmation,
) -> Result<ConfirmOutcome, AppError> {
    if let Some(existing) = current.hold_reference.as_deref() {
        if existing != confirmation.hold_reference {
            return Err(AppError::Integrity(format!(
                "hold reference mismatch for reservation {}",
                current.id
            )));
        }
    }

    match next_status(current.status, LifecycleEvent::HoldConfirmed) {
        Step::Advance(to) => {
            let applied = {
                let mut db = state.db()?;
                queries::apply_status_change(
                    &mut db,
                    &StatusChange {
                        id: &current.id,
                        from: current.status,
                        to,
                        payment_state: PaymentState::Held,
                        hold_reference: Some(&confirmation.hold_reference),
                        transaction_id: confirmation.transaction_id.as_deref(),
                        release_claims: false,
                    },
                )?
            };
            if !applied {
                // a decision landed between the read and the update
                let latest = reload(state, &current.id)?;
                if is_unheld_decline(&latest) {
                    return release_late_hold(state, &latest, &confirmation).await;
                }
                return Ok(ConfirmOutcome::Duplicate);
            }

            tracing::info!(reservation_id = %current.id, "payment hold confirmed");
            events::publish(state, &current, to);
            notify_provider(state, &current).await;
            Ok(ConfirmOutcome::Confirmed)
        }
        Step::AlreadyResolved if is_unheld_decline(&current) => {
            release_late_hold(state, &current, &confirmation).await
        }
        Step::AlreadyResolved | Step::Rejected(_) => {
            tracing::info!(
                reservation_id = %current.id,
                status = current.status.as_str(),
                "duplicate hold confirmation ignored"
            );
            Ok(ConfirmOutcome::Duplicate)
        }
    }
}

fn is_unheld_decline(reservation: &Reservation) -> bool {
    reservation.status == ReservationStatus::Declined && reservation.hold_reference.is_none()
}

async fn release_late_hold(
    state: &AppState,
    current: &Reservation,
    confirmation: &HoldConfirmation,
) -> Result<ConfirmOutcome, AppError> {
    let attached = {
        let db = state.db()?;
        queries::attach_late_hold(
            &db,
            &current.id,
            &confirmation.hold_reference,
            confirmation.transaction_id.as_deref(),
        )?
    };
    if !attached {
        return Ok(ConfirmOutcome::Duplicate);
    }

    tracing::warn!(reservation_id = %current.id, "hold confirmed after decline, voiding");
    settle(
        state,
        &current.id,
        Some(&confirmation.hold_reference),
        Resolution::Release,
    )
    .await?;
    Ok(ConfirmOutcome::LateHoldReleased)
}

/// Checkout abandoned or authorization refused upstream.
pub async fn deny_hold(state: &AppState, reservation_id: &str) -> Result<bool, AppError> {
    let current = {
        let db = state.db()?;
        queries::get_reservation(&db, reservation_id)?
    }
    .ok_or_else(|| {
        AppError::Integrity(format!("denial references unknown reservation {reservation_id}"))
    })?;

    let Step::Advance(to) = next_status(current.status, LifecycleEvent::HoldDenied) else {
        return Ok(false);
    };

    let applied = {
        let mut db = state.db()?;
        queries::apply_status_change(
            &mut db,
            &StatusChange {
                id: reservation_id,
                from: current.status,
                to,
                payment_state: PaymentState::HoldFailed,
                hold_reference: None,
                transaction_id: None,
                release_claims: true,
            },
        )?
    };

    if applied {
        tracing::info!(reservation_id = %reservation_id, "payment hold denied, slot released");
        events::publish(state, &current, to);
    }
    Ok(applied)
}

// ── Settlement ──

/// Captures or releases with retries. Failure leaves a `*_failed` payment
/// state for an operator retry instead of undoing the status change.
async fn settle(
    state: &AppState,
    reservation_id: &str,
    hold_reference: Option<&str>,
    resolution: Resolution,
) -> Result<(), AppError> {
    let (done, failed) = match resolution {
        Resolution::Capture => (PaymentState::Captured, PaymentState::CaptureFailed),
        Resolution::Release => (PaymentState::Released, PaymentState::ReleaseFailed),
    };

    let Some(hold) = hold_reference else {
        tracing::error!(
            reservation_id = %reservation_id,
            "no hold reference to {}",
            resolution.as_str()
        );
        let db = state.db()?;
        queries::record_settlement(&db, reservation_id, failed, None)?;
        return Ok(());
    };

    let result = retry_with_backoff(&state.config.settlement_retry, resolution.as_str(), || {
        state.payments.resolve(hold, resolution)
    })
    .await;

    let db = state.db()?;
    match result {
        Ok(reference) => {
            let capture_reference =
                (resolution == Resolution::Capture).then_some(reference.as_str());
            queries::record_settlement(&db, reservation_id, done, capture_reference)?;
            tracing::info!(
                reservation_id = %reservation_id,
                payment_state = done.as_str(),
                "payment settled"
            );
        }
        Err(e) => {
            tracing::error!(
                reservation_id = %reservation_id,
                error = %e,
                "payment {} failed, left for retry",
                resolution.as_str()
            );
            queries::record_settlement(&db, reservation_id, failed, None)?;
        }
    }
    Ok(())
}

/// Re-runs a failed capture or release. The payment state is claimed first
/// so concurrent retries cannot both reach the gateway.
pub async fn retry_settlement(
    state: &AppState,
    reservation_id: &str,
) -> Result<Reservation, AppError> {
    let current = reload(state, reservation_id)?;

    let (resolution, pending) = match current.payment_state {
        PaymentState::CaptureFailed => (Resolution::Capture, PaymentState::CapturePending),
        PaymentState::ReleaseFailed => (Resolution::Release, PaymentState::ReleasePending),
        other => {
            return Err(AppError::Conflict(format!(
                "nothing to retry, payment state is {}",
                other.as_str()
            )))
        }
    };

    let claimed = {
        let db = state.db()?;
        queries::claim_payment_state(&db, reservation_id, current.payment_state, pending)?
    };
    if !claimed {
        return Err(AppError::Conflict("settlement retry already in progress".to_string()));
    }

    settle(state, reservation_id, current.hold_reference.as_deref(), resolution).await?;
    reload(state, reservation_id)
}

// ── Expiry ──

/// Declines holds nobody completed and requests nobody decided on, past the
/// configured limits. Returns the ids that were expired.
pub async fn expire_stale(state: &AppState, now: NaiveDateTime) -> Result<Vec<String>, AppError> {
    let stale = {
        let db = state.db()?;
        let hold_cutoff = now - Duration::minutes(state.config.hold_ttl_minutes);
        let decision_cutoff = now - Duration::hours(state.config.decision_ttl_hours);
        let mut stale = queries::get_stale_reservations(
            &db,
            ReservationStatus::PendingApproval,
            &hold_cutoff,
        )?;
        stale.extend(queries::get_stale_reservations(
            &db,
            ReservationStatus::Pending,
            &decision_cutoff,
        )?);
        stale
    };

    let mut expired = Vec::new();
    for reservation in stale {
        let Step::Advance(to) = next_status(reservation.status, LifecycleEvent::Expire) else {
            continue;
        };
        let payment_state = if reservation.hold_reference.is_some() {
            PaymentState::ReleasePending
        } else {
            PaymentState::Released
        };

        let applied = {
            let mut db = state.db()?;
            queries::apply_status_change(
                &mut db,
                &StatusChange {
                    id: &reservation.id,
                    from: reservation.status,
                    to,
                    payment_state,
                    hold_reference: None,
                    transaction_id: None,
                    release_claims: true,
                },
            )?
        };
        if !applied {
            continue;
        }

        tracing::info!(
            reservation_id = %reservation.id,
            previous = reservation.status.as_str(),
            "reservation expired"
        );
        events::publish(state, &reservation, to);
        if let Some(hold) = reservation.hold_reference.as_deref() {
            settle(state, &reservation.id, Some(hold), Resolution::Release).await?;
        }
        expired.push(reservation.id);
    }

    Ok(expired)
}

fn reload(state: &AppState, reservation_id: &str) -> Result<Reservation, AppError> {
    let db = state.db()?;
    queries::get_reservation(&db, reservation_id)?
        .ok_or_else(|| AppError::NotFound(format!("reservation {reservation_id}")))
}

async fn notify_provider(state: &AppState, reservation: &Reservation) {
    let phone = match state.db().map(|db| queries::get_provider(&db, &reservation.provider_id)) {
        Ok(Ok(Some(provider))) => provider.contact_phone.filter(|p| !p.is_empty()),
        Ok(Ok(None)) => None,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "failed to load provider for notification");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to lock database for notification");
            None
        }
    };

    let Some(phone) = phone else {
        tracing::debug!(
            provider_id = %reservation.provider_id,
            "no contact phone, skipping notification"
        );
        return;
    };

    let message = format!(
        "New booking request: {} {}:00 ({}h), week of {}. Accept or decline it in your dashboard.",
        reservation.day.as_str(),
        reservation.start_hour,
        reservation.span,
        reservation.week_of.format("%Y-%m-%d"),
    );
    if let Err(e) = state.notifier.notify(&phone, &message).await {
        tracing::error!(
            error = %e,
            provider_id = %reservation.provider_id,
            "failed to notify provider"
        );
    }
}
