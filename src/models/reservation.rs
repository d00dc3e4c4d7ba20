use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::grid::Day;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub provider_id: String,
    pub client_id: String,
    pub week_of: NaiveDate,
    pub day: Day,
    pub start_hour: i64,
    pub span: i64,
    pub service_key: Option<String>,
    pub service_name: Option<String>,
    pub duration_minutes: i64,
    pub buffer_before_minutes: i64,
    pub buffer_after_minutes: i64,
    pub status: ReservationStatus,
    pub payment_state: PaymentState,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub checkout_reference: Option<String>,
    pub hold_reference: Option<String>,
    pub capture_reference: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Reservation {
    pub fn hours(&self) -> impl Iterator<Item = i64> {
        self.start_hour..self.start_hour + self.span
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    PendingApproval,
    Pending,
    Accepted,
    Declined,
}

impl ReservationStatus {
    pub const ACTIVE: [ReservationStatus; 3] = [
        ReservationStatus::PendingApproval,
        ReservationStatus::Pending,
        ReservationStatus::Accepted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::PendingApproval => "pending_approval",
            ReservationStatus::Pending => "pending",
            ReservationStatus::Accepted => "accepted",
            ReservationStatus::Declined => "declined",
        }
    }

    /// Also accepts the legacy `booked` and `rejected` spellings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending_approval" => Some(ReservationStatus::PendingApproval),
            "pending" => Some(ReservationStatus::Pending),
            "accepted" | "booked" => Some(ReservationStatus::Accepted),
            "declined" | "rejected" => Some(ReservationStatus::Declined),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, ReservationStatus::Declined)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Accepted | ReservationStatus::Declined)
    }

    pub fn is_awaiting_decision(&self) -> bool {
        matches!(
            self,
            ReservationStatus::PendingApproval | ReservationStatus::Pending
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    None,
    CheckoutOpen,
    Held,
    CapturePending,
    Captured,
    CaptureFailed,
    ReleasePending,
    Released,
    ReleaseFailed,
    HoldFailed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::None => "none",
            PaymentState::CheckoutOpen => "checkout_open",
            PaymentState::Held => "held",
            PaymentState::CapturePending => "capture_pending",
            PaymentState::Captured => "captured",
            PaymentState::CaptureFailed => "capture_failed",
            PaymentState::ReleasePending => "release_pending",
            PaymentState::Released => "released",
            PaymentState::ReleaseFailed => "release_failed",
            PaymentState::HoldFailed => "hold_failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "checkout_open" => PaymentState::CheckoutOpen,
            "held" => PaymentState::Held,
            "capture_pending" => PaymentState::CapturePending,
            "captured" => PaymentState::Captured,
            "capture_failed" => PaymentState::CaptureFailed,
            "release_pending" => PaymentState::ReleasePending,
            "released" => PaymentState::Released,
            "release_failed" => PaymentState::ReleaseFailed,
            "hold_failed" => PaymentState::HoldFailed,
            _ => PaymentState::None,
        }
    }
}
