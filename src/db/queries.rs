use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use crate::models::{Day, PaymentState, Provider, Reservation, ReservationStatus, ServiceOffering};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

const RESERVATION_COLUMNS: &str = "id, provider_id, client_id, week_of, day, start_hour, span, \
     service_key, service_name, duration_minutes, buffer_before_minutes, buffer_after_minutes, \
     status, payment_state, amount, currency, checkout_reference, hold_reference, \
     capture_reference, transaction_id, created_at, updated_at";

fn now_str() -> String {
    Utc::now().naive_utc().format(TS_FORMAT).to_string()
}

// ── Providers ──

pub fn get_provider(conn: &Connection, id: &str) -> anyhow::Result<Option<Provider>> {
    let row = conn
        .query_row(
            "SELECT id, display_name, contact_email, contact_phone, weekly_pattern,
                    date_overrides, services
             FROM providers WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, display_name, contact_email, contact_phone, weekly, overrides, services)) = row
    else {
        return Ok(None);
    };

    // Availability maps stay raw; they are parsed leniently at compose time.
    let weekly_pattern = serde_json::from_str(&weekly).unwrap_or(serde_json::Value::Null);
    let date_overrides = serde_json::from_str(&overrides).unwrap_or(serde_json::Value::Null);
    let services: BTreeMap<String, ServiceOffering> = match serde_json::from_str(&services) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(provider_id = %id, error = %e, "unreadable service catalog");
            BTreeMap::new()
        }
    };

    Ok(Some(Provider {
        id,
        display_name,
        contact_email,
        contact_phone,
        weekly_pattern,
        date_overrides,
        services,
    }))
}

pub fn save_provider(conn: &Connection, provider: &Provider) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO providers (id, display_name, contact_email, contact_phone,
                                weekly_pattern, date_overrides, services)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
           display_name = excluded.display_name,
           contact_email = excluded.contact_email,
           contact_phone = excluded.contact_phone,
           weekly_pattern = excluded.weekly_pattern,
           date_overrides = excluded.date_overrides,
           services = excluded.services,
           updated_at = datetime('now')",
        params![
            provider.id,
            provider.display_name,
            provider.contact_email,
            provider.contact_phone,
            serde_json::to_string(&provider.weekly_pattern)?,
            serde_json::to_string(&provider.date_overrides)?,
            serde_json::to_string(&provider.services)?,
        ],
    )?;
    Ok(())
}

// ── Reservations ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Created,
    Conflict,
}

/// Inserts the reservation and one claim row per covered hour in a single
/// immediate transaction. A taken hour rolls everything back.
pub fn insert_reservation(conn: &mut Connection, r: &Reservation) -> anyhow::Result<ClaimOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let week_of = r.week_of.format(DATE_FORMAT).to_string();

    tx.execute(
        &format!(
            "INSERT INTO reservations ({RESERVATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, \
             ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
        ),
        params![
            r.id,
            r.provider_id,
            r.client_id,
            week_of,
            r.day.as_str(),
            r.start_hour,
            r.span,
            r.service_key,
            r.service_name,
            r.duration_minutes,
            r.buffer_before_minutes,
            r.buffer_after_minutes,
            r.status.as_str(),
            r.payment_state.as_str(),
            r.amount,
            r.currency,
            r.checkout_reference,
            r.hold_reference,
            r.capture_reference,
            r.transaction_id,
            r.created_at.format(TS_FORMAT).to_string(),
            r.updated_at.format(TS_FORMAT).to_string(),
        ],
    )?;

    for hour in r.hours() {
        let inserted = tx.execute(
            "INSERT INTO slot_claims (provider_id, week_of, day, hour, reservation_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![r.provider_id, week_of, r.day.as_str(), hour, r.id],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Ok(ClaimOutcome::Conflict);
            }
            Err(e) => return Err(e.into()),
        }
    }

    tx.commit()?;
    Ok(ClaimOutcome::Created)
}

pub fn get_reservation(conn: &Connection, id: &str) -> anyhow::Result<Option<Reservation>> {
    let result = conn.query_row(
        &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?1"),
        params![id],
        |row| Ok(parse_reservation_row(row)),
    );

    match result {
        Ok(reservation) => Ok(Some(reservation?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Active reservations of one provider for one display week.
pub fn get_active_reservations_for_week(
    conn: &Connection,
    provider_id: &str,
    week_of: NaiveDate,
) -> anyhow::Result<Vec<Reservation>> {
    list_reservations(
        conn,
        &ReservationFilter {
            provider_id: Some(provider_id.to_string()),
            statuses: ReservationStatus::ACTIVE.to_vec(),
            week_of: Some(week_of),
            limit: i64::MAX,
            ..Default::default()
        },
    )
}

#[derive(Debug, Clone)]
pub struct ReservationFilter {
    pub provider_id: Option<String>,
    pub statuses: Vec<ReservationStatus>,
    pub week_of: Option<NaiveDate>,
    pub day: Option<Day>,
    pub since: Option<NaiveDateTime>,
    pub limit: i64,
}

impl Default for ReservationFilter {
    fn default() -> Self {
        Self {
            provider_id: None,
            statuses: Vec::new(),
            week_of: None,
            day: None,
            since: None,
            limit: 50,
        }
    }
}

pub fn list_reservations(
    conn: &Connection,
    filter: &ReservationFilter,
) -> anyhow::Result<Vec<Reservation>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(provider_id) = &filter.provider_id {
        params_vec.push(Box::new(provider_id.clone()));
        clauses.push(format!("provider_id = ?{}", params_vec.len()));
    }
    if !filter.statuses.is_empty() {
        let mut placeholders = Vec::new();
        for status in &filter.statuses {
            params_vec.push(Box::new(status.as_str()));
            placeholders.push(format!("?{}", params_vec.len()));
        }
        clauses.push(format!("status IN ({})", placeholders.join(", ")));
    }
    if let Some(week_of) = filter.week_of {
        params_vec.push(Box::new(week_of.format(DATE_FORMAT).to_string()));
        clauses.push(format!("week_of = ?{}", params_vec.len()));
    }
    if let Some(day) = filter.day {
        params_vec.push(Box::new(day.as_str()));
        clauses.push(format!("day = ?{}", params_vec.len()));
    }
    if let Some(since) = filter.since {
        params_vec.push(Box::new(since.format(TS_FORMAT).to_string()));
        clauses.push(format!("updated_at >= ?{}", params_vec.len()));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    params_vec.push(Box::new(filter.limit));
    let sql = format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations {where_sql} \
         ORDER BY week_of ASC, created_at ASC LIMIT ?{}",
        params_vec.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_refs.as_slice(), |row| Ok(parse_reservation_row(row)))?;

    let mut reservations = vec![];
    for row in rows {
        reservations.push(row??);
    }
    Ok(reservations)
}

/// Conditional status transition. Applies only while the row still has
/// `from`; optionally drops the slot claims in the same transaction.
pub struct StatusChange<'a> {
    pub id: &'a str,
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub payment_state: PaymentState,
    pub hold_reference: Option<&'a str>,
    pub transaction_id: Option<&'a str>,
    pub release_claims: bool,
}

pub fn apply_status_change(conn: &mut Connection, change: &StatusChange) -> anyhow::Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let count = tx.execute(
        "UPDATE reservations SET
           status = ?1,
           payment_state = ?2,
           hold_reference = COALESCE(?3, hold_reference),
           transaction_id = COALESCE(?4, transaction_id),
           updated_at = ?5
         WHERE id = ?6 AND status = ?7",
        params![
            change.to.as_str(),
            change.payment_state.as_str(),
            change.hold_reference,
            change.transaction_id,
            now_str(),
            change.id,
            change.from.as_str(),
        ],
    )?;

    if count == 1 && change.release_claims {
        tx.execute(
            "DELETE FROM slot_claims WHERE reservation_id = ?1",
            params![change.id],
        )?;
    }

    tx.commit()?;
    Ok(count == 1)
}

/// Moves `payment_state` from `from` to `to` only if it still equals `from`.
pub fn claim_payment_state(
    conn: &Connection,
    id: &str,
    from: PaymentState,
    to: PaymentState,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET payment_state = ?1, updated_at = ?2
         WHERE id = ?3 AND payment_state = ?4",
        params![to.as_str(), now_str(), id, from.as_str()],
    )?;
    Ok(count == 1)
}

pub fn record_checkout(
    conn: &Connection,
    id: &str,
    checkout_reference: &str,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET checkout_reference = ?1, payment_state = ?2, updated_at = ?3
         WHERE id = ?4 AND payment_state = ?5",
        params![
            checkout_reference,
            PaymentState::CheckoutOpen.as_str(),
            now_str(),
            id,
            PaymentState::None.as_str(),
        ],
    )?;
    Ok(count == 1)
}

/// Stores an authorization that arrived after the reservation was declined
/// and marks it for release. Only the first caller gets `true`.
pub fn attach_late_hold(
    conn: &Connection,
    id: &str,
    hold_reference: &str,
    transaction_id: Option<&str>,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE reservations SET hold_reference = ?1,
           transaction_id = COALESCE(?2, transaction_id),
           payment_state = ?3,
           updated_at = ?4
         WHERE id = ?5 AND status = ?6 AND hold_reference IS NULL",
        params![
            hold_reference,
            transaction_id,
            PaymentState::ReleasePending.as_str(),
            now_str(),
            id,
            ReservationStatus::Declined.as_str(),
        ],
    )?;
    Ok(count == 1)
}

pub fn record_settlement(
    conn: &Connection,
    id: &str,
    payment_state: PaymentState,
    capture_reference: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE reservations SET payment_state = ?1,
           capture_reference = COALESCE(?2, capture_reference),
           updated_at = ?3
         WHERE id = ?4",
        params![payment_state.as_str(), capture_reference, now_str(), id],
    )?;
    Ok(())
}

/// Reservations still in `status` whose last update is older than `cutoff`.
pub fn get_stale_reservations(
    conn: &Connection,
    status: ReservationStatus,
    cutoff: &NaiveDateTime,
) -> anyhow::Result<Vec<Reservation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations
         WHERE status = ?1 AND updated_at < ?2 ORDER BY updated_at ASC"
    ))?;
    let rows = stmt.query_map(
        params![status.as_str(), cutoff.format(TS_FORMAT).to_string()],
        |row| Ok(parse_reservation_row(row)),
    )?;

    let mut reservations = vec![];
    for row in rows {
        reservations.push(row??);
    }
    Ok(reservations)
}

pub fn count_claims(conn: &Connection, reservation_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM slot_claims WHERE reservation_id = ?1",
        params![reservation_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn parse_reservation_row(row: &rusqlite::Row) -> anyhow::Result<Reservation> {
    let week_of_str: String = row.get(3)?;
    let day_str: String = row.get(4)?;
    let status_str: String = row.get(12)?;
    let payment_state_str: String = row.get(13)?;
    let created_at_str: String = row.get(20)?;
    let updated_at_str: String = row.get(21)?;

    let week_of = NaiveDate::parse_from_str(&week_of_str, DATE_FORMAT)?;
    let day = Day::parse(&day_str).ok_or_else(|| anyhow::anyhow!("invalid day in row: {day_str}"))?;
    let status = ReservationStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("invalid status in row: {status_str}"))?;
    let created_at = NaiveDateTime::parse_from_str(&created_at_str, TS_FORMAT)
        .unwrap_or_else(|_| Utc::now().naive_utc());
    let updated_at = NaiveDateTime::parse_from_str(&updated_at_str, TS_FORMAT)
        .unwrap_or_else(|_| Utc::now().naive_utc());

    Ok(Reservation {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        client_id: row.get(2)?,
        week_of,
        day,
        start_hour: row.get(5)?,
        span: row.get(6)?,
        service_key: row.get(7)?,
        service_name: row.get(8)?,
        duration_minutes: row.get(9)?,
        buffer_before_minutes: row.get(10)?,
        buffer_after_minutes: row.get(11)?,
        status,
        payment_state: PaymentState::parse(&payment_state_str),
        amount: row.get(14)?,
        currency: row.get(15)?,
        checkout_reference: row.get(16)?,
        hold_reference: row.get(17)?,
        capture_reference: row.get(18)?,
        transaction_id: row.get(19)?,
        created_at,
        updated_at,
    })
}
