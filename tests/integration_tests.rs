use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

use cleanbook::auth::issue_token;
use cleanbook::config::AppConfig;
use cleanbook::db;
use cleanbook::db::queries;
use cleanbook::handlers;
use cleanbook::models::{PaymentState, Provider, ReservationStatus};
use cleanbook::services::messaging::Notifier;
use cleanbook::services::payments::{sign_payload, CheckoutHold, PaymentProvider, Resolution};
use cleanbook::services::retry::RetryConfig;
use cleanbook::state::AppState;

const ADMIN_TOKEN: &str = "test-admin";
const SESSION_SECRET: &str = "test-session-secret";
const WEBHOOK_SECRET: &str = "test-webhook-secret";
const PROVIDER_PHONE: &str = "+15550001111";

// ── Mock Providers ──

#[derive(Default)]
struct PaymentLog {
    captures: AtomicUsize,
    releases: AtomicUsize,
    fail_open: AtomicBool,
    fail_resolve: AtomicBool,
}

struct MockPayments {
    log: Arc<PaymentLog>,
}

#[async_trait]
impl PaymentProvider for MockPayments {
    async fn open_hold(
        &self,
        reservation_id: &str,
        _amount: i64,
        _currency: &str,
    ) -> anyhow::Result<CheckoutHold> {
        if self.log.fail_open.load(Ordering::SeqCst) {
            anyhow::bail!("gateway unavailable");
        }
        Ok(CheckoutHold {
            checkout_reference: format!("ORDER-{reservation_id}"),
            approval_url: Some(format!("https://pay.example.test/approve/{reservation_id}")),
        })
    }

    async fn resolve(
        &self,
        hold_reference: &str,
        resolution: Resolution,
    ) -> anyhow::Result<String> {
        if self.log.fail_resolve.load(Ordering::SeqCst) {
            anyhow::bail!("gateway unavailable");
        }
        match resolution {
            Resolution::Capture => self.log.captures.fetch_add(1, Ordering::SeqCst),
            Resolution::Release => self.log.releases.fetch_add(1, Ordering::SeqCst),
        };
        Ok(format!("CAP-{hold_reference}"))
    }
}

struct MockNotifier {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

// ── Helpers ──

struct Harness {
    state: Arc<AppState>,
    payments: Arc<PaymentLog>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        admin_token: ADMIN_TOKEN.to_string(),
        session_secret: SESSION_SECRET.to_string(),
        payment_api_base: "http://localhost:0".to_string(),
        payment_client_id: "".to_string(),
        payment_client_secret: "".to_string(),
        payment_webhook_secret: WEBHOOK_SECRET.to_string(),
        payment_currency: "USD".to_string(),
        twilio_account_sid: "".to_string(),
        twilio_auth_token: "".to_string(),
        twilio_phone_number: "".to_string(),
        hold_ttl_minutes: 60,
        decision_ttl_hours: 72,
        settlement_retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(2),
        },
    }
}

fn harness_with(config: AppConfig) -> Harness {
    let conn = db::init_db(":memory:").unwrap();
    let payments = Arc::new(PaymentLog::default());
    let sent = Arc::new(Mutex::new(vec![]));
    let (events_tx, _) = broadcast::channel(64);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config,
        payments: Box::new(MockPayments {
            log: Arc::clone(&payments),
        }),
        notifier: Box::new(MockNotifier {
            sent: Arc::clone(&sent),
        }),
        events_tx,
    });
    seed_provider(&state);

    Harness {
        state,
        payments,
        sent,
    }
}

fn harness() -> Harness {
    harness_with(test_config())
}

fn seed_provider(state: &AppState) {
    let provider = Provider {
        id: "prov-1".to_string(),
        display_name: "Sparkle Cleaning".to_string(),
        contact_email: Some("owner@sparkle.test".to_string()),
        contact_phone: Some(PROVIDER_PHONE.to_string()),
        weekly_pattern: json!({
            "monday": {"10": true, "11": false},
            "tuesday": {"14": true, "15": true},
            "wednesday": {"9": true, "10": true, "11": true, "12": true},
        }),
        date_overrides: json!({}),
        services: serde_json::from_value(json!({
            "standard": {"name": "Standard clean", "duration_minutes": 60},
            "deep": {"name": "Deep clean", "duration_minutes": 90, "buffer_before_minutes": 15},
        }))
        .unwrap(),
    };
    let db = state.db.lock().unwrap();
    queries::save_provider(&db, &provider).unwrap();
}

fn user_token(user_id: &str) -> String {
    issue_token(SESSION_SECRET, user_id).unwrap()
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
    let res = handlers::router(state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn create(
    state: &Arc<AppState>,
    client: &str,
    day: &str,
    hour: i64,
    service: &str,
) -> (StatusCode, Value) {
    let body = json!({
        "provider_id": "prov-1",
        "day": day,
        "start_hour": hour,
        "service_key": service,
        "amount": 4500,
    });
    send(
        state,
        json_request("POST", "/api/reservations", Some(&user_token(client)), body),
    )
    .await
}

async fn create_ok(state: &Arc<AppState>, day: &str, hour: i64, service: &str) -> String {
    let (status, json) = create(state, "client-1", day, hour, service).await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["id"].as_str().unwrap().to_string()
}

fn webhook_request(body: &Value, signature: Option<String>) -> Request<Body> {
    let raw = body.to_string();
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/payments")
        .header("Content-Type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("X-Payment-Signature", signature);
    }
    builder.body(Body::from(raw)).unwrap()
}

async fn confirm_hold(state: &Arc<AppState>, reservation_id: &str) -> (StatusCode, Value) {
    let body = json!({
        "event_type": "hold.confirmed",
        "reservation_id": reservation_id,
        "hold_reference": format!("AUTH-{reservation_id}"),
        "transaction_id": "TX-1",
    });
    let signature = sign_payload(WEBHOOK_SECRET, body.to_string().as_bytes()).unwrap();
    send(state, webhook_request(&body, Some(signature))).await
}

async fn decide(
    state: &Arc<AppState>,
    reservation_id: &str,
    action: &str,
    token: &str,
) -> (StatusCode, Value) {
    send(
        state,
        json_request(
            "POST",
            &format!("/api/reservations/{reservation_id}/{action}"),
            Some(token),
            json!({}),
        ),
    )
    .await
}

fn stored(state: &AppState, reservation_id: &str) -> cleanbook::models::Reservation {
    let db = state.db.lock().unwrap();
    queries::get_reservation(&db, reservation_id).unwrap().unwrap()
}

async fn dashboard(state: &Arc<AppState>) -> Value {
    let (status, json) = send(
        state,
        get_request("/api/provider/dashboard", Some(&user_token("prov-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    json
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, json) = send(&h.state, get_request("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

// ── Composition & public projection ──

#[tokio::test]
async fn test_public_availability_free_cell() {
    let h = harness();
    let res = handlers::router(h.state.clone())
        .oneshot(get_request("/api/providers/prov-1/availability", None))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CACHE_CONTROL], "no-store");

    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["days"][0]["day"], "monday");
    assert_eq!(json["days"][0]["hours"]["10"], "available");
    assert_eq!(json["days"][0]["hours"]["11"], "unavailable");
    assert_eq!(json["days"][0]["hours"]["7"], "unavailable");
    assert_eq!(json["reservations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_public_availability_hides_private_fields() {
    let h = harness();
    let id = create_ok(&h.state, "wednesday", 9, "standard").await;
    confirm_hold(&h.state, &id).await;

    let (status, json) =
        send(&h.state, get_request("/api/providers/prov-1/availability", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["days"][2]["hours"]["9"], "pending");

    let reservations = json["reservations"].as_array().unwrap();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0]["service_name"], "Standard clean");
    assert_eq!(reservations[0]["status"], "pending");
    assert!(reservations[0].get("id").is_none());

    let raw = json.to_string();
    assert!(!raw.contains(&id));
    assert!(!raw.contains("client-1"));
    assert!(!raw.contains("AUTH-"));
    assert!(!raw.contains(PROVIDER_PHONE));
}

#[tokio::test]
async fn test_public_availability_filters_and_limit() {
    let h = harness();
    create_ok(&h.state, "wednesday", 9, "standard").await;
    create_ok(&h.state, "wednesday", 11, "standard").await;

    let (_, json) = send(
        &h.state,
        get_request("/api/providers/prov-1/availability?limit=1", None),
    )
    .await;
    assert_eq!(json["reservations"].as_array().unwrap().len(), 1);

    let (_, json) = send(
        &h.state,
        get_request("/api/providers/prov-1/availability?status=accepted", None),
    )
    .await;
    assert_eq!(json["reservations"].as_array().unwrap().len(), 0);

    let (_, json) = send(
        &h.state,
        get_request("/api/providers/prov-1/availability?day=tue", None),
    )
    .await;
    assert_eq!(json["reservations"].as_array().unwrap().len(), 0);

    let (status, _) = send(
        &h.state,
        get_request("/api/providers/prov-1/availability?status=bogus", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_public_availability_unknown_provider() {
    let h = harness();
    let (status, _) = send(&h.state, get_request("/api/providers/nobody/availability", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Create ──

#[tokio::test]
async fn test_create_returns_pending_approval() {
    let h = harness();
    let (status, json) = create(&h.state, "client-1", "monday", 10, "standard").await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    assert_eq!(json["status"], "pending_approval");
    assert_eq!(json["payment_state"], "checkout_open");
    assert_eq!(json["span"], 1);
    assert!(json["approval_url"].as_str().unwrap().contains("approve"));

    let id = json["id"].as_str().unwrap();
    let r = stored(&h.state, id);
    assert_eq!(r.checkout_reference.as_deref(), Some(format!("ORDER-{id}").as_str()));
    assert_eq!(r.amount, 4500);
}

#[tokio::test]
async fn test_create_requires_auth() {
    let h = harness();
    let body = json!({"provider_id": "prov-1", "day": "monday", "start_hour": 10, "amount": 4500});
    let (status, _) =
        send(&h.state, json_request("POST", "/api/reservations", None, body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &h.state,
        json_request("POST", "/api/reservations", Some("client-1.forged"), body),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_span_blocked_by_unavailable_hour() {
    // 90 min + 15 min buffer = 2 cells, and monday 11 is unavailable
    let h = harness();
    let (status, json) = create(&h.state, "client-1", "monday", 10, "deep").await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");

    let db = h.state.db.lock().unwrap();
    let all = queries::list_reservations(&db, &Default::default()).unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let h = harness();
    let (status, _) = create(&h.state, "client-1", "funday", 10, "standard").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create(&h.state, "client-1", "monday", 19, "deep").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create(&h.state, "client-1", "monday", 10, "window-washing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"provider_id": "nobody", "day": "monday", "start_hour": 10, "amount": 4500});
    let (status, _) = send(
        &h.state,
        json_request("POST", "/api/reservations", Some(&user_token("client-1")), body),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_taken_slot_conflicts() {
    let h = harness();
    create_ok(&h.state, "wednesday", 10, "standard").await;
    let (status, json) = create(&h.state, "client-2", "wednesday", 10, "standard").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("just taken"));
}

#[tokio::test]
async fn test_concurrent_creates_only_one_wins() {
    let h = harness();

    let mut handles = Vec::new();
    for client in ["client-1", "client-2", "client-3"] {
        let state = h.state.clone();
        handles.push(tokio::spawn(async move {
            create(&state, client, "wednesday", 10, "standard").await.0
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 2);
}

#[tokio::test]
async fn test_hold_open_failure_releases_slot() {
    let h = harness();
    h.payments.fail_open.store(true, Ordering::SeqCst);
    let (status, _) = create(&h.state, "client-1", "wednesday", 10, "standard").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    {
        let db = h.state.db.lock().unwrap();
        let all = queries::list_reservations(&db, &Default::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ReservationStatus::Declined);
        assert_eq!(all[0].payment_state, PaymentState::HoldFailed);
    }

    h.payments.fail_open.store(false, Ordering::SeqCst);
    create_ok(&h.state, "wednesday", 10, "standard").await;
}

// ── Webhook ──

#[tokio::test]
async fn test_confirm_hold_moves_to_pending_and_notifies() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;

    let (status, json) = confirm_hold(&h.state, &id).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["outcome"], "confirmed");

    let r = stored(&h.state, &id);
    assert_eq!(r.status, ReservationStatus::Pending);
    assert_eq!(r.payment_state, PaymentState::Held);
    assert_eq!(r.hold_reference.as_deref(), Some(format!("AUTH-{id}").as_str()));
    assert_eq!(r.transaction_id.as_deref(), Some("TX-1"));

    let sent = h.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, PROVIDER_PHONE);
    assert!(sent[0].1.contains("monday 10:00"));
}

#[tokio::test]
async fn test_duplicate_confirmation_is_noop() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;

    let (status, _) = confirm_hold(&h.state, &id).await;
    assert_eq!(status, StatusCode::OK);
    let first = stored(&h.state, &id);

    let (status, json) = confirm_hold(&h.state, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "duplicate");

    let second = stored(&h.state, &id);
    assert_eq!(second.status, ReservationStatus::Pending);
    assert_eq!(second.updated_at, first.updated_at);
    assert_eq!(h.sent.lock().unwrap().len(), 1);

    let db = h.state.db.lock().unwrap();
    assert_eq!(queries::list_reservations(&db, &Default::default()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    let body = json!({
        "event_type": "hold.confirmed",
        "reservation_id": id,
        "hold_reference": "AUTH-1",
    });

    let (status, _) = send(&h.state, webhook_request(&body, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let forged = sign_payload("wrong-secret", body.to_string().as_bytes()).unwrap();
    let (status, _) = send(&h.state, webhook_request(&body, Some(forged))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(stored(&h.state, &id).status, ReservationStatus::PendingApproval);
}

#[tokio::test]
async fn test_webhook_rejected_without_secret() {
    let mut config = test_config();
    config.payment_webhook_secret = String::new();
    let h = harness_with(config);
    let id = create_ok(&h.state, "monday", 10, "standard").await;

    let body = json!({
        "event_type": "hold.confirmed",
        "reservation_id": id,
        "hold_reference": "AUTH-1",
    });
    let signature = sign_payload("anything", body.to_string().as_bytes()).unwrap();
    let (status, _) = send(&h.state, webhook_request(&body, Some(signature))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_unknown_reservation_and_mismatch() {
    let h = harness();
    let (status, _) = confirm_hold(&h.state, "does-not-exist").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let id = create_ok(&h.state, "monday", 10, "standard").await;
    confirm_hold(&h.state, &id).await;

    let body = json!({
        "event_type": "hold.confirmed",
        "reservation_id": id,
        "hold_reference": "AUTH-someone-else",
    });
    let signature = sign_payload(WEBHOOK_SECRET, body.to_string().as_bytes()).unwrap();
    let (status, _) = send(&h.state, webhook_request(&body, Some(signature))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_ignores_unknown_event_type() {
    let h = harness();
    let body = json!({"event_type": "order.updated", "reservation_id": "whatever"});
    let signature = sign_payload(WEBHOOK_SECRET, body.to_string().as_bytes()).unwrap();
    let (status, json) = send(&h.state, webhook_request(&body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ignored"], true);
}

#[tokio::test]
async fn test_hold_denied_frees_slot() {
    let h = harness();
    let id = create_ok(&h.state, "wednesday", 10, "standard").await;

    let body = json!({"event_type": "hold.denied", "reservation_id": id});
    let signature = sign_payload(WEBHOOK_SECRET, body.to_string().as_bytes()).unwrap();
    let (status, json) = send(&h.state, webhook_request(&body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["applied"], true);

    let r = stored(&h.state, &id);
    assert_eq!(r.status, ReservationStatus::Declined);
    assert_eq!(r.payment_state, PaymentState::HoldFailed);

    create_ok(&h.state, "wednesday", 10, "standard").await;
}

#[tokio::test]
async fn test_late_hold_after_decline_is_voided() {
    let h = harness();
    let id = create_ok(&h.state, "wednesday", 10, "standard").await;

    let (status, _) = decide(&h.state, &id, "decline", &user_token("prov-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.payments.releases.load(Ordering::SeqCst), 0);

    let (status, json) = confirm_hold(&h.state, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "late_hold_released");
    assert_eq!(h.payments.releases.load(Ordering::SeqCst), 1);

    let (_, json) = confirm_hold(&h.state, &id).await;
    assert_eq!(json["outcome"], "duplicate");
    assert_eq!(h.payments.releases.load(Ordering::SeqCst), 1);

    let r = stored(&h.state, &id);
    assert_eq!(r.status, ReservationStatus::Declined);
    assert_eq!(r.payment_state, PaymentState::Released);
}

// ── Provider decisions ──

#[tokio::test]
async fn test_accept_is_idempotent_and_captures_once() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    confirm_hold(&h.state, &id).await;

    let provider = user_token("prov-1");
    let (status, json) = decide(&h.state, &id, "accept", &provider).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["payment_state"], "captured");
    assert_eq!(json["applied"], true);
    assert_eq!(json["dashboard"]["view"]["days"][0]["hours"]["10"]["state"], "booked");
    assert_eq!(json["dashboard"]["view"]["days"][0]["hours"]["10"]["reservation_id"], id.as_str());

    let (status, json) = decide(&h.state, &id, "accept", &provider).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["applied"], false);

    assert_eq!(h.payments.captures.load(Ordering::SeqCst), 1);
    let r = stored(&h.state, &id);
    assert_eq!(r.capture_reference.as_deref(), Some(format!("CAP-AUTH-{id}").as_str()));
}

#[tokio::test]
async fn test_concurrent_accepts_capture_once() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    confirm_hold(&h.state, &id).await;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let state = h.state.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            decide(&state, &id, "accept", &user_token("prov-1")).await.0
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(h.payments.captures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accept_before_hold_confirmed_conflicts() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    let (status, _) = decide(&h.state, &id, "accept", &user_token("prov-1")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(stored(&h.state, &id).status, ReservationStatus::PendingApproval);
}

#[tokio::test]
async fn test_decision_requires_owner() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    confirm_hold(&h.state, &id).await;

    let (status, _) = decide(&h.state, &id, "accept", &user_token("client-1")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &h.state,
        json_request("POST", &format!("/api/reservations/{id}/accept"), None, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = decide(&h.state, "missing", "accept", &user_token("prov-1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // admins may act for any provider
    let (status, _) = decide(&h.state, &id, "decline", ADMIN_TOKEN).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_decline_restores_availability() {
    let h = harness();
    let id = create_ok(&h.state, "tuesday", 14, "deep").await;
    confirm_hold(&h.state, &id).await;

    let before = dashboard(&h.state).await;
    assert_eq!(before["view"]["days"][1]["hours"]["14"]["state"], "pending");
    assert_eq!(before["view"]["days"][1]["hours"]["15"]["state"], "pending");
    assert_eq!(before["awaiting"].as_array().unwrap().len(), 1);

    let (status, json) = decide(&h.state, &id, "decline", &user_token("prov-1")).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["status"], "declined");
    assert_eq!(json["payment_state"], "released");

    let tuesday = &json["dashboard"]["view"]["days"][1]["hours"];
    assert_eq!(tuesday["14"]["state"], "available");
    assert_eq!(tuesday["15"]["state"], "available");
    assert_eq!(json["dashboard"]["awaiting"].as_array().unwrap().len(), 0);

    assert_eq!(h.payments.releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.payments.captures.load(Ordering::SeqCst), 0);

    let (status, _) = decide(&h.state, &id, "accept", &user_token("prov-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored(&h.state, &id).status, ReservationStatus::Declined);
}

#[tokio::test]
async fn test_capture_failure_then_retry() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    confirm_hold(&h.state, &id).await;

    h.payments.fail_resolve.store(true, Ordering::SeqCst);
    let (status, json) = decide(&h.state, &id, "accept", &user_token("prov-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["payment_state"], "capture_failed");

    let retry_uri = format!("/api/admin/reservations/{id}/retry-settlement");
    let provider_token = user_token("prov-1");
    let (status, _) = send(
        &h.state,
        json_request("POST", &retry_uri, Some(&provider_token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    h.payments.fail_resolve.store(false, Ordering::SeqCst);
    let (status, json) = send(
        &h.state,
        json_request("POST", &retry_uri, Some(ADMIN_TOKEN), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["payment_state"], "captured");
    assert_eq!(h.payments.captures.load(Ordering::SeqCst), 1);

    let (status, _) = send(
        &h.state,
        json_request("POST", &retry_uri, Some(ADMIN_TOKEN), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ── Dashboard & events ──

#[tokio::test]
async fn test_dashboard_is_scoped_to_provider() {
    let h = harness();
    let (status, _) = send(
        &h.state,
        get_request("/api/provider/dashboard?provider_id=prov-1", Some(&user_token("prov-2"))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &h.state,
        get_request("/api/provider/dashboard?provider_id=prov-1", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["provider_id"], "prov-1");

    let (status, _) = send(&h.state, get_request("/api/provider/dashboard", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_transitions_publish_events() {
    let h = harness();
    let mut rx = h.state.events_tx.subscribe();

    let id = create_ok(&h.state, "monday", 10, "standard").await;
    confirm_hold(&h.state, &id).await;
    decide(&h.state, &id, "accept", &user_token("prov-1")).await;

    let statuses: Vec<ReservationStatus> = (0..3).map(|_| rx.try_recv().unwrap().status).collect();
    assert_eq!(
        statuses,
        vec![
            ReservationStatus::PendingApproval,
            ReservationStatus::Pending,
            ReservationStatus::Accepted,
        ]
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_event_stream_requires_token() {
    let h = harness();
    let (status, _) = send(&h.state, get_request("/api/provider/events", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Calendar ──

#[tokio::test]
async fn test_calendar_export() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    confirm_hold(&h.state, &id).await;
    let uri = format!("/api/reservations/{id}/calendar.ics");

    let (status, _) = send(&h.state, get_request(&uri, Some(&user_token("client-1")))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    decide(&h.state, &id, "accept", &user_token("prov-1")).await;

    let res = handlers::router(h.state.clone())
        .oneshot(get_request(&uri, Some(&user_token("client-1"))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "text/calendar; charset=utf-8");
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let ics = String::from_utf8(body.to_vec()).unwrap();
    assert!(ics.contains("SUMMARY:Standard clean with Sparkle Cleaning"));
    assert!(ics.contains(&format!("UID:{id}@cleanbook")));

    let (status, _) = send(&h.state, get_request(&uri, Some(&user_token("stranger")))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ── Admin ──

#[tokio::test]
async fn test_admin_upsert_provider() {
    let h = harness();
    let body = json!({
        "display_name": "Tidy Homes",
        "contact_phone": "+15550002222",
        "weekly_pattern": {"friday": {"8": true, "9": "available", "10": "unavailable"}},
        "services": {"basic": {"name": "Basic", "duration_minutes": 45}},
    });

    let (status, _) = send(
        &h.state,
        json_request(
            "PUT",
            "/api/admin/providers/prov-2",
            Some(&user_token("prov-2")),
            body.clone(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &h.state,
        json_request("PUT", "/api/admin/providers/prov-2", Some(ADMIN_TOKEN), body),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["display_name"], "Tidy Homes");

    let (_, json) = send(&h.state, get_request("/api/providers/prov-2/availability", None)).await;
    let friday = &json["days"][4]["hours"];
    assert_eq!(friday["8"], "available");
    assert_eq!(friday["9"], "available");
    assert_eq!(friday["10"], "unavailable");

    let bad = json!({"display_name": "X", "weekly_pattern": [1, 2, 3]});
    let (status, _) = send(
        &h.state,
        json_request("PUT", "/api/admin/providers/prov-3", Some(ADMIN_TOKEN), bad),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_rejects_out_of_range_service_minutes() {
    let h = harness();
    let service = |minutes: Value| {
        json!({
            "display_name": "Tidy Homes",
            "services": {"basic": {"name": "Basic", "duration_minutes": minutes}},
        })
    };

    for minutes in [json!(i64::MAX), json!(-30), json!(781)] {
        let (status, json) = send(
            &h.state,
            json_request("PUT", "/api/admin/providers/prov-2", Some(ADMIN_TOKEN), service(minutes)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");
    }

    let buffered = json!({
        "display_name": "Tidy Homes",
        "services": {"basic": {"name": "Basic", "buffer_after_minutes": -1}},
    });
    let (status, _) = send(
        &h.state,
        json_request("PUT", "/api/admin/providers/prov-2", Some(ADMIN_TOKEN), buffered),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &h.state,
        json_request("PUT", "/api/admin/providers/prov-2", Some(ADMIN_TOKEN), service(json!(780))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
}

#[tokio::test]
async fn test_oversized_stored_service_is_rejected_without_breaking_state() {
    let h = harness();
    {
        let db = h.state.db.lock().unwrap();
        let mut provider = queries::get_provider(&db, "prov-1").unwrap().unwrap();
        provider.services.insert(
            "marathon".to_string(),
            serde_json::from_value(json!({
                "name": "Marathon",
                "duration_minutes": i64::MAX,
                "buffer_before_minutes": i64::MAX,
                "buffer_after_minutes": i64::MAX,
            }))
            .unwrap(),
        );
        queries::save_provider(&db, &provider).unwrap();
    }

    let (status, json) = create(&h.state, "client-1", "wednesday", 9, "marathon").await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{json}");

    assert!(h.state.db.lock().is_ok());
    create_ok(&h.state, "wednesday", 9, "standard").await;
}

#[tokio::test]
async fn test_admin_list_reservations() {
    let h = harness();
    let id = create_ok(&h.state, "monday", 10, "standard").await;
    create_ok(&h.state, "wednesday", 9, "standard").await;
    confirm_hold(&h.state, &id).await;

    let (status, json) = send(
        &h.state,
        get_request("/api/admin/reservations?provider_id=prov-1&status=pending", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id.as_str());

    let (status, _) = send(
        &h.state,
        get_request("/api/admin/reservations", Some(&user_token("prov-1"))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expire_sweep() {
    let h = harness();
    let stale_hold = create_ok(&h.state, "monday", 10, "standard").await;
    let stale_decision = create_ok(&h.state, "wednesday", 9, "standard").await;
    let fresh = create_ok(&h.state, "wednesday", 11, "standard").await;
    confirm_hold(&h.state, &stale_decision).await;

    {
        let db = h.state.db.lock().unwrap();
        db.execute(
            "UPDATE reservations SET updated_at = '2000-01-01 00:00:00' WHERE id IN (?1, ?2)",
            rusqlite::params![stale_hold, stale_decision],
        )
        .unwrap();
    }

    let (status, json) = send(
        &h.state,
        json_request("POST", "/api/admin/reservations/expire", Some(ADMIN_TOKEN), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    let expired: Vec<&str> = json["expired"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(expired.len(), 2);
    assert!(expired.contains(&stale_hold.as_str()));
    assert!(expired.contains(&stale_decision.as_str()));

    assert_eq!(stored(&h.state, &stale_hold).status, ReservationStatus::Declined);
    assert_eq!(stored(&h.state, &stale_hold).payment_state, PaymentState::Released);
    assert_eq!(stored(&h.state, &stale_decision).payment_state, PaymentState::Released);
    assert_eq!(stored(&h.state, &fresh).status, ReservationStatus::PendingApproval);
    assert_eq!(h.payments.releases.load(Ordering::SeqCst), 1);

    create_ok(&h.state, "monday", 10, "standard").await;
}
