use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use cleanbook::config::AppConfig;
use cleanbook::db;
use cleanbook::handlers;
use cleanbook::services::messaging::twilio::TwilioNotifier;
use cleanbook::services::messaging::{LogNotifier, Notifier};
use cleanbook::services::payments::gateway::CheckoutGateway;
use cleanbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    if config.admin_token.is_empty() {
        tracing::warn!("ADMIN_TOKEN not set, admin endpoints are disabled");
    }
    if config.session_secret.is_empty() {
        tracing::warn!("SESSION_SECRET not set, only the admin token will authenticate");
    }
    if config.payment_webhook_secret.is_empty() {
        tracing::warn!("PAYMENT_WEBHOOK_SECRET not set, payment webhooks will be rejected");
    }

    let conn = db::init_db(&config.database_url)?;

    let payments = CheckoutGateway::new(
        config.payment_api_base.clone(),
        config.payment_client_id.clone(),
        config.payment_client_secret.clone(),
    );
    tracing::info!("using payment gateway at {}", config.payment_api_base);

    let notifier: Box<dyn Notifier> = if config.twilio_account_sid.is_empty() {
        tracing::info!("Twilio not configured, provider notifications go to the log");
        Box::new(LogNotifier)
    } else {
        Box::new(TwilioNotifier::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_phone_number.clone(),
        ))
    };

    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        payments: Box::new(payments),
        notifier,
        events_tx,
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
