use std::env;

use crate::services::retry::RetryConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub session_secret: String,
    pub payment_api_base: String,
    pub payment_client_id: String,
    pub payment_client_secret: String,
    pub payment_webhook_secret: String,
    pub payment_currency: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub hold_ttl_minutes: i64,
    pub decision_ttl_hours: i64,
    pub settlement_retry: RetryConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "cleanbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_default(),
            session_secret: env::var("SESSION_SECRET").unwrap_or_default(),
            payment_api_base: env::var("PAYMENT_API_BASE")
                .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
            payment_client_id: env::var("PAYMENT_CLIENT_ID").unwrap_or_default(),
            payment_client_secret: env::var("PAYMENT_CLIENT_SECRET").unwrap_or_default(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            payment_currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            hold_ttl_minutes: env::var("HOLD_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            decision_ttl_hours: env::var("DECISION_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(72),
            settlement_retry: RetryConfig::default(),
        }
    }
}
