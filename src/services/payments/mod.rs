pub mod gateway;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Checkout opened with the payment collaborator; funds are authorized
/// later, when the client completes it.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutHold {
    pub checkout_reference: String,
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Capture,
    Release,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Capture => "capture",
            Resolution::Release => "release",
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Opens an authorization-only hold. `reservation_id` travels with the
    /// checkout and comes back on the confirmation webhook.
    async fn open_hold(
        &self,
        reservation_id: &str,
        amount: i64,
        currency: &str,
    ) -> anyhow::Result<CheckoutHold>;

    /// Captures or voids an authorized hold. Returns the collaborator's
    /// reference for the capture/void. Repeating the call for the same
    /// hold must be safe.
    async fn resolve(&self, hold_reference: &str, resolution: Resolution) -> anyhow::Result<String>;
}

type HmacSha256 = Hmac<Sha256>;

pub fn sign_payload(secret: &str, payload: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid signing key: {e}"))?;
    mac.update(payload);
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64 HMAC-SHA256 signature over `payload`.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
