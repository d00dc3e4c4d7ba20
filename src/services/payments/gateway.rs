use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{CheckoutHold, PaymentProvider, Resolution};

/// REST checkout gateway: OAuth client credentials, orders created with an
/// AUTHORIZE intent, authorizations captured or voided later.
pub struct CheckoutGateway {
    api_base: String,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
}

impl CheckoutGateway {
    pub fn new(api_base: String, client_id: String, client_secret: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            client: reqwest::Client::new(),
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("failed to request payment gateway token")?
            .error_for_status()
            .context("payment gateway rejected credentials")?;

        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse token response")?;

        data["access_token"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing access_token in gateway response"))
    }
}

pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[async_trait]
impl PaymentProvider for CheckoutGateway {
    async fn open_hold(
        &self,
        reservation_id: &str,
        amount: i64,
        currency: &str,
    ) -> anyhow::Result<CheckoutHold> {
        let token = self.access_token().await?;

        let body = json!({
            "intent": "AUTHORIZE",
            "purchase_units": [{
                "reference_id": reservation_id,
                "custom_id": reservation_id,
                "amount": {
                    "currency_code": currency,
                    "value": format_minor_units(amount),
                },
            }],
        });

        let resp = self
            .client
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", format!("hold-{reservation_id}"))
            .json(&body)
            .send()
            .await
            .context("failed to create checkout order")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse checkout order response")?;

        if !status.is_success() {
            anyhow::bail!("checkout order error ({}): {}", status, data);
        }

        let checkout_reference = data["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing order id in gateway response"))?;

        let approval_url = data["links"].as_array().and_then(|links| {
            links
                .iter()
                .find(|l| l["rel"] == "approve" || l["rel"] == "payer-action")
                .and_then(|l| l["href"].as_str())
                .map(|s| s.to_string())
        });

        Ok(CheckoutHold {
            checkout_reference,
            approval_url,
        })
    }

    async fn resolve(
        &self,
        hold_reference: &str,
        resolution: Resolution,
    ) -> anyhow::Result<String> {
        let token = self.access_token().await?;
        let action = match resolution {
            Resolution::Capture => "capture",
            Resolution::Release => "void",
        };

        let resp = self
            .client
            .post(format!(
                "{}/v2/payments/authorizations/{}/{}",
                self.api_base, hold_reference, action
            ))
            .bearer_auth(&token)
            // same request id on retries so the gateway deduplicates
            .header("PayPal-Request-Id", format!("{action}-{hold_reference}"))
            .json(&json!({}))
            .send()
            .await
            .with_context(|| format!("failed to {action} authorization"))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(hold_reference.to_string());
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {action} response"))?;

        if !status.is_success() {
            anyhow::bail!("{action} error ({}): {}", status, data);
        }

        Ok(data["id"]
            .as_str()
            .unwrap_or(hold_reference)
            .to_string())
    }
}
