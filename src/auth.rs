use axum::http::HeaderMap;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::AppConfig;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True if the actor may act for `provider_id`.
    pub fn acts_for(&self, provider_id: &str) -> bool {
        self.is_admin() || self.id == provider_id
    }
}

fn user_mac(secret: &str, user_id: &str) -> anyhow::Result<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid session secret: {e}"))?;
    mac.update(user_id.as_bytes());
    Ok(mac)
}

/// Bearer token for `user_id`: `<user_id>.<base64url hmac>`.
pub fn issue_token(secret: &str, user_id: &str) -> anyhow::Result<String> {
    anyhow::ensure!(!secret.is_empty(), "session secret is not configured");
    anyhow::ensure!(
        !user_id.is_empty() && !user_id.contains('.'),
        "user id must be non-empty and contain no '.'"
    );
    let signature = user_mac(secret, user_id)?.finalize().into_bytes();
    Ok(format!(
        "{user_id}.{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature)
    ))
}

pub fn actor_from_token(token: &str, config: &AppConfig) -> Result<Actor, AppError> {
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    // empty admin token disables admin access
    if !config.admin_token.is_empty() && token == config.admin_token {
        return Ok(Actor {
            id: "admin".to_string(),
            role: Role::Admin,
        });
    }
    if config.session_secret.is_empty() {
        tracing::warn!("SESSION_SECRET not configured, rejecting user token");
        return Err(AppError::Unauthorized);
    }

    let (user_id, signature) = token.rsplit_once('.').ok_or(AppError::Unauthorized)?;
    let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AppError::Unauthorized)?;
    user_mac(&config.session_secret, user_id)?
        .verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    Ok(Actor {
        id: user_id.to_string(),
        role: Role::User,
    })
}

pub fn authenticate(headers: &HeaderMap, config: &AppConfig) -> Result<Actor, AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    actor_from_token(token, config)
}

pub fn require_admin(headers: &HeaderMap, config: &AppConfig) -> Result<Actor, AppError> {
    let actor = authenticate(headers, config)?;
    if !actor.is_admin() {
        return Err(AppError::Forbidden("admin access required".to_string()));
    }
    Ok(actor)
}
