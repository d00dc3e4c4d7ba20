use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::availability::Availability;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub display_name: String,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    /// Raw weekly pattern as stored on the profile.
    pub weekly_pattern: Value,
    /// Raw date overrides as stored on the profile.
    pub date_overrides: Value,
    pub services: BTreeMap<String, ServiceOffering>,
}

impl Provider {
    pub fn availability(&self) -> Availability {
        Availability::from_values(&self.weekly_pattern, &self.date_overrides)
    }

    pub fn service(&self, key: &str) -> Option<&ServiceOffering> {
        self.services.get(key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceOffering {
    pub name: String,
    #[serde(default)]
    pub duration_minutes: i64,
    #[serde(default)]
    pub buffer_before_minutes: i64,
    #[serde(default)]
    pub buffer_after_minutes: i64,
}
