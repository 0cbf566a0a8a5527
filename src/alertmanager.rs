//! Inbound Alertmanager webhook deliveries: authentication and parsing.
//!
//! See https://prometheus.io/docs/alerting/latest/configuration/#webhook_config
//! for the payload format.

use crate::types::AlertOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("wrong Authorization header")]
    Unauthorized,
    #[error("invalid alert payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AlertManagerWebhook {
    pub version: String,
    #[serde(rename = "groupKey", default)]
    pub group_key: String,
    pub status: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(rename = "groupLabels", default)]
    pub group_labels: HashMap<String, String>,
    #[serde(rename = "commonLabels", default)]
    pub common_labels: HashMap<String, String>,
    #[serde(rename = "commonAnnotations", default)]
    pub common_annotations: HashMap<String, String>,
    #[serde(rename = "externalURL", default)]
    pub external_url: String,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

impl AlertManagerWebhook {
    pub fn outcome(&self) -> AlertOutcome {
        AlertOutcome::from_status(&self.status)
    }
}

/// A single alert of a delivery. The per-alert `status` is kept for logging
/// only; the batch status decides what happens.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Alert {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(rename = "startsAt", default)]
    pub starts_at: String,
    #[serde(rename = "endsAt", default)]
    pub ends_at: String,
    #[serde(rename = "generatorURL", default)]
    pub generator_url: String,
    #[serde(default)]
    pub fingerprint: String,
}

/// Checks the `Authorization` header against the shared secret.
///
/// Without a secret (or with an empty one) every delivery is accepted.
pub fn authorize(header: Option<&[u8]>, secret: Option<&str>) -> Result<(), IngestError> {
    let secret = match secret {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(()),
    };
    let expected = format!("Bearer {}", secret);
    match header {
        Some(value) if value == expected.as_bytes() => Ok(()),
        _ => Err(IngestError::Unauthorized),
    }
}

pub fn parse_webhook(body: &[u8]) -> Result<AlertManagerWebhook, IngestError> {
    Ok(serde_json::from_slice(body)?)
}
