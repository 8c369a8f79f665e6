//! Alerts and their notification text.
//!
//! An [`Alert`] is one observability alert picked up from the source. Its
//! `trx_id` is the dedup key used by the delivery ledger, derived from the
//! source id and the alert status only.

mod renderer;

pub use renderer::{
    escape_html, status_icon, truncate_escaped, AlertRenderer, DEFAULT_TIME_FORMAT,
    MAX_MESSAGE_CHARS,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Status value for an alert that is currently firing.
pub const STATUS_ACTIVE: &str = "active";
/// Status value for an alert that has cleared.
pub const STATUS_RECOVERED: &str = "recovered";

/// The fields of an alert as reported by the source, before identity is
/// attached.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlertFields {
    pub service_name: String,
    pub environment: String,
    pub category: String,
    pub rule_name: String,
    pub message: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// A candidate notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub trx_id: String,
    pub service_name: String,
    pub environment: String,
    pub category: String,
    pub rule_name: String,
    pub message: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Builds an alert and derives its dedup key from `alert_id` and the status.
    pub fn new(alert_id: impl Into<String>, fields: AlertFields) -> Self {
        let alert_id = alert_id.into();
        let trx_id = dedup_key(&alert_id, &fields.status);
        Self {
            alert_id,
            trx_id,
            service_name: fields.service_name,
            environment: fields.environment,
            category: fields.category,
            rule_name: fields.rule_name,
            message: fields.message,
            status: fields.status,
            timestamp: fields.timestamp,
        }
    }

    pub fn dedup_key(&self) -> &str {
        &self.trx_id
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// Hex SHA-256 over the source id and status, separated by a unit separator
/// byte so that `("ab", "c")` and `("a", "bc")` hash differently.
///
/// Two distinct alerts sharing id and status collide. That is accepted: they
/// are treated as the same delivery.
pub fn dedup_key(alert_id: &str, status: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(alert_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(status.as_bytes());
    hex::encode(hasher.finalize())
}
