//! Collected evidence and the per-run signal bus.
//!
//! Collectors are external; they hand the bus [`Signal`]s. Evaluators only
//! ever see a frozen [`SignalSnapshot`] through a [`SignalView`] limited to
//! the signals their control declares.

pub mod availability;
pub mod bus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use availability::{
    availability_matrix, execution_summary, AvailabilityStatus, SignalAvailability,
    SignalExecutionSummary,
};
pub use bus::{CacheStats, SignalBus, SignalCollector, SignalSnapshot, SignalView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Ok,
    /// The collector could not reach the data (permissions, missing provider).
    NotAvailable,
    Error,
}

/// One typed, timestamped unit of collected evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub status: SignalStatus,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Signal {
    pub fn with_items(id: impl Into<String>, items: Vec<serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            status: SignalStatus::Ok,
            items,
            raw: None,
            error: None,
            collected_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn with_raw(id: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            raw: Some(raw),
            ..Self::with_items(id, Vec::new())
        }
    }

    pub fn not_available(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: SignalStatus::NotAvailable,
            error: Some(reason.into()),
            ..Self::with_items(id, Vec::new())
        }
    }

    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: SignalStatus::Error,
            error: Some(message.into()),
            ..Self::with_items(id, Vec::new())
        }
    }

    pub fn collected_at(mut self, at: DateTime<Utc>) -> Self {
        self.collected_at = at;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == SignalStatus::Ok
    }

    /// Object payload if present, else the first item.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.raw.as_ref().or_else(|| self.items.first())
    }
}

/// Assessment scope the signals were collected for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_group_id: Option<String>,
    #[serde(default)]
    pub subscription_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl EvalScope {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn with_subscriptions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscription_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Short stable key; subscription order does not matter.
    pub fn key(&self) -> String {
        let mut subs: Vec<&str> = self.subscription_ids.iter().map(String::as_str).collect();
        subs.sort_unstable();
        subs.dedup();
        let material = format!(
            "{}|{}|{}|{}",
            self.tenant_id.as_deref().unwrap_or(""),
            self.management_group_id.as_deref().unwrap_or(""),
            subs.join(","),
            self.resource_group.as_deref().unwrap_or(""),
        );
        hex::encode(Sha256::digest(material.as_bytes()))[..16].to_string()
    }
}
