//! Domain types for deploywatch.
//!
//! These mirror what the deployment-tracking and fleet-inventory services
//! report: deployments, the instances they target, and the per-instance
//! lifecycle summaries. All types are serializable so collaborators can
//! decode them straight from JSON payloads.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a tracked deployment (e.g. `d-ABC123`).
pub type DeploymentId = String;

/// Bare instance identifier (e.g. `i-0123`).
pub type InstanceId = String;

/// Tag key holding an instance's display name.
pub const NAME_TAG: &str = "Name";

// ── Deployment ─────────────────────────────────────────────────────

/// A rollout tracked by the deployment service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub application: String,
    pub group: String,
    /// Lifecycle status as reported (`Created`, `InProgress`, `Succeeded`, ...).
    pub status: String,
}

// ── Instance ──────────────────────────────────────────────────────

/// A compute node described by the fleet-inventory service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Instance {
    pub id: InstanceId,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Opaque extra fields the inventory service returned.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Instance {
    /// Display name taken from the `Name` tag, empty when untagged.
    pub fn name(&self) -> &str {
        self.tags.get(NAME_TAG).map(String::as_str).unwrap_or("")
    }
}

// ── Status ────────────────────────────────────────────────────────

/// Status of an instance or of one lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
    Ready,
    Unknown,
    /// Any value this build does not know about, kept verbatim.
    Other(String),
}

impl InstanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
            Self::Ready => "Ready",
            Self::Unknown => "Unknown",
            Self::Other(s) => s,
        }
    }

    /// Whether the instance is still being worked on.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl From<String> for InstanceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => Self::Pending,
            "InProgress" => Self::InProgress,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Skipped" => Self::Skipped,
            "Ready" => Self::Ready,
            "Unknown" => Self::Unknown,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for InstanceStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<InstanceStatus> for String {
    fn from(status: InstanceStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blue/green role of an instance within a replacement deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceType {
    /// Part of the original environment.
    #[serde(alias = "BLUE", alias = "blue")]
    Blue,
    /// Part of the replacement environment.
    #[serde(alias = "GREEN", alias = "green")]
    Green,
}

impl InstanceType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Blue => "original",
            Self::Green => "replacement",
        }
    }
}

/// Serde helper for `StatusSummary::instance_type`: a role this build does
/// not know (or an empty string) reads as no role.
mod lenient_instance_type {
    use serde::{Deserialize, Deserializer};

    use super::InstanceType;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<InstanceType>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref() {
            Some("Blue" | "BLUE" | "blue") => Some(InstanceType::Blue),
            Some("Green" | "GREEN" | "green") => Some(InstanceType::Green),
            _ => None,
        })
    }
}

/// One timed step of an instance's deployment lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub name: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl LifecycleEvent {
    /// Whole seconds between start and end; 0 until both are known.
    pub fn duration_secs(&self) -> u64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).num_seconds().max(0) as u64,
            _ => 0,
        }
    }
}

/// Latest known lifecycle state of one instance within one deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSummary {
    /// Composite identifier, `<prefix>/<instance-id>`.
    pub instance_id: String,
    pub status: InstanceStatus,
    #[serde(default, deserialize_with = "lenient_instance_type::deserialize")]
    pub instance_type: Option<InstanceType>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lifecycle_events: Vec<LifecycleEvent>,
}

impl StatusSummary {
    /// Bare instance id extracted from the composite identifier.
    ///
    /// Returns `None` unless the identifier splits on `/` into exactly
    /// two parts.
    pub fn bare_instance_id(&self) -> Option<&str> {
        let mut parts = self.instance_id.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(id), None) => Some(id),
            _ => None,
        }
    }

    /// Sum of all lifecycle event durations, in seconds.
    pub fn total_duration_secs(&self) -> u64 {
        self.lifecycle_events.iter().map(LifecycleEvent::duration_secs).sum()
    }
}
