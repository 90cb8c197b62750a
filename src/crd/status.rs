//! Replication status shared by both intent kinds
//!
//! Status is owned by the reconciler. Users read it, never write it.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting overall readiness
pub const CONDITION_READY: &str = "Ready";

/// Reason recorded when a pass converged
pub const REASON_RECONCILED: &str = "Reconciled";

// =============================================================================
// Status
// =============================================================================

/// Observed replication status of an intent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationStatus {
    /// Conditions
    #[serde(default)]
    pub conditions: Vec<ReplicationCondition>,

    /// Last known-good uniform role reported by the backend
    #[serde(default)]
    pub observed_role: Option<String>,

    /// Raw backend state string from the most recent pass
    #[serde(default)]
    pub observed_native_state: Option<String>,

    /// Backend the native objects were last written to
    #[serde(default)]
    pub observed_backend: Option<String>,

    /// Generation of the spec the status was computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,

    /// Last time the backend reported a completed sync
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Duration of the last sync as reported by the backend
    #[serde(default)]
    pub last_sync_duration: Option<String>,
}

/// Condition for replication status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationCondition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Generation the condition was computed against
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl ReplicationCondition {
    /// Build a `Ready` condition stamped with the current time
    pub fn ready(
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: CONDITION_READY.to_string(),
            status,
            last_transition_time: Some(Utc::now()),
            reason: Some(reason.into()),
            message: Some(message.into()),
            observed_generation: generation,
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl ReplicationStatus {
    /// Set a condition, replacing existing if same type.
    ///
    /// The transition time of an existing condition is kept when its status
    /// does not change.
    pub fn set_condition(&mut self, mut condition: ReplicationCondition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, r#type: &str) -> Option<&ReplicationCondition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Check if the intent is ready
    pub fn is_ready(&self) -> bool {
        self.condition(CONDITION_READY)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    /// Reason of the `Ready` condition, if any
    pub fn ready_reason(&self) -> Option<&str> {
        self.condition(CONDITION_READY)
            .and_then(|c| c.reason.as_deref())
    }

    /// Message of the `Ready` condition, if any
    pub fn ready_message(&self) -> Option<&str> {
        self.condition(CONDITION_READY)
            .and_then(|c| c.message.as_deref())
    }
}
