//! Custom resource status owned by the operator
//!
//! The custom resource is schemaless; the operator owns the `status`
//! subtree and reads/writes it through these types.

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

use crate::release::StoredRelease;

/// Lifecycle phase of the applied release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourcePhase {
    #[default]
    #[serde(rename = "")]
    None,
    Applying,
    Applied,
    Failed,
}

/// Reason for the last phase transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionReason {
    #[default]
    Unknown,
    CustomResourceAdded,
    CustomResourceUpdated,
    ApplySuccessful,
    ApplyFailed,
}

/// Operator-owned status block of a watched custom resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// Last-known release snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<StoredRelease>,

    /// Current phase
    #[serde(default)]
    pub phase: ResourcePhase,

    /// Reason for the current phase
    #[serde(default)]
    pub reason: ConditionReason,

    /// Free-text message (e.g. rendered notes, error text)
    #[serde(default)]
    pub message: String,

    /// Updated on every status write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// Updated only when the phase changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl AppStatus {
    /// Set phase, reason and message; the transition timestamp only moves
    /// when the phase actually changes.
    pub fn set_phase(
        &mut self,
        phase: ResourcePhase,
        reason: ConditionReason,
        message: impl Into<String>,
    ) -> &mut Self {
        let now = Utc::now();
        self.last_update_time = Some(now);
        if self.phase != phase {
            self.phase = phase;
            self.last_transition_time = Some(now);
        }
        self.reason = reason;
        self.message = message.into();
        self
    }

    /// Record the release snapshot
    pub fn set_release(&mut self, release: Option<StoredRelease>) -> &mut Self {
        self.release = release;
        self
    }

    /// Safely extract the typed status block from a custom resource
    ///
    /// A missing status yields the default; an undecodable one yields a
    /// Failed status carrying the decode error.
    pub fn status_for(cr: &DynamicObject) -> AppStatus {
        match cr.data.get("status") {
            None | Some(serde_json::Value::Null) => AppStatus::default(),
            Some(raw) => match serde_json::from_value(raw.clone()) {
                Ok(status) => status,
                Err(e) => {
                    let mut status = AppStatus::default();
                    status.set_phase(
                        ResourcePhase::Failed,
                        ConditionReason::ApplyFailed,
                        e.to_string(),
                    );
                    status
                }
            },
        }
    }
}
