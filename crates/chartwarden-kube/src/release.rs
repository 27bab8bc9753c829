//! Persisted release records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chartwarden_core::{ChartMetadata, Values};

/// A stored release: one rendered-and-tracked version of a chart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    /// Release name
    pub name: String,

    /// Kubernetes namespace
    pub namespace: String,

    /// Revision number (1-indexed, increments with each update)
    pub version: u32,

    /// Current status code
    pub status: ReleaseStatus,

    /// Chart metadata at deploy time
    pub chart: ChartMetadata,

    /// Effective values the manifest was rendered from
    pub values: Values,

    /// Rendered manifest (all Kubernetes resources)
    pub manifest: String,

    /// Rendered notes, if the chart has a NOTES template
    #[serde(default)]
    pub notes: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl StoredRelease {
    /// Create the first version of a release
    pub fn for_install(
        name: String,
        namespace: String,
        chart: ChartMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name,
            namespace,
            version: 1,
            status: ReleaseStatus::Unknown,
            chart,
            values,
            manifest,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the next version of an existing release
    pub fn for_upgrade(
        previous: &StoredRelease,
        chart: ChartMetadata,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version: previous.version + 1,
            status: ReleaseStatus::Unknown,
            chart,
            values,
            manifest,
            notes: previous.notes.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage key for this release version
    pub fn storage_key(&self) -> String {
        format!("cw.chartwarden.release.v1.{}.v{}", self.name, self.version)
    }

    /// Mark the release as deployed
    pub fn mark_deployed(&mut self) {
        self.status = ReleaseStatus::Deployed;
        self.updated_at = Utc::now();
    }

    /// Mark the release as failed
    pub fn mark_failed(&mut self) {
        self.status = ReleaseStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Mark the release as superseded (replaced by a newer version)
    pub fn mark_superseded(&mut self) {
        self.status = ReleaseStatus::Superseded;
        self.updated_at = Utc::now();
    }

    /// Mark the release as uninstalled
    pub fn mark_uninstalled(&mut self) {
        self.status = ReleaseStatus::Uninstalled;
        self.updated_at = Utc::now();
    }
}

/// Release status code
///
/// Note: this enum is non-exhaustive - new variants may be added in future
/// versions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Superseded,
    Failed,
    Uninstalled,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalled => "uninstalled",
        };
        write!(f, "{}", s)
    }
}
