//! Error types for chartwarden-kube

use thiserror::Error;

/// Result type for chartwarden-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during release and cluster operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Release not found (name unknown to the backend)
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// History exists but no version is deployed
    #[error("release '{name}' has no deployed versions in namespace '{namespace}'")]
    NoDeployedRelease { name: String, namespace: String },

    /// Release version already exists in the backend
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// Cluster object already exists (create path)
    #[error("{kind} '{name}' already exists")]
    ResourceAlreadyExists { kind: String, name: String },

    /// Install failed; cleanup of the partial release was attempted
    #[error("install of release '{name}' failed: {source}")]
    InstallFailed {
        name: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Update failed; a forced rollback to the previous version was attempted
    #[error("update of release '{name}' failed: {source}")]
    UpdateFailed {
        name: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Drift repair failed for a specific object
    #[error("reconcile of {kind} '{namespace}/{object}' failed: {message}")]
    ReconcileFailed {
        kind: String,
        namespace: String,
        object: String,
        message: String,
    },

    /// Chart loading error
    #[error("chart error: {0}")]
    Chart(String),

    /// Template rendering or owner injection error
    #[error("template error: {0}")]
    Template(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<chartwarden_core::CoreError> for KubeError {
    fn from(e: chartwarden_core::CoreError) -> Self {
        KubeError::Chart(e.to_string())
    }
}

impl From<chartwarden_engine::EngineError> for KubeError {
    fn from(e: chartwarden_engine::EngineError) -> Self {
        KubeError::Template(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this error means "the object is already there"
    pub fn is_already_exists(&self) -> bool {
        match self {
            KubeError::ResourceAlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// Check if this error means "the release name is unknown"
    pub fn is_release_not_found(&self) -> bool {
        matches!(self, KubeError::ReleaseNotFound { .. })
    }
}
