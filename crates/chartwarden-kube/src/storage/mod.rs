//! Storage drivers for persisting release history
//!
//! Two backends ship with the operator:
//! - **Memory** (default): process-local history, rebuilt from the custom
//!   resource status after a restart
//! - **Secrets**: each release version stored in a Kubernetes Secret as
//!   compressed, base64-encoded JSON

mod memory;
mod secrets;

pub use memory::{MemoryStore, OperationCounts};
pub use secrets::SecretsStore;

use async_trait::async_trait;

use crate::error::{KubeError, Result};
use crate::release::{ReleaseStatus, StoredRelease};

/// Maximum size for a single Kubernetes Secret (1MB minus overhead)
pub const MAX_RESOURCE_SIZE: usize = 1_000_000;

/// Release persistence capability
///
/// Implementations must be Send + Sync for use across async tasks. All
/// operations are keyed by `(namespace, name)`; release names are unique
/// per custom-resource instance, so drivers need no cross-key coordination.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Get a specific release version
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// Get the newest release version for a name
    async fn last(&self, namespace: &str, name: &str) -> Result<StoredRelease>;

    /// Get release history (all versions, newest first)
    ///
    /// Returns `ReleaseNotFound` when the name is unknown.
    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Create a new release version
    async fn create(&self, release: &StoredRelease) -> Result<()>;

    /// Update an existing release version
    async fn update(&self, release: &StoredRelease) -> Result<()>;

    /// Delete a specific release version
    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease>;

    /// Delete all versions of a release
    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>>;

    /// Get the deployed release version
    ///
    /// Distinguishes an unknown name (`ReleaseNotFound`) from a history
    /// with nothing deployed (`NoDeployedRelease`); the release manager's
    /// state machine depends on that distinction.
    async fn deployed(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        let history = self.history(namespace, name).await?;
        history
            .into_iter()
            .find(|r| r.status == ReleaseStatus::Deployed)
            .ok_or_else(|| KubeError::NoDeployedRelease {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Compression method for persisted payloads
    pub compression: CompressionMethod,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Zstd { level: 3 },
        }
    }
}

/// Compression method for release data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression (Helm-compatible)
    Gzip { level: u32 },

    /// Zstd compression (better ratio, faster)
    Zstd { level: i32 },
}

/// Compress data using the configured method
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Encode a release for storage (serialize + compress + base64)
pub fn encode_for_storage(release: &StoredRelease, config: &StorageConfig) -> Result<String> {
    let json = serde_json::to_vec(release).map_err(|e| KubeError::Serialization(e.to_string()))?;
    let compressed = compress(&json, config.compression)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        &compressed,
    ))
}

/// Decode a release from storage (base64 + decompress + deserialize)
pub fn decode_from_storage(data: &str, compression: CompressionMethod) -> Result<StoredRelease> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data)
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    let decompressed = decompress(&decoded, compression)?;
    serde_json::from_slice(&decompressed).map_err(|e| KubeError::Serialization(e.to_string()))
}

/// Labels applied to all storage resources
pub fn storage_labels(release: &StoredRelease) -> std::collections::BTreeMap<String, String> {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "chartwarden".to_string(),
    );
    labels.insert(
        "chartwarden.io/release-name".to_string(),
        release.name.clone(),
    );
    labels.insert(
        "chartwarden.io/release-version".to_string(),
        release.version.to_string(),
    );
    labels
}
