//! Kubernetes Secrets storage driver
//!
//! Stores each release version in a Secret named after the release's
//! storage key. Payload is JSON, compressed and base64-encoded; the
//! compression method is recorded in a label so history survives a
//! configuration change.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;

use super::{
    decode_from_storage, encode_for_storage, storage_labels, CompressionMethod, ReleaseStore,
    StorageConfig, MAX_RESOURCE_SIZE,
};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// Kubernetes Secrets release store
pub struct SecretsStore {
    client: Client,
    config: StorageConfig,
}

impl SecretsStore {
    /// Create with an existing client
    pub fn new(client: Client, config: StorageConfig) -> Self {
        Self { client, config }
    }

    fn secrets_api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn storage_key(name: &str, version: u32) -> String {
        format!("cw.chartwarden.release.v1.{}.v{}", name, version)
    }

    /// Build a Secret from a release
    fn build_secret(&self, release: &StoredRelease) -> Result<Secret> {
        let encoded = encode_for_storage(release, &self.config)?;
        if encoded.len() > MAX_RESOURCE_SIZE {
            return Err(KubeError::Storage(format!(
                "release data too large ({} bytes, max {})",
                encoded.len(),
                MAX_RESOURCE_SIZE
            )));
        }

        let mut labels = storage_labels(release);
        let compression_type = match self.config.compression {
            CompressionMethod::None => "none",
            CompressionMethod::Gzip { .. } => "gzip",
            CompressionMethod::Zstd { .. } => "zstd",
        };
        labels.insert(
            "chartwarden.io/compression".to_string(),
            compression_type.to_string(),
        );

        let mut data = BTreeMap::new();
        data.insert(
            "release".to_string(),
            k8s_openapi::ByteString(encoded.into_bytes()),
        );

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(release.storage_key()),
                namespace: Some(release.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            type_: Some("chartwarden.io/release.v1".to_string()),
            data: Some(data),
            ..Default::default()
        })
    }

    /// Parse a release from a Secret
    fn parse_secret(&self, secret: &Secret) -> Result<StoredRelease> {
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get("release"))
            .ok_or_else(|| KubeError::Storage("Secret missing 'release' data".to_string()))?;

        let encoded = String::from_utf8(data.0.clone())
            .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {}", e)))?;

        let compression = secret
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get("chartwarden.io/compression"))
            .map(|c| match c.as_str() {
                "none" => CompressionMethod::None,
                "gzip" => CompressionMethod::Gzip { level: 6 },
                "zstd" => CompressionMethod::Zstd { level: 3 },
                _ => self.config.compression,
            })
            .unwrap_or(self.config.compression);

        decode_from_storage(&encoded, compression)
    }
}

#[async_trait]
impl ReleaseStore for SecretsStore {
    async fn get(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        let api = self.secrets_api(namespace);

        match api.get(&Self::storage_key(name, version)).await {
            Ok(secret) => self.parse_secret(&secret),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn last(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        let history = self.history(namespace, name).await?;
        history
            .into_iter()
            .next()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let label_selector = format!(
            "app.kubernetes.io/managed-by=chartwarden,chartwarden.io/release-name={}",
            name
        );
        let lp = ListParams::default().labels(&label_selector);

        let secrets = self.secrets_api(namespace).list(&lp).await?;

        let mut releases: Vec<StoredRelease> = secrets
            .items
            .iter()
            .filter_map(|s| self.parse_secret(s).ok())
            .collect();

        releases.sort_by(|a, b| b.version.cmp(&a.version));

        if releases.is_empty() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }

        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let api = self.secrets_api(&release.namespace);
        let secret = self.build_secret(release)?;

        match api.get(&release.storage_key()).await {
            Ok(_) => {
                return Err(KubeError::ReleaseAlreadyExists {
                    name: release.name.clone(),
                    namespace: release.namespace.clone(),
                });
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e.into()),
        }

        api.create(&PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        let api = self.secrets_api(&release.namespace);
        let mut secret = self.build_secret(release)?;

        // Carry the resourceVersion forward so the replace is not rejected
        match api.get(&release.storage_key()).await {
            Ok(existing) => {
                secret.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&release.storage_key(), &PostParams::default(), &secret)
                    .await?;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                api.create(&PostParams::default(), &secret).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str, version: u32) -> Result<StoredRelease> {
        let release = self.get(namespace, name, version).await?;
        let api = self.secrets_api(namespace);

        api.delete(&Self::storage_key(name, version), &DeleteParams::default())
            .await?;
        Ok(release)
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let releases = self.history(namespace, name).await?;
        let api = self.secrets_api(namespace);

        for release in &releases {
            let _ = api
                .delete(&release.storage_key(), &DeleteParams::default())
                .await;
        }

        Ok(releases)
    }
}
