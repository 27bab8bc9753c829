//! Cluster access for rendered manifests
//!
//! Parses manifest text into documents and exposes the minimal cluster
//! surface the release manager needs: create, server-side apply,
//! merge-patch and delete of dynamic objects. `KubeCluster` resolves each
//! document's group-version-kind through API discovery; `MockCluster` is
//! the in-memory test double.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{Discovery, Scope};
use kube::Client;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{KubeError, Result};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "chartwarden";

/// Split manifest text into YAML documents
///
/// Document boundaries are lines consisting of `---`. Documents that are
/// empty or contain only comments are dropped.
pub fn split_documents(manifest: &str) -> Vec<&str> {
    manifest
        .split("---")
        .map(str::trim)
        .filter(|doc| {
            !doc.is_empty()
                && !doc
                    .lines()
                    .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
        })
        .collect()
}

/// Parse manifest text into JSON documents
pub fn parse_documents(manifest: &str) -> Result<Vec<JsonValue>> {
    let mut docs = Vec::new();
    for (index, doc) in split_documents(manifest).into_iter().enumerate() {
        let value: JsonValue = serde_yaml::from_str(doc).map_err(|e| {
            KubeError::InvalidManifest(format!("failed to parse document {}: {}", index, e))
        })?;
        if value.is_null() {
            continue;
        }
        docs.push(value);
    }
    Ok(docs)
}

/// Coordinates of a manifest document, for error reporting
pub fn object_coordinates(doc: &JsonValue, default_namespace: &str) -> (String, String, String) {
    let kind = doc
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let metadata = doc.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or("unnamed")
        .to_string();
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(|n| n.as_str())
        .unwrap_or(default_namespace)
        .to_string();
    (kind, namespace, name)
}

/// Minimal cluster surface consumed by the release manager
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Create an object; fails with an already-exists error if present
    async fn create(&self, namespace: &str, doc: &JsonValue) -> Result<()>;

    /// Server-side apply an object, forcing field ownership
    async fn apply(&self, namespace: &str, doc: &JsonValue) -> Result<()>;

    /// JSON merge-patch an object with the full document
    async fn merge_patch(&self, namespace: &str, doc: &JsonValue) -> Result<()>;

    /// Delete an object; a missing object is not an error
    async fn delete(&self, namespace: &str, doc: &JsonValue) -> Result<()>;
}

/// Cluster access backed by the Kubernetes API
///
/// The discovery cache is shared behind a lock; `refresh` may run
/// concurrently with lookups and newly registered kinds become visible on
/// the next resolve.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    discovery: Arc<RwLock<Discovery>>,
}

impl KubeCluster {
    /// Create and run an initial discovery pass
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: Arc::new(RwLock::new(discovery)),
        })
    }

    /// Re-run discovery to pick up newly registered kinds
    pub async fn refresh(&self) -> Result<()> {
        let fresh = Discovery::new(self.client.clone()).run().await?;
        *self.discovery.write().await = fresh;
        Ok(())
    }

    /// Resolve a document into an API handle and object
    async fn api_for(
        &self,
        namespace: &str,
        doc: &JsonValue,
    ) -> Result<(Api<DynamicObject>, DynamicObject, String)> {
        let obj: DynamicObject = serde_json::from_value(doc.clone())
            .map_err(|e| KubeError::InvalidManifest(format!("not a Kubernetes object: {}", e)))?;

        let types = obj.types.clone().ok_or_else(|| {
            KubeError::InvalidManifest("resource missing apiVersion or kind".to_string())
        })?;
        let gvk = match types.api_version.split_once('/') {
            Some((group, version)) => GroupVersionKind::gvk(group, version, &types.kind),
            None => GroupVersionKind::gvk("", &types.api_version, &types.kind),
        };

        let discovery = self.discovery.read().await;
        let (api_resource, capabilities) = discovery.resolve_gvk(&gvk).ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "unknown resource type: {}/{}",
                types.api_version, types.kind
            ))
        })?;

        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest("resource missing metadata.name".into()))?;

        let api = if capabilities.scope == Scope::Namespaced {
            let ns = obj.metadata.namespace.as_deref().unwrap_or(namespace);
            Api::namespaced_with(self.client.clone(), ns, &api_resource)
        } else {
            Api::all_with(self.client.clone(), &api_resource)
        };

        Ok((api, obj, name))
    }
}

#[async_trait]
impl ClusterAccess for KubeCluster {
    async fn create(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let (api, obj, name) = self.api_for(namespace, doc).await?;
        debug!(kind = ?obj.types, %name, "creating resource");

        match api.create(&PostParams::default(), &obj).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                Err(KubeError::ResourceAlreadyExists {
                    kind: obj.types.map(|t| t.kind).unwrap_or_default(),
                    name,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let (api, obj, name) = self.api_for(namespace, doc).await?;
        debug!(kind = ?obj.types, %name, "applying resource");

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true; // take ownership of fields
        api.patch(&name, &params, &Patch::Apply(&obj)).await?;
        Ok(())
    }

    async fn merge_patch(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let (api, _obj, name) = self.api_for(namespace, doc).await?;
        debug!(%name, "merge-patching resource");

        api.patch(&name, &PatchParams::default(), &Patch::Merge(doc))
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let (api, obj, name) = self.api_for(namespace, doc).await?;
        debug!(kind = ?obj.types, %name, "deleting resource");

        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory cluster for tests, with failure injection
#[derive(Clone, Default)]
pub struct MockCluster {
    objects: Arc<std::sync::RwLock<BTreeMap<String, JsonValue>>>,
    deny: Arc<std::sync::RwLock<Option<String>>>,
}

impl MockCluster {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every mutating call whose object key contains the substring
    ///
    /// Keys have the shape `kind/namespace/name`.
    pub fn fail_matching(&self, substring: impl Into<String>) {
        *self.deny.write().unwrap() = Some(substring.into());
    }

    /// Stop injecting failures
    pub fn clear_failure(&self) {
        *self.deny.write().unwrap() = None;
    }

    /// Snapshot of stored object keys
    pub fn object_keys(&self) -> Vec<String> {
        self.objects.read().unwrap().keys().cloned().collect()
    }

    /// Fetch a stored object by key
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.objects.read().unwrap().get(key).cloned()
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    fn key(namespace: &str, doc: &JsonValue) -> String {
        let (kind, ns, name) = object_coordinates(doc, namespace);
        format!("{}/{}/{}", kind, ns, name)
    }

    fn check_denied(&self, key: &str) -> Result<()> {
        if let Some(deny) = self.deny.read().unwrap().as_ref() {
            if key.contains(deny.as_str()) {
                return Err(KubeError::InvalidManifest(format!(
                    "injected failure for {}",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// Merge-patch semantics: objects merge recursively, everything else is
/// replaced.
fn json_merge(base: &mut JsonValue, patch: &JsonValue) {
    match (base, patch) {
        (JsonValue::Object(base_map), JsonValue::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(base_value) => json_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

#[async_trait]
impl ClusterAccess for MockCluster {
    async fn create(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let key = Self::key(namespace, doc);
        self.check_denied(&key)?;

        let mut objects = self.objects.write().unwrap();
        if objects.contains_key(&key) {
            let (kind, _, name) = object_coordinates(doc, namespace);
            return Err(KubeError::ResourceAlreadyExists { kind, name });
        }
        objects.insert(key, doc.clone());
        Ok(())
    }

    async fn apply(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let key = Self::key(namespace, doc);
        self.check_denied(&key)?;

        self.objects.write().unwrap().insert(key, doc.clone());
        Ok(())
    }

    async fn merge_patch(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let key = Self::key(namespace, doc);
        self.check_denied(&key)?;

        let mut objects = self.objects.write().unwrap();
        match objects.get_mut(&key) {
            Some(existing) => {
                json_merge(existing, doc);
                Ok(())
            }
            None => Err(KubeError::InvalidManifest(format!("{} not found", key))),
        }
    }

    async fn delete(&self, namespace: &str, doc: &JsonValue) -> Result<()> {
        let key = Self::key(namespace, doc);
        self.check_denied(&key)?;

        self.objects.write().unwrap().remove(&key);
        Ok(())
    }
}
