//! Release management
//!
//! A `Manager` drives one release: it derives the desired state from the
//! custom resource's spec and the chart on disk, compares it against the
//! persisted history, and executes install, update, drift-repair or
//! uninstall against the cluster. The `ManagerFactory` owns the long-lived
//! dependencies and binds a manager to a single custom resource instance.

use kube::api::{ApiResource, DynamicObject};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use chartwarden_core::{ChartMetadata, LoadedChart, ReleaseInfo, TemplateContext, Values};
use chartwarden_engine::{Engine, Renderer};

use crate::error::{KubeError, Result};
use crate::ownerref::{controller_owner_ref, OwnerRefRenderer};
use crate::release::{ReleaseStatus, StoredRelease};
use crate::resources::{object_coordinates, parse_documents, ClusterAccess};
use crate::status::AppStatus;
use crate::storage::ReleaseStore;

/// What the reconciler should do with a release, decided from sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    /// No deployed release exists
    Install,
    /// The deployed manifest differs from the desired one
    Update,
    /// Deployed and current; repair external drift only
    Reconcile,
}

/// Decide the next action; update takes precedence over reconcile
pub fn next_action(installed: bool, update_required: bool) -> ReleaseAction {
    if !installed {
        ReleaseAction::Install
    } else if update_required {
        ReleaseAction::Update
    } else {
        ReleaseAction::Reconcile
    }
}

/// Compute the release name for a custom resource
///
/// Embedding the (encoded) uid keeps names unique across delete/recreate
/// cycles of same-named resources, and the encoding is deterministic so the
/// name survives operator restarts.
pub fn release_name(cr_name: &str, uid: &str) -> String {
    format!("{}-{}", cr_name, shorten_uid(uid))
}

/// Base36-encode the 16 uid bytes, lowercased; fall back to stripping
/// dashes when the uid is not a valid UUID.
fn shorten_uid(uid: &str) -> String {
    match uuid::Uuid::parse_str(uid) {
        Ok(parsed) => base36_encode(parsed.as_u128()),
        Err(_) => uid.replace('-', ""),
    }
}

fn base36_encode(mut value: u128) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    digits.iter().rev().collect()
}

/// Produces Managers bound to specific custom-resource instances
///
/// Decouples the reconciler from the storage and cluster plumbing: the
/// factory owns what lives for the whole watch, the manager owns what is
/// per-instance.
pub struct ManagerFactory {
    store: Arc<dyn ReleaseStore>,
    cluster: Arc<dyn ClusterAccess>,
    chart_dir: PathBuf,
    api_resource: ApiResource,
}

impl ManagerFactory {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        cluster: Arc<dyn ClusterAccess>,
        chart_dir: PathBuf,
        api_resource: ApiResource,
    ) -> Self {
        Self {
            store,
            cluster,
            chart_dir,
            api_resource,
        }
    }

    /// Build a manager for one custom resource instance
    pub fn new_manager(&self, cr: &DynamicObject) -> Manager {
        let owner_ref = controller_owner_ref(cr, &self.api_resource);
        let name = cr.metadata.name.clone().unwrap_or_default();
        let uid = cr.metadata.uid.clone().unwrap_or_default();
        let namespace = cr
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        // Deep copy of the spec subtree: the chart values
        let values = Values(
            cr.data
                .get("spec")
                .cloned()
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
        );

        Manager {
            store: self.store.clone(),
            cluster: self.cluster.clone(),
            chart_dir: self.chart_dir.clone(),
            renderer: OwnerRefRenderer::new(Engine::strict(), owner_ref),
            release_name: release_name(&name, &uid),
            namespace,
            values,
            status: AppStatus::status_for(cr),
            is_installed: false,
            is_update_required: false,
            deployed: None,
            candidate: None,
        }
    }
}

/// Desired release computed by `sync`
struct Candidate {
    manifest: String,
    notes: Option<String>,
    chart: ChartMetadata,
    values: Values,
}

/// Manages one release: sync, install, update, reconcile, uninstall
pub struct Manager {
    store: Arc<dyn ReleaseStore>,
    cluster: Arc<dyn ClusterAccess>,
    chart_dir: PathBuf,
    renderer: OwnerRefRenderer<Engine>,

    release_name: String,
    namespace: String,
    values: Values,
    status: AppStatus,

    is_installed: bool,
    is_update_required: bool,
    deployed: Option<StoredRelease>,
    candidate: Option<Candidate>,
}

impl Manager {
    /// The release name for this custom resource
    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    /// Whether a deployed release exists (valid after `sync`)
    pub fn is_installed(&self) -> bool {
        self.is_installed
    }

    /// Whether the desired manifest differs from the deployed one (valid
    /// after `sync`)
    pub fn is_update_required(&self) -> bool {
        self.is_update_required
    }

    /// The action the reconciler should dispatch (valid after `sync`)
    pub fn plan(&self) -> ReleaseAction {
        next_action(self.is_installed, self.is_update_required)
    }

    /// Bring the storage backend and derived state in sync with the custom
    /// resource. Idempotent; must run before any other operation.
    pub async fn sync(&mut self) -> Result<()> {
        self.sync_release_status().await?;

        // Garbage-collect non-deployed versions. When every version is
        // non-deployed this also makes failed installations retry cleanly.
        let history = match self.store.history(&self.namespace, &self.release_name).await {
            Ok(history) => history,
            Err(e) if e.is_release_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        for release in history {
            if release.status != ReleaseStatus::Deployed {
                debug!(
                    release = %release.name,
                    version = release.version,
                    status = %release.status,
                    "deleting stale release version"
                );
                match self
                    .store
                    .delete(&self.namespace, &release.name, release.version)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_release_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        // Load the most recently deployed release.
        self.deployed = match self.store.deployed(&self.namespace, &self.release_name).await {
            Ok(release) => {
                self.is_installed = true;
                Some(release)
            }
            Err(KubeError::ReleaseNotFound { .. }) | Err(KubeError::NoDeployedRelease { .. }) => {
                self.is_installed = false;
                None
            }
            Err(e) => return Err(e),
        };

        // Render the candidate from a fresh chart; the render mutates the
        // merged values (subchart conditions, value imports), so nothing of
        // it is reused across reconciles.
        let candidate = self.render_candidate()?;
        if let Some(deployed) = &self.deployed {
            self.is_update_required = deployed.manifest != candidate.manifest;
        }
        self.candidate = Some(candidate);

        Ok(())
    }

    /// Re-insert the status snapshot when the backend lost it
    async fn sync_release_status(&self) -> Result<()> {
        let Some(release) = &self.status.release else {
            return Ok(());
        };

        match self
            .store
            .get(&release.namespace, &release.name, release.version)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_release_not_found() => {
                debug!(
                    release = %release.name,
                    version = release.version,
                    "restoring release record from status"
                );
                self.store.create(release).await
            }
            Err(e) => Err(e),
        }
    }

    /// Load the chart and render the desired manifest with owner injection
    fn render_candidate(&self) -> Result<Candidate> {
        let chart = LoadedChart::load(&self.chart_dir).map_err(|e| KubeError::Chart(e.to_string()))?;

        let mut values = chart.default_values().map_err(|e| KubeError::Chart(e.to_string()))?;
        values.merge(&self.values);

        let release_info = match &self.deployed {
            Some(deployed) => ReleaseInfo::for_upgrade(
                &self.release_name,
                &self.namespace,
                deployed.version + 1,
            ),
            None => ReleaseInfo::for_install(&self.release_name, &self.namespace),
        };
        let context = TemplateContext::new(values.clone(), release_info, &chart.chart.metadata);

        let rendered = self.renderer.render(&chart, &context)?;
        let manifest = rendered
            .manifests
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n---\n");

        Ok(Candidate {
            manifest,
            notes: rendered.notes,
            chart: chart.chart.metadata.clone(),
            values,
        })
    }

    fn candidate(&self) -> Result<&Candidate> {
        self.candidate
            .as_ref()
            .ok_or_else(|| KubeError::InvalidConfig("sync must run before release operations".into()))
    }

    /// Install a fresh release (version 1)
    ///
    /// On failure the partial release is purged so the next reconcile can
    /// retry from a clean slate; the original error is surfaced.
    pub async fn install_release(&self) -> Result<StoredRelease> {
        let candidate = self.candidate()?;

        let mut release = StoredRelease::for_install(
            self.release_name.clone(),
            self.namespace.clone(),
            candidate.chart.clone(),
            candidate.values.clone(),
            candidate.manifest.clone(),
        );
        release.notes = candidate.notes.clone();
        self.store.create(&release).await?;

        if let Err(e) = self.create_documents(&release.manifest).await {
            self.purge(&release).await;
            return Err(KubeError::InstallFailed {
                name: self.release_name.clone(),
                source: Box::new(e),
            });
        }

        release.mark_deployed();
        self.store.update(&release).await?;
        Ok(release)
    }

    /// Update the deployed release to the candidate
    ///
    /// Returns `(previous, new)`. On failure the previous manifest is
    /// force-rolled-back and the failed version is recorded; the original
    /// error is surfaced.
    pub async fn update_release(&self) -> Result<(StoredRelease, StoredRelease)> {
        let candidate = self.candidate()?;
        let deployed = self.deployed.clone().ok_or_else(|| KubeError::NoDeployedRelease {
            name: self.release_name.clone(),
            namespace: self.namespace.clone(),
        })?;

        let mut release = StoredRelease::for_upgrade(
            &deployed,
            candidate.chart.clone(),
            candidate.values.clone(),
            candidate.manifest.clone(),
        );
        release.notes = candidate.notes.clone();
        self.store.create(&release).await?;

        if let Err(e) = self.apply_documents(&release.manifest).await {
            self.rollback(&deployed, &mut release).await;
            return Err(KubeError::UpdateFailed {
                name: self.release_name.clone(),
                source: Box::new(e),
            });
        }

        let mut previous = deployed;
        previous.mark_superseded();
        self.store.update(&previous).await?;

        release.mark_deployed();
        self.store.update(&release).await?;
        Ok((previous, release))
    }

    /// Repair external drift against the deployed manifest
    ///
    /// Creates missing objects; merge-patches existing ones. Does not
    /// create a new release version.
    pub async fn reconcile_release(&self) -> Result<StoredRelease> {
        let deployed = self.deployed.clone().ok_or_else(|| KubeError::NoDeployedRelease {
            name: self.release_name.clone(),
            namespace: self.namespace.clone(),
        })?;

        for doc in parse_documents(&deployed.manifest)? {
            match self.cluster.create(&self.namespace, &doc).await {
                Ok(()) => continue,
                Err(e) if e.is_already_exists() => {
                    self.cluster
                        .merge_patch(&self.namespace, &doc)
                        .await
                        .map_err(|e| self.reconcile_error(&doc, e))?;
                }
                Err(e) => return Err(self.reconcile_error(&doc, e)),
            }
        }

        Ok(deployed)
    }

    /// Uninstall the release and purge its history
    ///
    /// Returns `ReleaseNotFound` when there is no history, which deletion
    /// paths treat as success.
    pub async fn uninstall_release(&self) -> Result<StoredRelease> {
        let history = self.store.history(&self.namespace, &self.release_name).await?;

        let mut release = history
            .iter()
            .find(|r| r.status == ReleaseStatus::Deployed)
            .cloned()
            .unwrap_or_else(|| history[0].clone());

        // Delete in reverse creation order
        for doc in parse_documents(&release.manifest)?.iter().rev() {
            self.cluster.delete(&self.namespace, doc).await?;
        }

        self.store
            .delete_all(&self.namespace, &self.release_name)
            .await?;

        release.mark_uninstalled();
        Ok(release)
    }

    async fn create_documents(&self, manifest: &str) -> Result<()> {
        for doc in parse_documents(manifest)? {
            self.cluster.create(&self.namespace, &doc).await?;
        }
        Ok(())
    }

    async fn apply_documents(&self, manifest: &str) -> Result<()> {
        for doc in parse_documents(manifest)? {
            self.cluster.apply(&self.namespace, &doc).await?;
        }
        Ok(())
    }

    /// Best-effort cleanup after a failed install
    async fn purge(&self, release: &StoredRelease) {
        if let Ok(docs) = parse_documents(&release.manifest) {
            for doc in docs.iter().rev() {
                if let Err(e) = self.cluster.delete(&self.namespace, doc).await {
                    let (kind, ns, name) = object_coordinates(doc, &self.namespace);
                    warn!(%kind, %ns, %name, error = %e, "failed to delete object while purging");
                }
            }
        }
        if let Err(e) = self
            .store
            .delete_all(&self.namespace, &self.release_name)
            .await
        {
            if !e.is_release_not_found() {
                warn!(release = %self.release_name, error = %e, "failed to purge release history");
            }
        }
    }

    /// Best-effort forced rollback after a failed update
    async fn rollback(&self, deployed: &StoredRelease, failed: &mut StoredRelease) {
        if let Err(e) = self.apply_documents(&deployed.manifest).await {
            warn!(
                release = %self.release_name,
                version = deployed.version,
                error = %e,
                "forced rollback failed"
            );
        }
        failed.mark_failed();
        if let Err(e) = self.store.update(failed).await {
            warn!(release = %self.release_name, error = %e, "failed to record failed release version");
        }
    }

    fn reconcile_error(&self, doc: &JsonValue, source: KubeError) -> KubeError {
        let (kind, namespace, object) = object_coordinates(doc, &self.namespace);
        KubeError::ReconcileFailed {
            kind,
            namespace,
            object,
            message: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MockCluster;
    use crate::status::{AppStatus, ConditionReason, ResourcePhase};
    use crate::storage::MemoryStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::TypeMeta;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const UID: &str = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";

    fn fixture_chart() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("Chart.yaml"),
            "apiVersion: chartwarden/v1\nmetadata:\n  name: tomcat\n  version: 0.1.0\n",
        )
        .unwrap();
        fs::write(tmp.path().join("values.yaml"), "replicaCount: 1\n").unwrap();
        let templates = tmp.path().join("templates");
        fs::create_dir(&templates).unwrap();
        fs::write(
            templates.join("deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {{ release.name }}\nspec:\n  replicas: {{ values.replicaCount }}\n",
        )
        .unwrap();
        fs::write(
            templates.join("service.yaml"),
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: {{ release.name }}\nspec:\n  ports:\n    - port: 8080\n",
        )
        .unwrap();
        tmp
    }

    fn api_resource() -> ApiResource {
        ApiResource {
            group: "apache.org".to_string(),
            version: "v1alpha1".to_string(),
            api_version: "apache.org/v1alpha1".to_string(),
            kind: "Tomcat".to_string(),
            plural: "tomcats".to_string(),
        }
    }

    fn tomcat_cr(spec: serde_json::Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "apache.org/v1alpha1".to_string(),
                kind: "Tomcat".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("t1".to_string()),
                namespace: Some("default".to_string()),
                uid: Some(UID.to_string()),
                ..Default::default()
            },
            data: serde_json::json!({ "spec": spec }),
        }
    }

    fn make_factory(
        store: &MemoryStore,
        cluster: &MockCluster,
        chart_dir: &Path,
    ) -> ManagerFactory {
        ManagerFactory::new(
            Arc::new(store.clone()),
            Arc::new(cluster.clone()),
            chart_dir.to_path_buf(),
            api_resource(),
        )
    }

    fn expected_release_name() -> String {
        release_name("t1", UID)
    }

    #[test]
    fn test_release_name_stable_and_uid_scoped() {
        let a = release_name("t1", UID);
        let b = release_name("t1", UID);
        assert_eq!(a, b);
        assert!(a.starts_with("t1-"));

        // Lowercase base36, no dashes in the encoded part
        let encoded = a.strip_prefix("t1-").unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        // Different uid, different name
        let other = release_name("t1", "9f2c4e7a-0b1d-4c3e-8f5a-6b7c8d9e0f1a");
        assert_ne!(a, other);
    }

    #[test]
    fn test_release_name_fallback_strips_dashes() {
        assert_eq!(release_name("app", "not-a-uuid"), "app-notauuid");
    }

    #[test]
    fn test_base36_encode() {
        assert_eq!(base36_encode(0), "0");
        assert_eq!(base36_encode(35), "z");
        assert_eq!(base36_encode(36), "10");
    }

    #[test]
    fn test_next_action_tie_break() {
        assert_eq!(next_action(false, false), ReleaseAction::Install);
        // Not installed wins even if a diff was somehow computed
        assert_eq!(next_action(false, true), ReleaseAction::Install);
        assert_eq!(next_action(true, true), ReleaseAction::Update);
        assert_eq!(next_action(true, false), ReleaseAction::Reconcile);
    }

    #[tokio::test]
    async fn test_fresh_install() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let cr = tomcat_cr(serde_json::json!({"replicaCount": 2}));
        let mut manager = factory.new_manager(&cr);

        manager.sync().await.unwrap();
        assert!(!manager.is_installed());
        assert_eq!(manager.plan(), ReleaseAction::Install);

        let release = manager.install_release().await.unwrap();
        assert_eq!(release.version, 1);
        assert_eq!(release.status, ReleaseStatus::Deployed);
        assert_eq!(release.name, expected_release_name());

        // History: exactly one deployed version
        let history = store.history("default", &release.name).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ReleaseStatus::Deployed);

        // Cluster got both objects, rendered with the spec values and the
        // owner reference
        let key = format!("Deployment/default/{}", release.name);
        let deployment = cluster.get(&key).unwrap();
        assert_eq!(deployment["spec"]["replicas"], 2);
        let refs = deployment["metadata"]["ownerReferences"].as_array().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0]["kind"], "Tomcat");
        assert_eq!(refs[0]["uid"], UID);
        assert!(cluster
            .get(&format!("Service/default/{}", release.name))
            .is_some());
    }

    #[tokio::test]
    async fn test_spec_update_supersedes_previous() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        manager.install_release().await.unwrap();

        // Same CR, new spec
        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 3})));
        manager.sync().await.unwrap();
        assert!(manager.is_installed());
        assert!(manager.is_update_required());
        assert_eq!(manager.plan(), ReleaseAction::Update);

        let (previous, current) = manager.update_release().await.unwrap();
        assert_eq!(previous.version, 1);
        assert_eq!(previous.status, ReleaseStatus::Superseded);
        assert_eq!(current.version, 2);
        assert_eq!(current.status, ReleaseStatus::Deployed);

        // Exactly one deployed version in history
        let history = store.history("default", &current.name).await.unwrap();
        assert_eq!(history.len(), 2);
        let deployed: Vec<_> = history
            .iter()
            .filter(|r| r.status == ReleaseStatus::Deployed)
            .collect();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].version, 2);

        let deployment = cluster
            .get(&format!("Deployment/default/{}", current.name))
            .unwrap();
        assert_eq!(deployment["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn test_noop_reconcile_is_idempotent() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        manager.install_release().await.unwrap();

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        assert!(manager.is_installed());
        assert!(!manager.is_update_required());
        assert_eq!(manager.plan(), ReleaseAction::Reconcile);

        manager.reconcile_release().await.unwrap();

        let history = store
            .history("default", &expected_release_name())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_drift_repair_restores_fields() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 3})));
        manager.sync().await.unwrap();
        manager.install_release().await.unwrap();

        // External mutation: someone scales the deployment down
        let key = format!("Deployment/default/{}", expected_release_name());
        let mut drifted = cluster.get(&key).unwrap();
        drifted["spec"]["replicas"] = serde_json::json!(1);
        cluster.apply("default", &drifted).await.unwrap();

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 3})));
        manager.sync().await.unwrap();
        assert_eq!(manager.plan(), ReleaseAction::Reconcile);
        manager.reconcile_release().await.unwrap();

        let repaired = cluster.get(&key).unwrap();
        assert_eq!(repaired["spec"]["replicas"], 3);

        // No new release version
        let history = store
            .history("default", &expected_release_name())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_install_is_purged() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        cluster.fail_matching("Deployment");
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();

        let err = manager.install_release().await.unwrap_err();
        assert!(matches!(err, KubeError::InstallFailed { .. }));

        // No history survives the purge, so the next reconcile retries
        let result = store.history("default", &expected_release_name()).await;
        assert!(matches!(result, Err(KubeError::ReleaseNotFound { .. })));

        cluster.clear_failure();
        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        assert_eq!(manager.plan(), ReleaseAction::Install);
        manager.install_release().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        manager.install_release().await.unwrap();

        cluster.fail_matching("Deployment");
        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 5})));
        manager.sync().await.unwrap();
        let err = manager.update_release().await.unwrap_err();
        assert!(matches!(err, KubeError::UpdateFailed { .. }));
        cluster.clear_failure();

        // Previous version is still the only deployed one; the failed
        // version is recorded and gone after the next sync's GC
        let history = store
            .history("default", &expected_release_name())
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ReleaseStatus::Failed);
        assert_eq!(history[1].status, ReleaseStatus::Deployed);

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 5})));
        manager.sync().await.unwrap();
        let history = store
            .history("default", &expected_release_name())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ReleaseStatus::Deployed);
        assert!(manager.is_update_required());
    }

    #[tokio::test]
    async fn test_uninstall_removes_objects_and_history() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        manager.install_release().await.unwrap();
        assert_eq!(cluster.object_count(), 2);

        let release = manager.uninstall_release().await.unwrap();
        assert_eq!(release.status, ReleaseStatus::Uninstalled);
        assert_eq!(cluster.object_count(), 0);

        let result = store.history("default", &expected_release_name()).await;
        assert!(matches!(result, Err(KubeError::ReleaseNotFound { .. })));
    }

    #[tokio::test]
    async fn test_uninstall_without_history_is_not_found() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({})));
        manager.sync().await.unwrap();

        let err = manager.uninstall_release().await.unwrap_err();
        assert!(err.is_release_not_found());
    }

    #[tokio::test]
    async fn test_sync_recovers_lost_storage_from_status() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        // Install once to produce a deployed release snapshot
        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        let deployed = manager.install_release().await.unwrap();

        // Fresh, empty backend; the CR still carries the snapshot in status
        let empty_store = MemoryStore::new();
        let factory = make_factory(&empty_store, &cluster, chart.path());

        let mut status = AppStatus::default();
        status.set_release(Some(deployed.clone()));
        status.set_phase(ResourcePhase::Applied, ConditionReason::ApplySuccessful, "");
        let mut cr = tomcat_cr(serde_json::json!({"replicaCount": 2}));
        cr.data["status"] = serde_json::to_value(&status).unwrap();

        let mut manager = factory.new_manager(&cr);
        manager.sync().await.unwrap();

        // The backend entry was re-created and the dry-run comparison sees
        // no difference
        assert!(manager.is_installed());
        assert!(!manager.is_update_required());
        let restored = empty_store.get("default", &deployed.name, 1).await.unwrap();
        assert_eq!(restored.manifest, deployed.manifest);
    }

    #[tokio::test]
    async fn test_sync_garbage_collects_ghost_versions() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        let deployed = manager.install_release().await.unwrap();

        // A failed ghost version lingers in the backend
        let mut ghost = StoredRelease::for_upgrade(
            &deployed,
            deployed.chart.clone(),
            deployed.values.clone(),
            deployed.manifest.clone(),
        );
        ghost.mark_failed();
        store.create(&ghost).await.unwrap();

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();

        let history = store.history("default", &deployed.name).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ReleaseStatus::Deployed);
    }

    #[tokio::test]
    async fn test_reconcile_error_carries_coordinates() {
        let chart = fixture_chart();
        let store = MemoryStore::new();
        let cluster = MockCluster::new();
        let factory = make_factory(&store, &cluster, chart.path());

        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        manager.install_release().await.unwrap();

        // Patching will fail: the object exists, then mutations are denied
        cluster.fail_matching("Service");
        let mut manager = factory.new_manager(&tomcat_cr(serde_json::json!({"replicaCount": 2})));
        manager.sync().await.unwrap();
        let err = manager.reconcile_release().await.unwrap_err();
        match err {
            KubeError::ReconcileFailed { kind, object, .. } => {
                assert_eq!(kind, "Service");
                assert_eq!(object, expected_release_name());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
