//! Per-kind controller
//!
//! One controller per watched kind, built over dynamic objects so no typed
//! bindings are generated. Each reconcile re-fetches the resource, manages
//! the uninstall finalizer, dispatches the release state machine and writes
//! the status back.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, DynamicObject, Patch, PatchParams, ResourceExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use chartwarden_kube::status::{AppStatus, ConditionReason, ResourcePhase};
use chartwarden_kube::{KubeError, ManagerFactory, ReleaseAction};

use crate::watches::WatchEntry;

/// Finalizer blocking hard deletion until the release is uninstalled
pub const FINALIZER: &str = "uninstall-helm-release";

/// Requeue delay after a reconcile error
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Resync period used when none is configured
const DEFAULT_RESYNC: Duration = Duration::from_secs(60);

/// Shared context for one watched kind
pub struct Context {
    client: Client,
    entry: WatchEntry,
    factory: ManagerFactory,
    resync_period: Duration,
}

impl Context {
    fn api_for(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.entry.api_resource())
    }
}

/// Run the controller for one watch entry until shutdown
///
/// `namespace` scopes the watch; `None` watches all namespaces.
pub async fn run(
    client: Client,
    factory: ManagerFactory,
    entry: WatchEntry,
    namespace: Option<String>,
    resync_period: Duration,
) {
    let resync_period = if resync_period.is_zero() {
        DEFAULT_RESYNC
    } else {
        resync_period
    };
    let api_resource = entry.api_resource();
    let api: Api<DynamicObject> = match &namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &api_resource),
        None => Api::all_with(client.clone(), &api_resource),
    };

    info!(
        watch = %entry,
        chart = %entry.chart.display(),
        namespace = namespace.as_deref().unwrap_or("<all>"),
        resync_secs = resync_period.as_secs(),
        "starting controller"
    );

    let ctx = Arc::new(Context {
        client,
        entry,
        factory,
        resync_period,
    });

    Controller::new_with(api, WatcherConfig::default(), api_resource)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => debug!(object = %obj.name, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        })
        .await;
}

/// Append the finalizer to a finalizer list
fn with_finalizer(finalizers: &[String]) -> Vec<String> {
    let mut updated = finalizers.to_vec();
    updated.push(FINALIZER.to_string());
    updated
}

/// Remove the finalizer from a finalizer list
fn without_finalizer(finalizers: &[String]) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != FINALIZER)
        .cloned()
        .collect()
}

async fn reconcile(
    obj: Arc<DynamicObject>,
    ctx: Arc<Context>,
) -> Result<Action, KubeError> {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api = ctx.api_for(&namespace);

    // Re-fetch: the cached object can lag behind patches we made ourselves.
    // Gone already means the finalizer work has completed or never started.
    let Some(cr) = api.get_opt(&name).await? else {
        debug!(%namespace, %name, "resource already gone");
        return Ok(Action::await_change());
    };

    let deleted = cr.metadata.deletion_timestamp.is_some();
    let finalizers = cr.metadata.finalizers.clone().unwrap_or_default();
    let has_finalizer = finalizers.iter().any(|f| f == FINALIZER);

    // The finalizer lands before any cluster-affecting action; the patch
    // triggers the watch event that continues the reconcile.
    if !deleted && !has_finalizer {
        debug!(%namespace, %name, "adding finalizer");
        let patch = json!({"metadata": {"finalizers": with_finalizer(&finalizers)}});
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        return Ok(Action::await_change());
    }

    let mut manager = ctx.factory.new_manager(&cr);
    manager.sync().await?;

    if deleted {
        if !has_finalizer {
            debug!(%namespace, %name, "resource is terminated, skipping");
            return Ok(Action::await_change());
        }

        match manager.uninstall_release().await {
            Ok(release) => {
                info!(%namespace, %name, release = %release.name, "uninstalled release")
            }
            Err(e) if e.is_release_not_found() => {
                debug!(%namespace, %name, "release already uninstalled")
            }
            Err(e) => return Err(e),
        }

        let patch = json!({"metadata": {"finalizers": without_finalizer(&finalizers)}});
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        return Ok(Action::await_change());
    }

    let mut status = AppStatus::status_for(&cr);
    match manager.plan() {
        ReleaseAction::Install => match manager.install_release().await {
            Ok(release) => {
                info!(%namespace, %name, release = %release.name, "installed release");
                let notes = release.notes.clone().unwrap_or_default();
                status.set_release(Some(release));
                status.set_phase(
                    ResourcePhase::Applied,
                    ConditionReason::ApplySuccessful,
                    notes,
                );
                write_status(&api, &name, &status).await?;
            }
            Err(e) => {
                status.set_phase(ResourcePhase::Failed, ConditionReason::ApplyFailed, e.to_string());
                write_status(&api, &name, &status).await?;
                return Err(e);
            }
        },
        ReleaseAction::Update => match manager.update_release().await {
            Ok((_previous, release)) => {
                info!(%namespace, %name, release = %release.name, version = release.version, "updated release");
                let notes = release.notes.clone().unwrap_or_default();
                status.set_release(Some(release));
                status.set_phase(
                    ResourcePhase::Applied,
                    ConditionReason::ApplySuccessful,
                    notes,
                );
                write_status(&api, &name, &status).await?;
            }
            Err(e) => {
                status.set_phase(ResourcePhase::Failed, ConditionReason::ApplyFailed, e.to_string());
                write_status(&api, &name, &status).await?;
                return Err(e);
            }
        },
        ReleaseAction::Reconcile => {
            // Pure drift repair; the status is left untouched
            let release = manager.reconcile_release().await?;
            debug!(%namespace, %name, release = %release.name, "reconciled release");
        }
    }

    Ok(Action::requeue(ctx.resync_period))
}

/// Write the status subtree back onto the resource
async fn write_status(
    api: &Api<DynamicObject>,
    name: &str,
    status: &AppStatus,
) -> Result<(), KubeError> {
    let patch = json!({"status": status});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(obj: Arc<DynamicObject>, error: &KubeError, _ctx: Arc<Context>) -> Action {
    warn!(object = %obj.name_any(), %error, "reconcile error, requeuing");
    Action::requeue(ERROR_REQUEUE)
}
