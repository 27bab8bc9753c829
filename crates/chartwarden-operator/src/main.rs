//! chartwarden - Kubernetes operator turning charts into declaratively
//! managed applications.
//!
//! For each configured watch, a controller reconciles instances of the
//! watched kind into chart releases: render, install, update, drift-repair
//! and uninstall.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use kube::Client;
use tracing::{info, warn};

use chartwarden_kube::{
    ClusterAccess, KubeCluster, ManagerFactory, MemoryStore, ReleaseStore, SecretsStore,
    StorageConfig,
};

mod controller;
mod watches;

/// How often the shared discovery cache is refreshed to pick up newly
/// registered kinds.
const DISCOVERY_REFRESH: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "chartwarden", about = "Chart operator for Kubernetes")]
struct Args {
    /// Namespace to watch; empty watches all namespaces.
    #[arg(long, default_value = "", env = "WATCH_NAMESPACE")]
    watch_namespace: String,

    /// Periodic resync interval in seconds.
    #[arg(long, default_value_t = 5, env = "RESYNC_PERIOD_SECONDS")]
    resync_period_seconds: u64,

    /// Release storage backend.
    #[arg(long, value_enum, default_value_t = StorageBackend::Memory, env = "STORAGE_BACKEND")]
    storage: StorageBackend,

    /// Log format: "text" for human-readable, "json" for structured.
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    log_format: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StorageBackend {
    /// Process-local history, recovered from resource status on restart
    Memory,
    /// History persisted in Kubernetes Secrets
    Secrets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn,hyper=warn,tower=warn".into());
    if args.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let entries = watches::load().context("loading watch configuration")?;

    let client = Client::try_default()
        .await
        .context("building Kubernetes client")?;

    let cluster = KubeCluster::new(client.clone())
        .await
        .context("running API discovery")?;
    spawn_discovery_refresh(cluster.clone());

    let store: Arc<dyn ReleaseStore> = match args.storage {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Secrets => Arc::new(SecretsStore::new(
            client.clone(),
            StorageConfig::default(),
        )),
    };

    let namespace = (!args.watch_namespace.is_empty()).then_some(args.watch_namespace.clone());
    let resync_period = Duration::from_secs(args.resync_period_seconds);

    let mut controllers = Vec::with_capacity(entries.len());
    for entry in entries {
        let cluster: Arc<dyn ClusterAccess> = Arc::new(cluster.clone());
        let factory = ManagerFactory::new(
            store.clone(),
            cluster,
            entry.chart.clone(),
            entry.api_resource(),
        );
        controllers.push(controller::run(
            client.clone(),
            factory,
            entry,
            namespace.clone(),
            resync_period,
        ));
    }

    // Runs until the signal handler stops the watches and workers drain.
    futures::future::join_all(controllers).await;
    info!("all controllers stopped");
    Ok(())
}

/// Periodically refresh the shared discovery cache
fn spawn_discovery_refresh(cluster: KubeCluster) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DISCOVERY_REFRESH);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            if let Err(e) = cluster.refresh().await {
                warn!(error = %e, "discovery refresh failed");
            }
        }
    });
}
