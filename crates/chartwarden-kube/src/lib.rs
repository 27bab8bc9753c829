//! Chartwarden Kube - Kubernetes integration for the chart operator
//!
//! This crate provides:
//! - **Release records**: versioned, persisted snapshots of rendered charts
//! - **Storage drivers**: in-memory (default) and Kubernetes Secrets
//! - **Owner propagation**: a renderer wrapper stamping controller
//!   references onto every rendered document
//! - **Cluster access**: create / server-side apply / merge-patch / delete
//!   of dynamic objects resolved through API discovery
//! - **Release management**: the install / update / reconcile / uninstall
//!   state machine driven by the operator's reconciler

pub mod error;
pub mod manager;
pub mod ownerref;
pub mod release;
pub mod resources;
pub mod status;
pub mod storage;

pub use error::{KubeError, Result};
pub use manager::{release_name, Manager, ManagerFactory, ReleaseAction};
pub use ownerref::OwnerRefRenderer;
pub use release::{ReleaseStatus, StoredRelease};
pub use resources::{ClusterAccess, KubeCluster, MockCluster};
pub use status::{AppStatus, ConditionReason, ResourcePhase};
pub use storage::{MemoryStore, ReleaseStore, SecretsStore, StorageConfig};
