//! Control-plane access used by the reconciler and the deletion orchestrator
//!
//! Every round trip the core performs goes through [`ClusterClient`], so the
//! state machines can be driven by an in-memory fake in tests.

mod kubernetes;

#[cfg(test)]
pub mod fake;

pub use kubernetes::KubeClusterClient;

use crate::crd::ClusterPodPlacementConfigStatus;
use crate::error::Result;
use crate::objects::{ManagedObject, ObjectKey};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create the object or bring an existing one in line with it
    async fn apply(&self, object: &ManagedObject) -> Result<()>;

    /// Request deletion. A missing object yields `OperatorError::NotFound`.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Whether the object can still be read (terminating objects count)
    async fn exists(&self, key: &ObjectKey) -> Result<bool>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Add a finalizer to a ClusterPodPlacementConfig; no-op when present
    async fn add_config_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Remove a finalizer from a ClusterPodPlacementConfig; no-op when absent
    async fn remove_config_finalizer(&self, name: &str, finalizer: &str) -> Result<()>;

    /// Remove a finalizer from a deployment; no-op when absent
    async fn remove_deployment_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<()>;

    async fn patch_config_status(
        &self,
        name: &str,
        status: &ClusterPodPlacementConfigStatus,
    ) -> Result<()>;

    /// All pods cluster-wide in the Pending phase
    async fn list_pending_pods(&self) -> Result<Vec<Pod>>;

    /// Number of ENoExecEvents still present in `namespace`
    async fn count_enoexec_events(&self, namespace: &str) -> Result<usize>;

    /// Whether the cluster serves ServiceMonitors
    async fn monitoring_available(&self) -> Result<bool>;
}
