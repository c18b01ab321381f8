//! Controllers for the multiarch tuning operator
//!
//! Each controller watches its custom resource and reconciles the cluster
//! towards the state it describes.

mod cluster_pod_placement_config;
mod deletion;
mod enoexec_event;
mod status;

pub use cluster_pod_placement_config::{ClusterPodPlacementConfigController, LifecycleState};
pub use deletion::{count_gated_pods, Barrier, DeletionOrchestrator, TeardownStage};
pub use enoexec_event::{EnoexecEventClient, EnoexecEventController, KubeEnoexecEventClient};
pub use status::{aggregate, deployment_health, DependentHealth, StatusReport};

use crate::error::OperatorError;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Requeue delay while a teardown barrier holds
pub const BARRIER_REQUEUE: Duration = Duration::from_secs(5);

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Per-object exponential backoff: 1s, 2s, 4s, ... capped at 5 minutes
#[derive(Debug, Default)]
pub struct Backoff {
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    /// Delay before the next retry of `key`, counting this failure
    pub fn next(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = attempts.entry(key.to_string()).or_insert(0);
        let delay = BACKOFF_BASE
            .saturating_mul(2u32.saturating_pow(*attempt))
            .min(BACKOFF_MAX);
        *attempt = attempt.saturating_add(1);
        delay
    }

    /// Forget the failures of `key` after a successful reconcile
    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Controllers whose failed reconciles back off exponentially
pub trait HasBackoff {
    fn backoff(&self) -> &Backoff;
}

/// Backoff key of an object: `namespace/name`, or `name` when cluster-scoped
pub fn backoff_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

/// Error policy shared by the controllers.
///
/// Barriers are expected while a teardown is in progress and are retried on
/// a short fixed delay; anything else backs off exponentially.
pub fn error_policy_backoff<K, C>(obj: Arc<K>, error: &OperatorError, ctx: Arc<C>) -> Action
where
    K: Resource,
    C: HasBackoff,
{
    let key = backoff_key(obj.as_ref());
    if error.is_barrier() {
        debug!(object = %key, reason = %error, "Teardown barrier not satisfied yet");
        return Action::requeue(BARRIER_REQUEUE);
    }
    let delay = ctx.backoff().next(&key);
    warn!(object = %key, error = %error, retry_in = ?delay, "Reconciliation failed");
    Action::requeue(delay)
}
