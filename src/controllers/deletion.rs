//! Ordered, barrier-gated teardown of the ClusterPodPlacementConfig
//!
//! Teardown is a fixed sequence of [`TeardownStage`]s. Each stage is
//! idempotent; an "await" stage whose condition does not hold yet returns a
//! [`Barrier`] error, and the next reconcile replays the sequence from the
//! top. Finished stages are cheap no-ops on replay since deleting a missing
//! object or removing an absent finalizer succeeds.
//!
//! The plugin stages run first whenever the plugin finalizer is present, so
//! the plugin and primary barriers never wait on each other.

use crate::client::ClusterClient;
use crate::conditions::{PLUGIN_FINALIZER, PRIMARY_FINALIZER, SCHEDULING_GATE};
use crate::crd::ClusterPodPlacementConfig;
use crate::error::{ignore_not_found, OperatorError, Result};
use crate::objects::{
    DesiredState, ObjectKey, ObjectKind, ObjectSetBuilder, ENOEXEC_DAEMON,
    POD_PLACEMENT_CONTROLLER, POD_PLACEMENT_WEBHOOK,
};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A teardown precondition that does not hold yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Barrier {
    /// The exec-format-error daemonset is still terminating
    PluginDaemonSetTerminating,
    /// ENoExecEvents are still waiting for their handler
    EventRecordsRemaining(usize),
    /// The webhook service can still be resolved
    WebhookStillServing,
    /// Pods still carry the scheduling gate
    PodsStillGated(usize),
}

impl fmt::Display for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Barrier::PluginDaemonSetTerminating => {
                write!(f, "the {} daemonset is still terminating", ENOEXEC_DAEMON)
            }
            Barrier::EventRecordsRemaining(n) => {
                write!(f, "{} ENoExecEvent records still exist", n)
            }
            Barrier::WebhookStillServing => write!(
                f,
                "waiting for hook interruption: the {} service is still reachable",
                POD_PLACEMENT_WEBHOOK
            ),
            Barrier::PodsStillGated(n) => write!(
                f,
                "waiting for ungating: {} pods still carry the scheduling gate",
                n
            ),
        }
    }
}

/// One step of the teardown sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStage {
    DeletePluginDaemon,
    AwaitDaemonSetGone,
    AwaitEventRecordsDrained,
    ReleasePlugin,
    DeleteWebhook,
    AwaitWebhookUnreachable,
    AwaitPodsUngated,
    ReleasePrimary,
    DeleteRemaining,
}

impl TeardownStage {
    pub const PLUGIN: [TeardownStage; 4] = [
        TeardownStage::DeletePluginDaemon,
        TeardownStage::AwaitDaemonSetGone,
        TeardownStage::AwaitEventRecordsDrained,
        TeardownStage::ReleasePlugin,
    ];

    pub const PRIMARY: [TeardownStage; 5] = [
        TeardownStage::DeleteWebhook,
        TeardownStage::AwaitWebhookUnreachable,
        TeardownStage::AwaitPodsUngated,
        TeardownStage::ReleasePrimary,
        TeardownStage::DeleteRemaining,
    ];

    /// Full deletion sequence for a config
    pub fn plan(plugin_finalizer_held: bool) -> Vec<TeardownStage> {
        let mut stages = Vec::with_capacity(Self::PLUGIN.len() + Self::PRIMARY.len());
        if plugin_finalizer_held {
            stages.extend(Self::PLUGIN);
        }
        stages.extend(Self::PRIMARY);
        stages
    }
}

/// Number of pods carrying the scheduling gate installed by the webhook
pub fn count_gated_pods(pods: &[Pod]) -> usize {
    pods.iter()
        .filter(|pod| {
            pod.spec
                .as_ref()
                .and_then(|s| s.scheduling_gates.as_ref())
                .is_some_and(|gates| gates.iter().any(|g| g.name == SCHEDULING_GATE))
        })
        .count()
}

pub struct DeletionOrchestrator {
    client: Arc<dyn ClusterClient>,
    builder: Arc<dyn ObjectSetBuilder>,
}

impl DeletionOrchestrator {
    pub fn new(client: Arc<dyn ClusterClient>, builder: Arc<dyn ObjectSetBuilder>) -> Self {
        Self { client, builder }
    }

    /// Run the full deletion sequence. `Ok` means every finalizer is gone.
    pub async fn run(&self, cppc: &ClusterPodPlacementConfig, desired: &DesiredState) -> Result<()> {
        let name = cppc.name_any();
        for stage in TeardownStage::plan(cppc.has_finalizer(PLUGIN_FINALIZER)) {
            self.step(stage, &name, desired).await?;
        }
        info!(name = %name, "ClusterPodPlacementConfig teardown complete");
        Ok(())
    }

    /// Remove the plugin while the config itself stays
    pub async fn teardown_plugin(&self, name: &str, desired: &DesiredState) -> Result<()> {
        for stage in TeardownStage::PLUGIN {
            self.step(stage, name, desired).await?;
        }
        info!(name = %name, "Exec format error monitor removed");
        Ok(())
    }

    async fn step(&self, stage: TeardownStage, name: &str, desired: &DesiredState) -> Result<()> {
        debug!(stage = ?stage, "Running teardown stage");
        let ns = desired.namespace.as_str();
        match stage {
            TeardownStage::DeletePluginDaemon => {
                self.delete_all(self.builder.exec_format_error_daemon(desired).iter().map(|o| o.key()))
                    .await
            }
            TeardownStage::AwaitDaemonSetGone => {
                let key = ObjectKey::namespaced(ObjectKind::DaemonSet, ns, ENOEXEC_DAEMON);
                if self.client.exists(&key).await? {
                    return Err(Barrier::PluginDaemonSetTerminating.into());
                }
                Ok(())
            }
            TeardownStage::AwaitEventRecordsDrained => {
                let remaining = self.client.count_enoexec_events(ns).await?;
                if remaining > 0 {
                    return Err(Barrier::EventRecordsRemaining(remaining).into());
                }
                Ok(())
            }
            TeardownStage::ReleasePlugin => {
                ignore_not_found(
                    self.client
                        .remove_deployment_finalizer(ns, POD_PLACEMENT_CONTROLLER, PLUGIN_FINALIZER)
                        .await,
                )?;
                self.delete_all(self.builder.exec_format_error_handler(desired).iter().map(|o| o.key()))
                    .await?;
                ignore_not_found(self.client.remove_config_finalizer(name, PLUGIN_FINALIZER).await)
            }
            TeardownStage::DeleteWebhook => {
                let webhook = self.builder.pod_placement_webhook(desired);
                let keys = std::iter::once(self.builder.mutating_webhook_configuration(desired).key())
                    .chain(webhook.iter().map(|o| o.key()));
                self.delete_all(keys).await
            }
            TeardownStage::AwaitWebhookUnreachable => {
                let key = ObjectKey::namespaced(ObjectKind::Service, ns, POD_PLACEMENT_WEBHOOK);
                match self.client.exists(&key).await {
                    Ok(false) => Ok(()),
                    Ok(true) => Err(Barrier::WebhookStillServing.into()),
                    Err(e) => {
                        debug!(error = %e, "Webhook service lookup failed");
                        Err(Barrier::WebhookStillServing.into())
                    }
                }
            }
            TeardownStage::AwaitPodsUngated => {
                let gated = count_gated_pods(&self.client.list_pending_pods().await?);
                if gated > 0 {
                    return Err(Barrier::PodsStillGated(gated).into());
                }
                Ok(())
            }
            TeardownStage::ReleasePrimary => {
                ignore_not_found(
                    self.client
                        .remove_deployment_finalizer(ns, POD_PLACEMENT_CONTROLLER, PRIMARY_FINALIZER)
                        .await,
                )?;
                ignore_not_found(self.client.remove_config_finalizer(name, PRIMARY_FINALIZER).await)
            }
            TeardownStage::DeleteRemaining => {
                let mut objects = self.builder.pod_placement_controller(desired);
                objects.extend(self.builder.pod_placement_config_validating_webhook(desired));
                if desired.monitoring {
                    objects.extend(self.builder.service_monitors(desired));
                }
                self.delete_all(objects.iter().map(|o| o.key())).await
            }
        }
    }

    /// Delete every key, treating "not found" as done. Returns the first
    /// other failure after all deletions were attempted.
    async fn delete_all(&self, keys: impl Iterator<Item = ObjectKey> + Send) -> Result<()> {
        let mut first_error: Option<OperatorError> = None;
        for key in keys {
            if let Err(e) = ignore_not_found(self.client.delete(&key).await) {
                warn!(object = %key, error = %e, "Failed to delete");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
