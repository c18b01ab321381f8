//! ClusterPodPlacementConfig Controller
//!
//! Provisions the pod placement controller, the pod placement webhook and
//! the optional exec-format-error monitor for the `cluster` singleton, and
//! drives their teardown through the [`DeletionOrchestrator`].

use super::deletion::DeletionOrchestrator;
use super::status::{aggregate, deployment_health, DependentHealth, StatusReport};
use super::{error_policy_backoff, Backoff, HasBackoff};
use crate::client::ClusterClient;
use crate::conditions::{PLUGIN_FINALIZER, PRIMARY_FINALIZER};
use crate::config::OperatorConfig;
use crate::crd::{ClusterPodPlacementConfig, CLUSTER_POD_PLACEMENT_CONFIG_NAME};
use crate::error::{ignore_not_found, OperatorError, Result};
use crate::logging::LogLevelControl;
use crate::objects::{
    set_owner_references, DesiredState, ManagedObject, ObjectSetBuilder,
    POD_PLACEMENT_CONTROLLER, POD_PLACEMENT_WEBHOOK,
};
use futures::StreamExt;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a ClusterPodPlacementConfig is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Exists without the primary finalizer
    Uninitialized,
    /// Primary finalizer present, not being deleted
    Active,
    /// Being deleted while finalizers remain
    Deprovisioning,
    /// Being deleted with every finalizer cleared
    Gone,
}

impl LifecycleState {
    pub fn of(cppc: &ClusterPodPlacementConfig) -> Self {
        let primary = cppc.has_finalizer(PRIMARY_FINALIZER);
        if cppc.is_deleting() {
            if primary || cppc.has_finalizer(PLUGIN_FINALIZER) {
                LifecycleState::Deprovisioning
            } else {
                LifecycleState::Gone
            }
        } else if primary {
            LifecycleState::Active
        } else {
            LifecycleState::Uninitialized
        }
    }
}

/// Context for the ClusterPodPlacementConfig controller
pub struct ClusterPodPlacementConfigController {
    client: Arc<dyn ClusterClient>,
    builder: Arc<dyn ObjectSetBuilder>,
    deletion: DeletionOrchestrator,
    log_level: Arc<dyn LogLevelControl>,
    config: OperatorConfig,
    backoff: Backoff,
}

impl HasBackoff for ClusterPodPlacementConfigController {
    fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl ClusterPodPlacementConfigController {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        builder: Arc<dyn ObjectSetBuilder>,
        log_level: Arc<dyn LogLevelControl>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            deletion: DeletionOrchestrator::new(client.clone(), builder.clone()),
            client,
            builder,
            log_level,
            config,
            backoff: Backoff::default(),
        }
    }

    /// Run the controller until shutdown is signalled
    pub async fn run(self: Arc<Self>, kube: Client) -> Result<()> {
        let configs: Api<ClusterPodPlacementConfig> = Api::all(kube.clone());
        let namespace = self.config.namespace.as_str();

        info!(namespace = %namespace, "Starting ClusterPodPlacementConfig controller");

        Controller::new(configs, Config::default())
            .owns(
                Api::<Deployment>::namespaced(kube.clone(), namespace),
                Config::default(),
            )
            .owns(
                Api::<DaemonSet>::namespaced(kube.clone(), namespace),
                Config::default(),
            )
            .owns(
                Api::<Service>::namespaced(kube.clone(), namespace),
                Config::default(),
            )
            .owns(
                Api::<MutatingWebhookConfiguration>::all(kube.clone()),
                Config::default(),
            )
            .owns(
                Api::<ValidatingWebhookConfiguration>::all(kube),
                Config::default(),
            )
            .shutdown_on_signal()
            .run(
                |cppc, ctx| async move { ctx.reconcile(cppc).await },
                |cppc, error, ctx| error_policy_backoff(cppc, error, ctx),
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!(name = %obj.name, "Reconciled ClusterPodPlacementConfig");
                    }
                    Err(e) => {
                        debug!(error = ?e, "Reconciliation did not complete");
                    }
                }
            })
            .await;

        Ok(())
    }

    /// Reconcile a ClusterPodPlacementConfig
    async fn reconcile(&self, cppc: Arc<ClusterPodPlacementConfig>) -> Result<Action> {
        let name = cppc.name_any();
        if name != CLUSTER_POD_PLACEMENT_CONFIG_NAME {
            warn!(
                name = %name,
                "Ignoring ClusterPodPlacementConfig, only '{}' is reconciled",
                CLUSTER_POD_PLACEMENT_CONFIG_NAME
            );
            return Ok(Action::await_change());
        }

        let state = LifecycleState::of(&cppc);
        debug!(name = %name, state = ?state, "Reconciling ClusterPodPlacementConfig");

        let action = match state {
            LifecycleState::Uninitialized => {
                // Nothing else happens in this pass: the finalizer must be
                // committed before the first dependent exists.
                self.client
                    .add_config_finalizer(&name, PRIMARY_FINALIZER)
                    .await?;
                info!(name = %name, "Added pod placement finalizer");
                Action::requeue(Duration::ZERO)
            }
            LifecycleState::Active => self.reconcile_active(&cppc).await?,
            LifecycleState::Deprovisioning => self.reconcile_deprovisioning(&cppc).await?,
            LifecycleState::Gone => Action::await_change(),
        };

        self.backoff.reset(&name);
        Ok(action)
    }

    async fn reconcile_active(&self, cppc: &ClusterPodPlacementConfig) -> Result<Action> {
        let name = cppc.name_any();

        if let Err(e) = self.log_level.set_verbosity(cppc.spec.log_verbosity) {
            warn!(error = %e, "Failed to apply log verbosity");
        }

        if cppc.exec_format_error_monitor_enabled() && !cppc.has_finalizer(PLUGIN_FINALIZER) {
            self.client
                .add_config_finalizer(&name, PLUGIN_FINALIZER)
                .await?;
            info!(name = %name, "Added exec format error monitor finalizer");
            return Ok(Action::requeue(Duration::ZERO));
        }

        let desired = self.desired_state(cppc).await;
        let mut errors = Vec::new();

        let mut primary = self.builder.pod_placement_controller(&desired);
        primary.extend(self.builder.pod_placement_webhook(&desired));
        primary.extend(self.builder.pod_placement_config_validating_webhook(&desired));
        if desired.monitoring {
            primary.extend(self.builder.service_monitors(&desired));
        }
        self.apply_all(cppc, primary, &mut errors).await;

        if desired.exec_format_error_monitor {
            let mut plugin = self.builder.exec_format_error_daemon(&desired);
            plugin.extend(self.builder.exec_format_error_handler(&desired));
            self.apply_all(cppc, plugin, &mut errors).await;
        } else if desired.plugin_finalizer_held {
            if let Err(e) = self.deletion.teardown_plugin(&name, &desired).await {
                errors.push(e);
            }
        }

        let mut report = StatusReport {
            controller: self.health(POD_PLACEMENT_CONTROLLER, &mut errors).await,
            webhook: self.health(POD_PLACEMENT_WEBHOOK, &mut errors).await,
            ..Default::default()
        };
        report.mutating_webhook_configured = self
            .reconcile_mutating_webhook(cppc, &desired, report.gate(), &mut errors)
            .await;
        self.write_status(cppc, &report, &mut errors).await;

        match first_error(errors) {
            Some(e) => Err(e),
            None if report.gate() => Ok(Action::requeue(Duration::from_secs(300))),
            None => Ok(Action::requeue(Duration::from_secs(30))),
        }
    }

    async fn reconcile_deprovisioning(&self, cppc: &ClusterPodPlacementConfig) -> Result<Action> {
        info!(name = %cppc.name_any(), "Deprovisioning ClusterPodPlacementConfig");
        let desired = self.desired_state(cppc).await;

        let mut errors = Vec::new();
        let report = StatusReport {
            controller: self.health(POD_PLACEMENT_CONTROLLER, &mut errors).await,
            webhook: self.health(POD_PLACEMENT_WEBHOOK, &mut errors).await,
            mutating_webhook_configured: false,
            deprovisioning: true,
        };
        self.write_status(cppc, &report, &mut errors).await;
        for e in errors {
            debug!(error = %e, "Ignoring status error during teardown");
        }

        self.deletion.run(cppc, &desired).await?;
        Ok(Action::await_change())
    }

    async fn desired_state(&self, cppc: &ClusterPodPlacementConfig) -> DesiredState {
        let monitoring = match self.client.monitoring_available().await {
            Ok(available) => available,
            Err(e) => {
                warn!(error = %e, "Monitoring API discovery failed, skipping ServiceMonitors");
                false
            }
        };
        DesiredState::new(cppc, &self.config, monitoring)
    }

    /// Apply every object, collecting failures instead of stopping at the
    /// first one.
    async fn apply_all(
        &self,
        cppc: &ClusterPodPlacementConfig,
        mut objects: Vec<ManagedObject>,
        errors: &mut Vec<OperatorError>,
    ) {
        if let Err(e) = set_owner_references(&mut objects, cppc) {
            warn!(error = %e, "Owner references incomplete");
            errors.push(e);
        }
        for object in &objects {
            if let Err(e) = self.client.apply(object).await {
                warn!(object = %object.key(), error = %e, "Failed to apply");
                errors.push(e);
            }
        }
    }

    async fn health(&self, name: &str, errors: &mut Vec<OperatorError>) -> DependentHealth {
        match self
            .client
            .get_deployment(&self.config.namespace, name)
            .await
        {
            Ok(deployment) => deployment_health(deployment.as_ref()),
            Err(e) if e.is_not_found() => DependentHealth::default(),
            Err(e) => {
                errors.push(e);
                DependentHealth::default()
            }
        }
    }

    /// Install the hook registration when the gate is open, remove it
    /// otherwise. Returns whether the registration is in place.
    async fn reconcile_mutating_webhook(
        &self,
        cppc: &ClusterPodPlacementConfig,
        desired: &DesiredState,
        gate: bool,
        errors: &mut Vec<OperatorError>,
    ) -> bool {
        let mwc = self.builder.mutating_webhook_configuration(desired);
        if gate {
            let mut objects = vec![mwc];
            if let Err(e) = set_owner_references(&mut objects, cppc) {
                errors.push(e);
            }
            match self.client.apply(&objects[0]).await {
                Ok(()) => true,
                Err(e) => {
                    errors.push(e);
                    false
                }
            }
        } else {
            match ignore_not_found(self.client.delete(&mwc.key()).await) {
                Ok(()) => false,
                Err(e) => {
                    errors.push(e);
                    true
                }
            }
        }
    }

    /// Write the status if it changed. Failures are recorded, never fatal.
    async fn write_status(
        &self,
        cppc: &ClusterPodPlacementConfig,
        report: &StatusReport,
        errors: &mut Vec<OperatorError>,
    ) {
        let status = aggregate(cppc.status.as_ref(), report, cppc.metadata.generation);
        if cppc.status.as_ref() == Some(&status) {
            debug!("Status unchanged");
            return;
        }
        if let Err(e) = self
            .client
            .patch_config_status(&cppc.name_any(), &status)
            .await
        {
            warn!(error = %e, "Failed to update status");
            errors.push(e);
        }
    }
}

/// Prefer an actual failure over a barrier so the error policy backs off
fn first_error(errors: Vec<OperatorError>) -> Option<OperatorError> {
    let index = errors
        .iter()
        .position(|e| !e.is_barrier())
        .unwrap_or(0);
    errors.into_iter().nth(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClusterClient;
    use crate::conditions::{
        is_condition_true, CONDITION_AVAILABLE, CONDITION_DEGRADED, CONDITION_DEPROVISIONING,
        CONDITION_MUTATING_WEBHOOK_NOT_AVAILABLE, CONDITION_PROGRESSING,
    };
    use crate::controllers::Barrier;
    use crate::crd::{ClusterPlugins, LogVerbosity, PluginToggle};
    use crate::logging::RecordingLogLevel;
    use crate::objects::{
        DefaultObjectSetBuilder, ObjectKey, ObjectKind, ENOEXEC_DAEMON, ENOEXEC_HANDLER,
        MUTATING_WEBHOOK_CONFIGURATION, OPERATOR_WEBHOOK_SERVICE, VALIDATING_WEBHOOK_CONFIGURATION,
    };

    const NS: &str = "openshift-multiarch-tuning-operator";

    struct Harness {
        fake: Arc<FakeClusterClient>,
        log_level: Arc<RecordingLogLevel>,
        controller: ClusterPodPlacementConfigController,
    }

    impl Harness {
        fn new(cppc: ClusterPodPlacementConfig) -> Self {
            let fake = Arc::new(FakeClusterClient::with_config(cppc));
            let log_level = Arc::new(RecordingLogLevel::default());
            let controller = ClusterPodPlacementConfigController::new(
                fake.clone(),
                Arc::new(DefaultObjectSetBuilder),
                log_level.clone(),
                OperatorConfig::default(),
            );
            Self {
                fake,
                log_level,
                controller,
            }
        }

        async fn reconcile(&self) -> Result<Action> {
            let cppc = self.fake.config().expect("config exists");
            self.controller.reconcile(Arc::new(cppc)).await
        }

        fn set_plugin(&self, enabled: bool) {
            let mut state = self.fake.state();
            let cppc = state.config.as_mut().unwrap();
            cppc.spec.plugins = Some(ClusterPlugins {
                exec_format_error_monitor: Some(PluginToggle { enabled }),
            });
        }

        fn conditions(&self) -> Vec<crate::crd::ConfigCondition> {
            self.fake
                .config()
                .and_then(|c| c.status)
                .map(|s| s.conditions)
                .unwrap_or_default()
        }

        fn deployment_finalizers(&self) -> Vec<String> {
            let key = ObjectKey::namespaced(ObjectKind::Deployment, NS, POD_PLACEMENT_CONTROLLER);
            match self.fake.state().objects.get(&key) {
                Some(ManagedObject::Deployment(d)) => {
                    d.metadata.finalizers.clone().unwrap_or_default()
                }
                _ => Vec::new(),
            }
        }

        /// Reconcile until the config carries its finalizers and the
        /// dependents exist
        async fn provision(&self) {
            for _ in 0..3 {
                self.reconcile().await.unwrap();
            }
        }
    }

    fn cluster_config() -> ClusterPodPlacementConfig {
        let mut cppc =
            ClusterPodPlacementConfig::new(CLUSTER_POD_PLACEMENT_CONFIG_NAME, Default::default());
        cppc.metadata.uid = Some("uid-1".to_string());
        cppc
    }

    fn key(kind: ObjectKind, name: &str) -> ObjectKey {
        ObjectKey::namespaced(kind, NS, name)
    }

    #[test]
    fn test_lifecycle_state() {
        let mut cppc = cluster_config();
        assert_eq!(LifecycleState::of(&cppc), LifecycleState::Uninitialized);

        cppc.metadata.finalizers = Some(vec![PRIMARY_FINALIZER.to_string()]);
        assert_eq!(LifecycleState::of(&cppc), LifecycleState::Active);

        cppc.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            chrono::Utc::now(),
        ));
        assert_eq!(LifecycleState::of(&cppc), LifecycleState::Deprovisioning);

        cppc.metadata.finalizers = Some(vec![PLUGIN_FINALIZER.to_string()]);
        assert_eq!(LifecycleState::of(&cppc), LifecycleState::Deprovisioning);

        cppc.metadata.finalizers = None;
        assert_eq!(LifecycleState::of(&cppc), LifecycleState::Gone);
    }

    #[test]
    fn test_first_error_prefers_failures() {
        let errors = vec![
            OperatorError::Barrier(Barrier::EventRecordsRemaining(1)),
            OperatorError::KubeApi("boom".to_string()),
        ];
        assert!(!first_error(errors).unwrap().is_barrier());
        assert!(first_error(vec![]).is_none());
    }

    #[tokio::test]
    async fn test_finalizer_is_added_before_anything_else() {
        let h = Harness::new(cluster_config());

        let action = h.reconcile().await.unwrap();

        assert_eq!(action, Action::requeue(Duration::ZERO));
        assert!(h.fake.config().unwrap().has_finalizer(PRIMARY_FINALIZER));
        assert!(h.fake.state().objects.is_empty());
        assert!(!h.fake.calls().iter().any(|c| c.starts_with("apply")));
    }

    #[tokio::test]
    async fn test_other_names_are_ignored() {
        let cppc = ClusterPodPlacementConfig::new("not-cluster", Default::default());
        let h = Harness::new(cppc.clone());

        let action = h.controller.reconcile(Arc::new(cppc)).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_active_provisions_dependents() {
        let h = Harness::new(cluster_config());
        h.reconcile().await.unwrap();
        h.reconcile().await.unwrap();

        for name in [POD_PLACEMENT_CONTROLLER, POD_PLACEMENT_WEBHOOK] {
            assert!(h.fake.has(&key(ObjectKind::Deployment, name)));
            assert!(h.fake.has(&key(ObjectKind::ServiceAccount, name)));
        }
        let owners = h.fake.state().objects[&key(ObjectKind::Service, POD_PLACEMENT_WEBHOOK)]
            .meta()
            .owner_references
            .clone()
            .unwrap();
        assert_eq!(owners[0].uid, "uid-1");

        // Nothing is rolled out yet, so pods must not be gated
        let mwc = ObjectKey::cluster(
            ObjectKind::MutatingWebhookConfiguration,
            MUTATING_WEBHOOK_CONFIGURATION,
        );
        assert!(!h.fake.has(&mwc));
        let conditions = h.conditions();
        assert!(is_condition_true(&conditions, CONDITION_PROGRESSING));
        assert!(!is_condition_true(&conditions, CONDITION_AVAILABLE));
    }

    #[tokio::test]
    async fn test_end_to_end_available_then_deleted() {
        let h = Harness::new(cluster_config());
        h.reconcile().await.unwrap();
        h.reconcile().await.unwrap();

        h.fake.roll_out(NS, POD_PLACEMENT_CONTROLLER);
        h.fake.roll_out(NS, POD_PLACEMENT_WEBHOOK);
        let action = h.reconcile().await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));

        let mwc = ObjectKey::cluster(
            ObjectKind::MutatingWebhookConfiguration,
            MUTATING_WEBHOOK_CONFIGURATION,
        );
        assert!(h.fake.has(&mwc));
        let conditions = h.conditions();
        assert!(is_condition_true(&conditions, CONDITION_AVAILABLE));
        assert!(!is_condition_true(&conditions, CONDITION_PROGRESSING));
        assert!(!is_condition_true(&conditions, CONDITION_DEGRADED));

        // Steady state does not rewrite the status
        let writes = h.fake.state().status_writes;
        h.reconcile().await.unwrap();
        assert_eq!(h.fake.state().status_writes, writes);

        h.fake.mark_config_deleting();
        let action = h.reconcile().await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.fake.config().is_none());
        assert!(h.fake.state().objects.is_empty());
    }

    #[tokio::test]
    async fn test_active_registers_pod_placement_config_validation() {
        let h = Harness::new(cluster_config());
        h.provision().await;

        let vwc = ObjectKey::cluster(
            ObjectKind::ValidatingWebhookConfiguration,
            VALIDATING_WEBHOOK_CONFIGURATION,
        );
        // Registered from the first active pass, without waiting on the gate
        assert!(h.fake.has(&vwc));
        assert!(h.fake.has(&key(ObjectKind::Service, OPERATOR_WEBHOOK_SERVICE)));
        let owners = h.fake.state().objects[&vwc].meta().owner_references.clone().unwrap();
        assert_eq!(owners[0].uid, "uid-1");
    }

    #[tokio::test]
    async fn test_closing_gate_removes_hook_once() {
        let h = Harness::new(cluster_config());
        h.provision().await;
        h.fake.roll_out(NS, POD_PLACEMENT_CONTROLLER);
        h.fake.roll_out(NS, POD_PLACEMENT_WEBHOOK);
        h.reconcile().await.unwrap();

        let mwc = ObjectKey::cluster(
            ObjectKind::MutatingWebhookConfiguration,
            MUTATING_WEBHOOK_CONFIGURATION,
        );
        assert!(h.fake.has(&mwc));

        h.fake.state().deployment_status.clear();
        let before = h.fake.calls().len();
        h.reconcile().await.unwrap();

        assert!(!h.fake.has(&mwc));
        let hook_calls = h.fake.calls()[before..]
            .iter()
            .filter(|c| c.contains("MutatingWebhookConfiguration"))
            .count();
        assert_eq!(hook_calls, 1);

        let conditions = h.conditions();
        assert!(is_condition_true(&conditions, CONDITION_MUTATING_WEBHOOK_NOT_AVAILABLE));
        assert!(!is_condition_true(&conditions, CONDITION_AVAILABLE));
        // It was serving before, so losing every replica degrades it
        assert!(is_condition_true(&conditions, CONDITION_DEGRADED));
    }

    #[tokio::test]
    async fn test_deprovisioning_reports_condition_while_blocked() {
        let h = Harness::new(cluster_config());
        h.provision().await;
        h.fake.add_gated_pod("shop", "web-0", crate::conditions::SCHEDULING_GATE);
        h.fake.mark_config_deleting();

        let err = h.reconcile().await.unwrap_err();

        assert!(err.is_barrier());
        let cppc = h.fake.config().unwrap();
        assert!(cppc.has_finalizer(PRIMARY_FINALIZER));
        assert!(is_condition_true(
            &cppc.status.unwrap().conditions,
            CONDITION_DEPROVISIONING
        ));
    }

    #[tokio::test]
    async fn test_log_verbosity_follows_spec() {
        let mut cppc = cluster_config();
        cppc.spec.log_verbosity = LogVerbosity::Trace;
        let h = Harness::new(cppc);
        h.provision().await;

        assert_eq!(
            h.log_level.applied.lock().unwrap().as_slice(),
            &[LogVerbosity::Trace]
        );
    }

    #[tokio::test]
    async fn test_enabling_plugin_adds_finalizer_before_dependents() {
        let h = Harness::new(cluster_config());
        h.provision().await;
        h.set_plugin(true);

        let action = h.reconcile().await.unwrap();
        assert_eq!(action, Action::requeue(Duration::ZERO));
        assert!(h.fake.config().unwrap().has_finalizer(PLUGIN_FINALIZER));
        assert!(!h.fake.has(&key(ObjectKind::DaemonSet, ENOEXEC_DAEMON)));

        h.reconcile().await.unwrap();
        assert!(h.fake.has(&key(ObjectKind::DaemonSet, ENOEXEC_DAEMON)));
        assert!(h.fake.has(&key(ObjectKind::Role, ENOEXEC_HANDLER)));
        assert!(h
            .deployment_finalizers()
            .contains(&PLUGIN_FINALIZER.to_string()));
    }

    #[tokio::test]
    async fn test_disabling_plugin_leaves_primary_dependents() {
        let h = Harness::new(cluster_config());
        h.provision().await;
        h.set_plugin(true);
        h.reconcile().await.unwrap();
        h.reconcile().await.unwrap();

        h.set_plugin(false);
        h.reconcile().await.unwrap();

        assert!(!h.fake.has(&key(ObjectKind::DaemonSet, ENOEXEC_DAEMON)));
        assert!(!h.fake.has(&key(ObjectKind::Role, ENOEXEC_HANDLER)));
        assert!(!h.fake.config().unwrap().has_finalizer(PLUGIN_FINALIZER));
        assert!(h.fake.config().unwrap().has_finalizer(PRIMARY_FINALIZER));
        assert_eq!(h.deployment_finalizers(), vec![PRIMARY_FINALIZER.to_string()]);
        assert!(h.fake.has(&key(ObjectKind::Deployment, POD_PLACEMENT_CONTROLLER)));
        assert!(h.fake.has(&key(ObjectKind::Deployment, POD_PLACEMENT_WEBHOOK)));
    }

    #[tokio::test]
    async fn test_plugin_disable_waits_for_event_records() {
        let h = Harness::new(cluster_config());
        h.provision().await;
        h.set_plugin(true);
        h.reconcile().await.unwrap();
        h.reconcile().await.unwrap();
        h.fake.state().enoexec_events.insert(NS.to_string(), 1);

        h.set_plugin(false);
        let err = h.reconcile().await.unwrap_err();

        assert!(err.is_barrier());
        assert!(h.fake.config().unwrap().has_finalizer(PLUGIN_FINALIZER));
        // Status is still written on a blocked pass
        assert!(h.fake.config().unwrap().status.is_some());
    }

    #[tokio::test]
    async fn test_apply_failure_still_writes_status() {
        let h = Harness::new(cluster_config());
        h.reconcile().await.unwrap();
        h.fake.fail("apply", "etcd leader changed");

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err, OperatorError::KubeApi(_)));
        assert_eq!(h.fake.state().status_writes, 1);
    }

    #[tokio::test]
    async fn test_missing_uid_is_reported_but_not_fatal_for_status() {
        let mut cppc = cluster_config();
        cppc.metadata.uid = None;
        cppc.metadata.finalizers = Some(vec![PRIMARY_FINALIZER.to_string()]);
        let h = Harness::new(cppc);

        let err = h.reconcile().await.unwrap_err();

        assert!(matches!(err, OperatorError::OwnerReferences(_)));
        assert_eq!(h.fake.state().status_writes, 1);
    }
}
