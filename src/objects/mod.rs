//! Dependent objects of the ClusterPodPlacementConfig
//!
//! [`ObjectSetBuilder`] maps a [`DesiredState`] to the typed objects that
//! implement it. Builders are pure: no I/O, same input, same output. The
//! reconciler and the deletion orchestrator both derive their object lists
//! from the same builder, so teardown deletes exactly what provisioning
//! created.

mod builder;

pub use builder::DefaultObjectSetBuilder;

use crate::config::OperatorConfig;
use crate::conditions::PLUGIN_FINALIZER;
use crate::crd::{ClusterPodPlacementConfig, LogVerbosity};
use crate::error::{OperatorError, Result};
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Resource, ResourceExt};
use std::fmt;

pub const POD_PLACEMENT_CONTROLLER: &str = "pod-placement-controller";
pub const POD_PLACEMENT_WEBHOOK: &str = "pod-placement-web-hook";
pub const ENOEXEC_DAEMON: &str = "enoexec-event-daemon";
pub const ENOEXEC_HANDLER: &str = "enoexec-event-handler";
pub const MUTATING_WEBHOOK_CONFIGURATION: &str = "pod-placement-mutating-webhook";
pub const OPERATOR_WEBHOOK_SERVICE: &str = "multiarch-tuning-operator-webhook";
pub const VALIDATING_WEBHOOK_CONFIGURATION: &str = "pod-placement-config-validating-webhook";

/// `monitoring.coreos.com/v1` ServiceMonitor, which has no typed binding
pub fn service_monitor_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("monitoring.coreos.com", "v1", "ServiceMonitor");
    ApiResource::from_gvk_with_plural(&gvk, "servicemonitors")
}

/// Kinds of object the operator manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Deployment,
    DaemonSet,
    Service,
    ServiceAccount,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    MutatingWebhookConfiguration,
    ValidatingWebhookConfiguration,
    ServiceMonitor,
}

/// Identity of a managed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(kind: ObjectKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{:?} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{:?} {}", self.kind, self.name),
        }
    }
}

/// A typed object produced by the builder
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    Deployment(Deployment),
    DaemonSet(DaemonSet),
    Service(Service),
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    MutatingWebhookConfiguration(MutatingWebhookConfiguration),
    ValidatingWebhookConfiguration(ValidatingWebhookConfiguration),
    ServiceMonitor(DynamicObject),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::Deployment(_) => ObjectKind::Deployment,
            ManagedObject::DaemonSet(_) => ObjectKind::DaemonSet,
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::ServiceAccount(_) => ObjectKind::ServiceAccount,
            ManagedObject::Role(_) => ObjectKind::Role,
            ManagedObject::RoleBinding(_) => ObjectKind::RoleBinding,
            ManagedObject::ClusterRole(_) => ObjectKind::ClusterRole,
            ManagedObject::ClusterRoleBinding(_) => ObjectKind::ClusterRoleBinding,
            ManagedObject::MutatingWebhookConfiguration(_) => {
                ObjectKind::MutatingWebhookConfiguration
            }
            ManagedObject::ValidatingWebhookConfiguration(_) => {
                ObjectKind::ValidatingWebhookConfiguration
            }
            ManagedObject::ServiceMonitor(_) => ObjectKind::ServiceMonitor,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::Deployment(o) => o.meta(),
            ManagedObject::DaemonSet(o) => o.meta(),
            ManagedObject::Service(o) => o.meta(),
            ManagedObject::ServiceAccount(o) => o.meta(),
            ManagedObject::Role(o) => o.meta(),
            ManagedObject::RoleBinding(o) => o.meta(),
            ManagedObject::ClusterRole(o) => o.meta(),
            ManagedObject::ClusterRoleBinding(o) => o.meta(),
            ManagedObject::MutatingWebhookConfiguration(o) => o.meta(),
            ManagedObject::ValidatingWebhookConfiguration(o) => o.meta(),
            ManagedObject::ServiceMonitor(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::Deployment(o) => o.meta_mut(),
            ManagedObject::DaemonSet(o) => o.meta_mut(),
            ManagedObject::Service(o) => o.meta_mut(),
            ManagedObject::ServiceAccount(o) => o.meta_mut(),
            ManagedObject::Role(o) => o.meta_mut(),
            ManagedObject::RoleBinding(o) => o.meta_mut(),
            ManagedObject::ClusterRole(o) => o.meta_mut(),
            ManagedObject::ClusterRoleBinding(o) => o.meta_mut(),
            ManagedObject::MutatingWebhookConfiguration(o) => o.meta_mut(),
            ManagedObject::ValidatingWebhookConfiguration(o) => o.meta_mut(),
            ManagedObject::ServiceMonitor(o) => &mut o.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey {
            kind: self.kind(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

/// Everything the builder needs to render the dependent set
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub namespace: String,
    pub image: String,
    pub log_verbosity: LogVerbosity,
    pub namespace_selector: Option<LabelSelector>,
    /// The exec-format-error monitor is requested on the singleton
    pub exec_format_error_monitor: bool,
    /// The plugin finalizer is still on the singleton
    pub plugin_finalizer_held: bool,
    /// `monitoring.coreos.com/v1` is served by the cluster
    pub monitoring: bool,
}

impl DesiredState {
    pub fn new(cppc: &ClusterPodPlacementConfig, config: &OperatorConfig, monitoring: bool) -> Self {
        Self {
            namespace: config.namespace.clone(),
            image: config.operand_image.clone(),
            log_verbosity: cppc.spec.log_verbosity,
            namespace_selector: cppc.spec.namespace_selector.clone(),
            exec_format_error_monitor: cppc.exec_format_error_monitor_enabled(),
            plugin_finalizer_held: cppc.has_finalizer(PLUGIN_FINALIZER),
            monitoring,
        }
    }

    /// The controller deployment must keep the plugin finalizer while the
    /// plugin is requested or its teardown has not finished.
    pub fn controller_holds_plugin_finalizer(&self) -> bool {
        self.exec_format_error_monitor || self.plugin_finalizer_held
    }
}

/// Pure functions from desired state to dependent objects
pub trait ObjectSetBuilder: Send + Sync {
    /// Pod placement controller: RBAC, service account, service, deployment
    fn pod_placement_controller(&self, desired: &DesiredState) -> Vec<ManagedObject>;

    /// Pod placement webhook: RBAC, service account, service, deployment
    fn pod_placement_webhook(&self, desired: &DesiredState) -> Vec<ManagedObject>;

    /// Hook registration routing pod creation to the webhook
    fn mutating_webhook_configuration(&self, desired: &DesiredState) -> ManagedObject;

    /// Service in front of the operator's own admission endpoint and the
    /// fail-closed registration routing PodPlacementConfig writes to it
    fn pod_placement_config_validating_webhook(&self, desired: &DesiredState) -> Vec<ManagedObject>;

    /// Exec-format-error daemon: RBAC, service account, daemonset
    fn exec_format_error_daemon(&self, desired: &DesiredState) -> Vec<ManagedObject>;

    /// Permissions letting the controller consume ENoExecEvents
    fn exec_format_error_handler(&self, desired: &DesiredState) -> Vec<ManagedObject>;

    /// ServiceMonitors for the two managed controllers
    fn service_monitors(&self, desired: &DesiredState) -> Vec<ManagedObject>;
}

/// Controller owner reference pointing at the singleton
pub fn owner_reference(cppc: &ClusterPodPlacementConfig) -> Result<OwnerReference> {
    let uid = cppc.metadata.uid.clone().ok_or_else(|| {
        OperatorError::InvalidState(format!("{} has no uid yet", cppc.name_any()))
    })?;
    Ok(OwnerReference {
        api_version: ClusterPodPlacementConfig::api_version(&()).to_string(),
        kind: ClusterPodPlacementConfig::kind(&()).to_string(),
        name: cppc.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Set `owner` as controller of `meta`.
///
/// Fails when another controller already owns the object.
pub fn set_controller_reference(
    meta: &mut ObjectMeta,
    owner: &OwnerReference,
) -> std::result::Result<(), String> {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(format!(
            "{} is already controlled by {} {}",
            meta.name.as_deref().unwrap_or_default(),
            other.kind,
            other.name
        ));
    }
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner.clone());
    Ok(())
}

/// Point every object at the singleton, collecting failures instead of
/// stopping at the first one.
pub fn set_owner_references(
    objects: &mut [ManagedObject],
    cppc: &ClusterPodPlacementConfig,
) -> Result<()> {
    let owner = match owner_reference(cppc) {
        Ok(owner) => owner,
        Err(e) => return Err(OperatorError::OwnerReferences(vec![e.to_string()])),
    };
    let errors: Vec<String> = objects
        .iter_mut()
        .filter_map(|o| set_controller_reference(o.meta_mut(), &owner).err())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(OperatorError::OwnerReferences(errors))
    }
}
