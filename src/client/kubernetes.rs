//! [`ClusterClient`] over a live `kube::Client`

use super::ClusterClient;
use crate::config::FIELD_MANAGER;
use crate::crd::{ClusterPodPlacementConfig, ClusterPodPlacementConfigStatus, ENoExecEvent};
use crate::error::{OperatorError, Result};
use crate::objects::{service_monitor_resource, ManagedObject, ObjectKey, ObjectKind};
use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

const PAGE_SIZE: u32 = 500;

/// Runs `$op(api, name)` against the typed API matching the key's kind
macro_rules! with_api {
    ($self:ident, $key:ident, $op:ident) => {
        match $key.kind {
            ObjectKind::Deployment => $op($self.namespaced::<Deployment>($key)?, &$key.name).await,
            ObjectKind::DaemonSet => $op($self.namespaced::<DaemonSet>($key)?, &$key.name).await,
            ObjectKind::Service => $op($self.namespaced::<Service>($key)?, &$key.name).await,
            ObjectKind::ServiceAccount => {
                $op($self.namespaced::<ServiceAccount>($key)?, &$key.name).await
            }
            ObjectKind::Role => $op($self.namespaced::<Role>($key)?, &$key.name).await,
            ObjectKind::RoleBinding => $op($self.namespaced::<RoleBinding>($key)?, &$key.name).await,
            ObjectKind::ClusterRole => {
                $op(Api::<ClusterRole>::all($self.client.clone()), &$key.name).await
            }
            ObjectKind::ClusterRoleBinding => {
                $op(Api::<ClusterRoleBinding>::all($self.client.clone()), &$key.name).await
            }
            ObjectKind::MutatingWebhookConfiguration => {
                $op(
                    Api::<MutatingWebhookConfiguration>::all($self.client.clone()),
                    &$key.name,
                )
                .await
            }
            ObjectKind::ValidatingWebhookConfiguration => {
                $op(
                    Api::<ValidatingWebhookConfiguration>::all($self.client.clone()),
                    &$key.name,
                )
                .await
            }
            ObjectKind::ServiceMonitor => $op($self.service_monitors($key)?, &$key.name).await,
        }
    };
}

#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, key: &ObjectKey) -> Result<Api<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or_else(|| OperatorError::InvalidState(format!("{} has no namespace", key)))?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }

    fn service_monitors(&self, key: &ObjectKey) -> Result<Api<DynamicObject>> {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or_else(|| OperatorError::InvalidState(format!("{} has no namespace", key)))?;
        Ok(Api::namespaced_with(
            self.client.clone(),
            namespace,
            &service_monitor_resource(),
        ))
    }
}

/// Patch an existing object with server-side apply, create it otherwise
async fn apply_object<K>(api: Api<K>, object: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = object.name_any();
    match api.get_opt(&name).await? {
        Some(_) => {
            api.patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            )
            .await?;
        }
        None => {
            api.create(&PostParams::default(), object).await?;
        }
    }
    Ok(())
}

async fn delete_object<K>(api: Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::background()).await?;
    Ok(())
}

async fn object_exists<K>(api: Api<K>, name: &str) -> Result<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?.is_some())
}

/// Read-modify-write of the finalizer list.
///
/// The merge patch carries the observed `resourceVersion`, so a concurrent
/// writer makes this fail with a conflict instead of being overwritten.
async fn edit_finalizers<K, F>(api: Api<K>, name: &str, edit: F) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    F: FnOnce(&mut Vec<String>) -> bool,
{
    let current = api
        .get_opt(name)
        .await?
        .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
    let mut finalizers = current.finalizers().to_vec();
    if !edit(&mut finalizers) {
        return Ok(());
    }
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": current.resource_version(),
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn insert(finalizer: &str) -> impl FnOnce(&mut Vec<String>) -> bool + '_ {
    move |finalizers| {
        if finalizers.iter().any(|f| f == finalizer) {
            return false;
        }
        finalizers.push(finalizer.to_string());
        true
    }
}

fn remove(finalizer: &str) -> impl FnOnce(&mut Vec<String>) -> bool + '_ {
    move |finalizers| {
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        finalizers.len() != before
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, object: &ManagedObject) -> Result<()> {
        let key = object.key();
        debug!(object = %key, "Applying");
        match object {
            ManagedObject::Deployment(o) => apply_object(self.namespaced(&key)?, o).await,
            ManagedObject::DaemonSet(o) => apply_object(self.namespaced(&key)?, o).await,
            ManagedObject::Service(o) => apply_object(self.namespaced(&key)?, o).await,
            ManagedObject::ServiceAccount(o) => apply_object(self.namespaced(&key)?, o).await,
            ManagedObject::Role(o) => apply_object(self.namespaced(&key)?, o).await,
            ManagedObject::RoleBinding(o) => apply_object(self.namespaced(&key)?, o).await,
            ManagedObject::ClusterRole(o) => apply_object(Api::all(self.client.clone()), o).await,
            ManagedObject::ClusterRoleBinding(o) => {
                apply_object(Api::all(self.client.clone()), o).await
            }
            ManagedObject::MutatingWebhookConfiguration(o) => {
                apply_object(Api::all(self.client.clone()), o).await
            }
            ManagedObject::ValidatingWebhookConfiguration(o) => {
                apply_object(Api::all(self.client.clone()), o).await
            }
            ManagedObject::ServiceMonitor(o) => {
                apply_object(self.service_monitors(&key)?, o).await
            }
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        info!(object = %key, "Deleting");
        with_api!(self, key, delete_object)
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        with_api!(self, key, object_exists)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(deployments.get_opt(name).await?)
    }

    async fn add_config_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let configs: Api<ClusterPodPlacementConfig> = Api::all(self.client.clone());
        edit_finalizers(configs, name, insert(finalizer)).await
    }

    async fn remove_config_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let configs: Api<ClusterPodPlacementConfig> = Api::all(self.client.clone());
        edit_finalizers(configs, name, remove(finalizer)).await
    }

    async fn remove_deployment_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<()> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        edit_finalizers(deployments, name, remove(finalizer)).await
    }

    async fn patch_config_status(
        &self,
        name: &str,
        status: &ClusterPodPlacementConfigStatus,
    ) -> Result<()> {
        let configs: Api<ClusterPodPlacementConfig> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        configs
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_pending_pods(&self) -> Result<Vec<Pod>> {
        let pods_api: Api<Pod> = Api::all(self.client.clone());
        let mut params = ListParams::default()
            .fields("status.phase=Pending")
            .limit(PAGE_SIZE);
        let mut pods = Vec::new();
        loop {
            let page = pods_api.list(&params).await?;
            pods.extend(page.items);
            match page.metadata.continue_ {
                Some(token) if !token.is_empty() => params = params.continue_token(&token),
                _ => break,
            }
        }
        Ok(pods)
    }

    async fn count_enoexec_events(&self, namespace: &str) -> Result<usize> {
        let events: Api<ENoExecEvent> = Api::namespaced(self.client.clone(), namespace);
        Ok(events.list(&ListParams::default()).await?.items.len())
    }

    async fn monitoring_available(&self) -> Result<bool> {
        match self
            .client
            .list_api_group_resources("monitoring.coreos.com/v1")
            .await
        {
            Ok(list) => Ok(list.resources.iter().any(|r| r.name == "servicemonitors")),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
