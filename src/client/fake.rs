//! In-memory [`ClusterClient`] that records every call
//!
//! Objects carrying finalizers behave like on a real API server: deleting
//! them only marks them terminating, and they disappear once the last
//! finalizer is removed.

use super::ClusterClient;
use crate::crd::{ClusterPodPlacementConfig, ClusterPodPlacementConfigStatus};
use crate::error::{OperatorError, Result};
use crate::objects::{ManagedObject, ObjectKey, ObjectKind};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Pod, PodSchedulingGate, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct FakeState {
    pub config: Option<ClusterPodPlacementConfig>,
    pub objects: BTreeMap<ObjectKey, ManagedObject>,
    /// Objects that stay terminating after deletion until released
    pub sticky: BTreeSet<ObjectKey>,
    pub deployment_status: BTreeMap<ObjectKey, DeploymentStatus>,
    pub pending_pods: Vec<Pod>,
    pub enoexec_events: BTreeMap<String, usize>,
    pub monitoring: bool,
    /// Operation name to error message; the operation fails until cleared
    pub failures: BTreeMap<&'static str, String>,
    pub calls: Vec<String>,
    pub status_writes: usize,
}

#[derive(Default)]
pub struct FakeClusterClient {
    state: Mutex<FakeState>,
}

impl FakeClusterClient {
    pub fn with_config(config: ClusterPodPlacementConfig) -> Self {
        let fake = Self::default();
        fake.state().config = Some(config);
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn config(&self) -> Option<ClusterPodPlacementConfig> {
        self.state().config.clone()
    }

    pub fn has(&self, key: &ObjectKey) -> bool {
        self.state().objects.contains_key(key)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Simulate the platform marking the config for deletion
    pub fn mark_config_deleting(&self) {
        if let Some(config) = self.state().config.as_mut() {
            config.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    /// Report the deployment as fully rolled out
    pub fn roll_out(&self, namespace: &str, name: &str) {
        let key = ObjectKey::namespaced(ObjectKind::Deployment, namespace, name);
        let mut state = self.state();
        let replicas = match state.objects.get(&key) {
            Some(ManagedObject::Deployment(d)) => {
                d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
            }
            _ => 1,
        };
        state.deployment_status.insert(
            key,
            DeploymentStatus {
                observed_generation: Some(1),
                replicas: Some(replicas),
                updated_replicas: Some(replicas),
                ready_replicas: Some(replicas),
                available_replicas: Some(replicas),
                unavailable_replicas: None,
                ..Default::default()
            },
        );
    }

    pub fn add_gated_pod(&self, namespace: &str, name: &str, gate: &str) {
        self.state().pending_pods.push(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                scheduling_gates: Some(vec![PodSchedulingGate {
                    name: gate.to_string(),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    pub fn fail(&self, operation: &'static str, message: &str) {
        self.state()
            .failures
            .insert(operation, message.to_string());
    }

    pub fn clear_failure(&self, operation: &'static str) {
        self.state().failures.remove(operation);
    }

    /// Let a sticky object finish terminating
    pub fn release(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.sticky.remove(key);
        let terminating = state
            .objects
            .get(key)
            .map(|o| o.meta().deletion_timestamp.is_some())
            .unwrap_or(false);
        if terminating {
            state.objects.remove(key);
        }
    }
}

impl FakeState {
    fn record(&mut self, operation: &'static str, detail: impl std::fmt::Display) -> Result<()> {
        self.calls.push(format!("{} {}", operation, detail));
        match self.failures.get(operation) {
            Some(message) => Err(OperatorError::KubeApi(message.clone())),
            None => Ok(()),
        }
    }

    /// Drop the object once it is terminating with no finalizer left
    fn collect(&mut self, key: &ObjectKey) {
        if self.sticky.contains(key) {
            return;
        }
        let gone = self.objects.get(key).is_some_and(|o| {
            o.meta().deletion_timestamp.is_some()
                && o.meta().finalizers.as_ref().map_or(true, |f| f.is_empty())
        });
        if gone {
            self.objects.remove(key);
        }
    }

    fn edit_config_finalizers(
        &mut self,
        name: &str,
        edit: impl FnOnce(&mut Vec<String>),
    ) -> Result<()> {
        let config = self
            .config
            .as_mut()
            .filter(|c| c.metadata.name.as_deref() == Some(name))
            .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
        edit(config.metadata.finalizers.get_or_insert_with(Vec::new));
        let erased = config.metadata.deletion_timestamp.is_some()
            && config.metadata.finalizers.as_ref().is_some_and(|f| f.is_empty());
        if erased {
            self.config = None;
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn apply(&self, object: &ManagedObject) -> Result<()> {
        let key = object.key();
        let mut state = self.state();
        state.record("apply", &key)?;
        let mut object = object.clone();
        if let Some(existing) = state.objects.get(&key) {
            object.meta_mut().deletion_timestamp = existing.meta().deletion_timestamp.clone();
        }
        state.objects.insert(key, object);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state();
        state.record("delete", key)?;
        let sticky = state.sticky.contains(key);
        let object = state
            .objects
            .get_mut(key)
            .ok_or_else(|| OperatorError::NotFound(key.to_string()))?;
        let has_finalizers = object.meta().finalizers.as_ref().is_some_and(|f| !f.is_empty());
        if has_finalizers || sticky {
            object
                .meta_mut()
                .deletion_timestamp
                .get_or_insert_with(|| Time(Utc::now()));
        } else {
            state.objects.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool> {
        let mut state = self.state();
        state.record("exists", key)?;
        Ok(state.objects.contains_key(key))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let key = ObjectKey::namespaced(ObjectKind::Deployment, namespace, name);
        let mut state = self.state();
        state.record("get_deployment", &key)?;
        let status = state.deployment_status.get(&key).cloned();
        Ok(match state.objects.get(&key) {
            Some(ManagedObject::Deployment(d)) => {
                let mut d = d.clone();
                d.metadata.generation = Some(1);
                d.status = status;
                Some(d)
            }
            _ => None,
        })
    }

    async fn add_config_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let mut state = self.state();
        state.record("add_config_finalizer", finalizer)?;
        state.edit_config_finalizers(name, |f| {
            if !f.iter().any(|x| x == finalizer) {
                f.push(finalizer.to_string());
            }
        })
    }

    async fn remove_config_finalizer(&self, name: &str, finalizer: &str) -> Result<()> {
        let mut state = self.state();
        state.record("remove_config_finalizer", finalizer)?;
        state.edit_config_finalizers(name, |f| f.retain(|x| x != finalizer))
    }

    async fn remove_deployment_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<()> {
        let key = ObjectKey::namespaced(ObjectKind::Deployment, namespace, name);
        let mut state = self.state();
        state.record("remove_deployment_finalizer", format!("{} {}", key, finalizer))?;
        let object = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| OperatorError::NotFound(key.to_string()))?;
        if let Some(finalizers) = object.meta_mut().finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        state.collect(&key);
        Ok(())
    }

    async fn patch_config_status(
        &self,
        name: &str,
        status: &ClusterPodPlacementConfigStatus,
    ) -> Result<()> {
        let mut state = self.state();
        state.record("patch_config_status", name)?;
        let config = state
            .config
            .as_mut()
            .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
        config.status = Some(status.clone());
        state.status_writes += 1;
        Ok(())
    }

    async fn list_pending_pods(&self) -> Result<Vec<Pod>> {
        let mut state = self.state();
        state.record("list_pending_pods", "")?;
        Ok(state.pending_pods.clone())
    }

    async fn count_enoexec_events(&self, namespace: &str) -> Result<usize> {
        let mut state = self.state();
        state.record("count_enoexec_events", namespace)?;
        Ok(state.enoexec_events.get(namespace).copied().unwrap_or(0))
    }

    async fn monitoring_available(&self) -> Result<bool> {
        let mut state = self.state();
        state.record("monitoring_available", "")?;
        Ok(state.monitoring)
    }
}
