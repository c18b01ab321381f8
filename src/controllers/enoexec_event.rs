//! ENoExecEvent Controller
//!
//! Consumes the records written by the exec-format-error daemon: the
//! affected pod gets a Warning event and a label, then the record is
//! deleted. Each record is handled once; a record whose pod is gone is
//! deleted straight away.

use super::{error_policy_backoff, Backoff, HasBackoff};
use crate::crd::{ENoExecEvent, ENoExecEventSpec};
use crate::error::{ignore_not_found, OperatorError, Result};
use crate::events::{reasons, EventPublisher};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config;
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Label set on pods that hit an exec format error
pub const EXEC_FORMAT_ERROR_LABEL: &str = "multiarch.openshift.io/exec-format-error";

/// Cluster operations the handler performs
#[async_trait]
pub trait EnoexecEventClient: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Mark the pod with [`EXEC_FORMAT_ERROR_LABEL`]
    async fn label_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_record(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`EnoexecEventClient`] over a live `kube::Client`
pub struct KubeEnoexecEventClient {
    client: Client,
}

impl KubeEnoexecEventClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EnoexecEventClient for KubeEnoexecEventClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.get_opt(name).await?)
    }

    async fn label_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.patch(name, &PatchParams::default(), &Patch::Merge(&label_patch()))
            .await?;
        Ok(())
    }

    async fn delete_record(&self, namespace: &str, name: &str) -> Result<()> {
        let records: Api<ENoExecEvent> = Api::namespaced(self.client.clone(), namespace);
        records.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Context for the ENoExecEvent controller
pub struct EnoexecEventController {
    client: Arc<dyn EnoexecEventClient>,
    events: Arc<dyn EventPublisher>,
    namespace: String,
    backoff: Backoff,
}

impl HasBackoff for EnoexecEventController {
    fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl EnoexecEventController {
    pub fn new(
        client: Arc<dyn EnoexecEventClient>,
        events: Arc<dyn EventPublisher>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            events,
            namespace: namespace.into(),
            backoff: Backoff::default(),
        }
    }

    /// Run the controller until shutdown is signalled
    pub async fn run(self: Arc<Self>, kube: Client) -> Result<()> {
        let records: Api<ENoExecEvent> = Api::namespaced(kube, &self.namespace);

        info!(namespace = %self.namespace, "Starting ENoExecEvent controller");

        Controller::new(records, Config::default())
            .shutdown_on_signal()
            .run(
                |record, ctx| async move { ctx.reconcile(record).await },
                |record, error, ctx| error_policy_backoff(record, error, ctx),
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                if let Err(e) = result {
                    debug!(error = ?e, "ENoExecEvent reconciliation did not complete");
                }
            })
            .await;

        Ok(())
    }

    async fn reconcile(&self, record: Arc<ENoExecEvent>) -> std::result::Result<Action, OperatorError> {
        let name = record.name_any();
        let spec = &record.spec;

        match self.client.get_pod(&spec.pod_namespace, &spec.pod_name).await? {
            Some(pod) => {
                info!(
                    pod = %spec.pod_name,
                    namespace = %spec.pod_namespace,
                    node = %spec.node_name,
                    "Exec format error reported"
                );
                self.events
                    .publish(
                        &pod.object_ref(&()),
                        EventType::Warning,
                        reasons::EXEC_FORMAT_ERROR,
                        "Detect",
                        Some(event_note(spec)),
                    )
                    .await;
                ignore_not_found(self.client.label_pod(&spec.pod_namespace, &spec.pod_name).await)?;
            }
            None => {
                debug!(pod = %spec.pod_name, namespace = %spec.pod_namespace, "Pod already gone");
            }
        }

        let namespace = record.namespace().unwrap_or_else(|| self.namespace.clone());
        ignore_not_found(self.client.delete_record(&namespace, &name).await)?;

        self.backoff.reset(&super::backoff_key(record.as_ref()));
        Ok(Action::await_change())
    }
}

/// Human-readable note of the Warning event
fn event_note(spec: &ENoExecEventSpec) -> String {
    let mut note = format!(
        "Container {} failed on node {} with an exec format error",
        spec.container_id, spec.node_name
    );
    if !spec.command.is_empty() {
        note.push_str(&format!(": {} targets another architecture", spec.command));
    }
    note
}

fn label_patch() -> serde_json::Value {
    serde_json::json!({
        "metadata": {
            "labels": {
                EXEC_FORMAT_ERROR_LABEL: "true"
            }
        }
    })
}
