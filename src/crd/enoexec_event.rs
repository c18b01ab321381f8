//! ENoExecEvent Custom Resource Definition
//!
//! A transient record written by the exec-format-error daemon each time a
//! container fails to start because its binary targets another architecture.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ENoExecEvent is the Schema for the enoexecevents API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "multiarch.openshift.io",
    version = "v1beta1",
    kind = "ENoExecEvent",
    namespaced,
    shortname = "enoexec",
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".spec.nodeName"}"#,
    printcolumn = r#"{"name":"Pod","type":"string","jsonPath":".spec.podName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ENoExecEventSpec {
    pub node_name: String,
    pub pod_name: String,
    pub pod_namespace: String,
    #[serde(rename = "containerID")]
    pub container_id: String,
    /// Command that failed to execute
    #[serde(default)]
    pub command: String,
}
