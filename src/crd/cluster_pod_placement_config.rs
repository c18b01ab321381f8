//! ClusterPodPlacementConfig Custom Resource Definition
//!
//! The cluster-wide singleton that drives provisioning of the pod placement
//! operands. Only the object named [`CLUSTER_POD_PLACEMENT_CONFIG_NAME`] is
//! acted upon.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the one ClusterPodPlacementConfig the operator reconciles
pub const CLUSTER_POD_PLACEMENT_CONFIG_NAME: &str = "cluster";

/// ClusterPodPlacementConfig is the Schema for the clusterpodplacementconfigs API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "multiarch.openshift.io",
    version = "v1beta1",
    kind = "ClusterPodPlacementConfig",
    status = "ClusterPodPlacementConfigStatus",
    shortname = "cppc",
    printcolumn = r#"{"name":"Verbosity","type":"string","jsonPath":".spec.logVerbosity"}"#,
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPodPlacementConfigSpec {
    /// Verbosity of the operator and its operands
    #[serde(default)]
    pub log_verbosity: LogVerbosity,

    /// Namespaces whose pods are subject to architecture-aware placement.
    /// An absent selector matches every namespace.
    #[serde(default)]
    pub namespace_selector: Option<LabelSelector>,

    /// Optional plugins
    #[serde(default)]
    pub plugins: Option<ClusterPlugins>,
}

/// Plugins that can be toggled cluster-wide
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPlugins {
    /// Monitor that reports containers failing with an exec format error
    #[serde(default)]
    pub exec_format_error_monitor: Option<PluginToggle>,
}

/// A plugin with no settings beyond being on or off
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct PluginToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// Log verbosity shared by the operator and its operands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum LogVerbosity {
    #[default]
    Normal,
    Debug,
    Trace,
    TraceAll,
}

impl LogVerbosity {
    /// Numeric level handed to operands on their command line
    pub fn as_level(self) -> u8 {
        match self {
            LogVerbosity::Normal => 0,
            LogVerbosity::Debug => 1,
            LogVerbosity::Trace => 2,
            LogVerbosity::TraceAll => 3,
        }
    }

    /// Inverse of [`as_level`](Self::as_level); levels above 3 saturate
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => LogVerbosity::Normal,
            1 => LogVerbosity::Debug,
            2 => LogVerbosity::Trace,
            _ => LogVerbosity::TraceAll,
        }
    }
}

/// Status of the ClusterPodPlacementConfig
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPodPlacementConfigStatus {
    /// Conditions representing operand state
    #[serde(default)]
    pub conditions: Vec<ConfigCondition>,
    /// Last observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Condition of the ClusterPodPlacementConfig
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl ClusterPodPlacementConfig {
    /// Whether the exec-format-error monitor plugin is requested
    pub fn exec_format_error_monitor_enabled(&self) -> bool {
        self.spec
            .plugins
            .as_ref()
            .and_then(|p| p.exec_format_error_monitor.as_ref())
            .is_some_and(|m| m.enabled)
    }

    /// Whether the given finalizer token is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|f| f == finalizer)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
