//! Custom Resource Definitions for the multiarch tuning operator
//!
//! - ClusterPodPlacementConfig: cluster-wide singleton driving the operands
//! - PodPlacementConfig: per-namespace placement preferences
//! - ENoExecEvent: transient exec-format-error report

mod cluster_pod_placement_config;
mod enoexec_event;
mod pod_placement_config;

pub use cluster_pod_placement_config::{
    ClusterPlugins, ClusterPodPlacementConfig, ClusterPodPlacementConfigSpec,
    ClusterPodPlacementConfigStatus, ConfigCondition, LogVerbosity, PluginToggle,
    CLUSTER_POD_PLACEMENT_CONFIG_NAME,
};
pub use enoexec_event::{ENoExecEvent, ENoExecEventSpec};
pub use pod_placement_config::{
    Architecture, LocalPlugins, NodeAffinityScoring, NodeAffinityScoringPlatformTerm,
    PodPlacementConfig, PodPlacementConfigSpec,
};

/// Render every CRD this operator serves as a multi-document YAML stream
pub fn crds_yaml() -> Result<String, serde_yaml::Error> {
    use kube::CustomResourceExt;

    let docs = [
        serde_yaml::to_string(&ClusterPodPlacementConfig::crd())?,
        serde_yaml::to_string(&PodPlacementConfig::crd())?,
        serde_yaml::to_string(&ENoExecEvent::crd())?,
    ];
    Ok(docs.join("---\n"))
}
