//! PodPlacementConfig Custom Resource Definition
//!
//! Per-namespace placement preferences for a subset of pods. Several may
//! coexist in one namespace; they are ordered by a unique priority.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// PodPlacementConfig is the Schema for the podplacementconfigs API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "multiarch.openshift.io",
    version = "v1beta1",
    kind = "PodPlacementConfig",
    namespaced,
    shortname = "ppc",
    printcolumn = r#"{"name":"Priority","type":"integer","jsonPath":".spec.priority"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodPlacementConfigSpec {
    /// Pods this config applies to. An absent selector matches every pod.
    #[serde(default)]
    pub label_selector: Option<LabelSelector>,

    /// Priority among the configs of one namespace, unique per namespace
    #[serde(default)]
    pub priority: u8,

    /// Optional plugins
    #[serde(default)]
    pub plugins: Option<LocalPlugins>,
}

/// Plugins configurable per namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalPlugins {
    #[serde(default)]
    pub node_affinity_scoring: Option<NodeAffinityScoring>,
}

/// Preferred scheduling weights per architecture
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct NodeAffinityScoring {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub platforms: Vec<NodeAffinityScoringPlatformTerm>,
}

/// A single (architecture, weight) term
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct NodeAffinityScoringPlatformTerm {
    pub architecture: Architecture,
    #[schemars(range(min = 1, max = 100))]
    pub weight: i32,
}

/// CPU architectures supported by the placement plugins
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Arm64,
    Amd64,
    Ppc64le,
    S390x,
}

impl Architecture {
    pub const ALL: [Architecture; 4] = [
        Architecture::Arm64,
        Architecture::Amd64,
        Architecture::Ppc64le,
        Architecture::S390x,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::Arm64 => "arm64",
            Architecture::Amd64 => "amd64",
            Architecture::Ppc64le => "ppc64le",
            Architecture::S390x => "s390x",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PodPlacementConfig {
    /// The node affinity scoring block, if declared
    pub fn node_affinity_scoring(&self) -> Option<&NodeAffinityScoring> {
        self.spec
            .plugins
            .as_ref()
            .and_then(|p| p.node_affinity_scoring.as_ref())
    }
}
