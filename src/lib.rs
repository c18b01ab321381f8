//! Multiarch Tuning Operator
//!
//! Provisions architecture-aware pod placement on a Kubernetes cluster and
//! validates per-namespace placement preferences.
//!
//! ## Custom Resources
//!
//! - `ClusterPodPlacementConfig`: cluster-scoped singleton named `cluster`.
//!   Its presence deploys the pod placement controller, the pod placement
//!   webhook and their registration; its deletion tears them down in order.
//! - `PodPlacementConfig`: namespaced placement preferences, checked by the
//!   validating admission webhook.
//! - `ENoExecEvent`: exec-format-error report written by the monitor plugin.
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: multiarch.openshift.io/v1beta1
//! kind: ClusterPodPlacementConfig
//! metadata:
//!   name: cluster
//! spec:
//!   logVerbosity: Normal
//!   plugins:
//!     execFormatErrorMonitor:
//!       enabled: true
//! ```

pub mod client;
pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod events;
pub mod health;
pub mod leader_election;
pub mod logging;
pub mod objects;
pub mod webhook;

pub use client::{ClusterClient, KubeClusterClient};
pub use config::OperatorConfig;
pub use controllers::{ClusterPodPlacementConfigController, DeletionOrchestrator, EnoexecEventController};
pub use crd::{
    ClusterPodPlacementConfig, ClusterPodPlacementConfigSpec, ClusterPodPlacementConfigStatus,
    ENoExecEvent, LogVerbosity, PodPlacementConfig, PodPlacementConfigSpec,
};
pub use error::{OperatorError, Result};
pub use objects::{DefaultObjectSetBuilder, ObjectSetBuilder};
