//! Status aggregation for the ClusterPodPlacementConfig
//!
//! Folds the live state of the managed controllers and the hook registration
//! into the named conditions reported on the singleton.

use crate::conditions::{
    available_message, build_condition, controller_not_rolled_out_message,
    degraded_message, deprovisioning_message, is_condition_true,
    mutating_webhook_not_available_message, progressing_message, set_condition,
    webhook_not_rolled_out_message, CONDITION_AVAILABLE,
    CONDITION_CONTROLLER_NOT_ROLLED_OUT, CONDITION_DEGRADED, CONDITION_DEPROVISIONING,
    CONDITION_MUTATING_WEBHOOK_NOT_AVAILABLE, CONDITION_PROGRESSING,
    CONDITION_WEBHOOK_NOT_ROLLED_OUT,
};
use crate::crd::ClusterPodPlacementConfigStatus;
use k8s_openapi::api::apps::v1::Deployment;

/// Observed health of one managed controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependentHealth {
    /// At least one ready replica
    pub available: bool,
    /// The latest spec is fully rolled out
    pub up_to_date: bool,
}

impl DependentHealth {
    pub fn ready(&self) -> bool {
        self.available && self.up_to_date
    }
}

/// Health of a deployment; a missing deployment is neither available nor
/// up to date.
pub fn deployment_health(deployment: Option<&Deployment>) -> DependentHealth {
    let Some(deployment) = deployment else {
        return DependentHealth::default();
    };
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return DependentHealth::default();
    };

    let available = status.ready_replicas.unwrap_or(0) >= 1;
    let generation = deployment.metadata.generation.unwrap_or(0);
    let up_to_date = status.observed_generation.unwrap_or(0) >= generation
        && status.updated_replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
        && status.replicas.unwrap_or(0) == desired
        && status.unavailable_replicas.unwrap_or(0) == 0;

    DependentHealth {
        available,
        up_to_date,
    }
}

/// Everything a status computation depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub controller: DependentHealth,
    pub webhook: DependentHealth,
    pub mutating_webhook_configured: bool,
    pub deprovisioning: bool,
}

impl StatusReport {
    /// Whether end-user pods may be gated: both managed controllers are
    /// serving the latest spec.
    pub fn gate(&self) -> bool {
        self.controller.ready() && self.webhook.ready()
    }
}

/// Fold the report into `current`, returning the new status.
///
/// Conditions whose value did not change keep their transition time, so an
/// unchanged cluster yields a status equal to `current`.
///
/// Degraded latches once the operand was Available and a managed controller
/// then loses its last ready replica or disappears. It clears when both
/// controllers have a ready replica again. A first rollout never degrades.
pub fn aggregate(
    current: Option<&ClusterPodPlacementConfigStatus>,
    report: &StatusReport,
    generation: Option<i64>,
) -> ClusterPodPlacementConfigStatus {
    let mut status = current.cloned().unwrap_or_default();
    status.observed_generation = generation;

    let controller_not_rolled_out = !report.controller.up_to_date;
    let webhook_not_rolled_out = !report.webhook.up_to_date;
    let mutating_webhook_missing = !report.mutating_webhook_configured;

    let available = report.controller.available
        && report.webhook.available
        && report.mutating_webhook_configured;
    let progressing = !report.deprovisioning
        && (controller_not_rolled_out || webhook_not_rolled_out || mutating_webhook_missing);
    let components_available = report.controller.available && report.webhook.available;
    let was_serving = current.is_some_and(|s| {
        is_condition_true(&s.conditions, CONDITION_AVAILABLE)
            || is_condition_true(&s.conditions, CONDITION_DEGRADED)
    });
    let degraded = !report.deprovisioning && !components_available && was_serving;

    let conditions = &mut status.conditions;
    set_condition(
        conditions,
        build_condition(
            CONDITION_AVAILABLE,
            available,
            if available { "AllComponentsReady" } else { "ComponentsNotReady" },
            &available_message(available),
        ),
    );
    set_condition(
        conditions,
        build_condition(
            CONDITION_PROGRESSING,
            progressing,
            if progressing { "RollingOut" } else { "AsExpected" },
            &progressing_message(progressing),
        ),
    );
    set_condition(
        conditions,
        build_condition(
            CONDITION_DEGRADED,
            degraded,
            if degraded { "ComponentsUnavailable" } else { "AsExpected" },
            &degraded_message(degraded),
        ),
    );
    set_condition(
        conditions,
        build_condition(
            CONDITION_DEPROVISIONING,
            report.deprovisioning,
            if report.deprovisioning { "Deleting" } else { "AsExpected" },
            &deprovisioning_message(report.deprovisioning),
        ),
    );
    set_condition(
        conditions,
        build_condition(
            CONDITION_CONTROLLER_NOT_ROLLED_OUT,
            controller_not_rolled_out,
            if controller_not_rolled_out { "RollingOut" } else { "AllReplicasUpdated" },
            &controller_not_rolled_out_message(controller_not_rolled_out),
        ),
    );
    set_condition(
        conditions,
        build_condition(
            CONDITION_WEBHOOK_NOT_ROLLED_OUT,
            webhook_not_rolled_out,
            if webhook_not_rolled_out { "RollingOut" } else { "AllReplicasUpdated" },
            &webhook_not_rolled_out_message(webhook_not_rolled_out),
        ),
    );
    set_condition(
        conditions,
        build_condition(
            CONDITION_MUTATING_WEBHOOK_NOT_AVAILABLE,
            mutating_webhook_missing,
            if mutating_webhook_missing { "NotInstalled" } else { "Installed" },
            &mutating_webhook_not_available_message(mutating_webhook_missing),
        ),
    );

    status
}
