//! Kubernetes-standard status condition helpers
//!
//! Condition types, reasons and message templates reported on the
//! ClusterPodPlacementConfig, plus the finalizer and scheduling gate tokens.
//! The token values are persisted on live objects; renaming one requires a
//! migration.

use crate::crd::ConfigCondition;
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

// ClusterPodPlacementConfig condition types
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_DEGRADED: &str = "Degraded";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_DEPROVISIONING: &str = "Deprovisioning";
pub const CONDITION_CONTROLLER_NOT_ROLLED_OUT: &str = "PodPlacementControllerNotRolledOut";
pub const CONDITION_WEBHOOK_NOT_ROLLED_OUT: &str = "PodPlacementWebhookNotRolledOut";
pub const CONDITION_MUTATING_WEBHOOK_NOT_AVAILABLE: &str =
    "MutatingWebhookConfigurationNotAvailable";

// Finalizer names
pub const PRIMARY_FINALIZER: &str = "finalizers.multiarch.openshift.io/pod-placement";
pub const PLUGIN_FINALIZER: &str = "finalizers.multiarch.openshift.io/enoexec-events";

/// Gate written onto end-user pods by the pod placement webhook
pub const SCHEDULING_GATE: &str = "multiarch.openshift.io/scheduling-gate";

/// "" when the statement holds, "not " otherwise
pub fn polarity(holds: bool) -> &'static str {
    if holds {
        ""
    } else {
        "not "
    }
}

pub fn available_message(available: bool) -> String {
    format!(
        "The cluster pod placement config operand is {}available",
        polarity(available)
    )
}

pub fn degraded_message(degraded: bool) -> String {
    format!(
        "The cluster pod placement config operand is {}degraded",
        polarity(degraded)
    )
}

pub fn progressing_message(progressing: bool) -> String {
    format!(
        "The cluster pod placement config operand is {}progressing",
        polarity(progressing)
    )
}

pub fn deprovisioning_message(deprovisioning: bool) -> String {
    format!(
        "The cluster pod placement config operand is {}being deprovisioned",
        polarity(deprovisioning)
    )
}

pub fn controller_not_rolled_out_message(not_rolled_out: bool) -> String {
    format!(
        "The pod placement controller is {}fully rolled out",
        polarity(!not_rolled_out)
    )
}

pub fn webhook_not_rolled_out_message(not_rolled_out: bool) -> String {
    format!(
        "The pod placement web hook is {}fully rolled out",
        polarity(!not_rolled_out)
    )
}

pub fn mutating_webhook_not_available_message(not_available: bool) -> String {
    format!(
        "The mutating webhook configuration is {}available",
        polarity(!not_available)
    )
}

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: bool,
    reason: &str,
    message: &str,
) -> ConfigCondition {
    ConfigCondition {
        r#type: condition_type.to_string(),
        status: if status { CONDITION_TRUE } else { CONDITION_FALSE }.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<ConfigCondition>, new: ConfigCondition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

/// Whether the condition of the given type is present and True
pub fn is_condition_true(conditions: &[ConfigCondition], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.r#type == condition_type && c.status == CONDITION_TRUE)
}
