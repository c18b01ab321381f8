//! Runtime configuration shared by the operator's components

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "multiarch-tuning-operator";

/// Default operand image when none is configured
pub const DEFAULT_OPERAND_IMAGE: &str = "registry.ci.openshift.org/origin/multiarch-tuning-operator:main";

/// Namespace used when neither a flag nor the service account names one
pub const DEFAULT_NAMESPACE: &str = "openshift-multiarch-tuning-operator";

const SERVICE_ACCOUNT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Values resolved once at start-up and handed to every component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace the operator and its operands run in
    pub namespace: String,
    /// Image used for the operand deployments and daemonset
    pub operand_image: String,
}

impl OperatorConfig {
    pub fn new(namespace: impl Into<String>, operand_image: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operand_image: operand_image.into(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE, DEFAULT_OPERAND_IMAGE)
    }
}

/// Detects the namespace the operator runs in.
///
/// Priority: explicit argument → service account file → `fallback`.
pub fn detect_namespace(explicit: &str, fallback: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
