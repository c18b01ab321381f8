//! PodPlacementConfig validating webhook
//!
//! Enforces that priorities are unique within a namespace and that the node
//! affinity scoring terms are well formed.
//!
//! The uniqueness check reads the sibling list and the write happens later,
//! outside this handler. Two creates racing with the same priority can both
//! be admitted; nothing here serializes them.

use super::WebhookState;
use crate::crd::{NodeAffinityScoring, PodPlacementConfig};
use crate::error::Result;
use async_trait::async_trait;
use axum::{extract::State, Json};
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::TypeMeta;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Path the validating webhook is registered under
pub const VALIDATE_PATH: &str = "/validate-multiarch-openshift-io-v1beta1-podplacementconfig";

const MIN_WEIGHT: i32 = 1;
const MAX_WEIGHT: i32 = 100;

/// Reads the PodPlacementConfigs of a namespace
#[async_trait]
pub trait PodPlacementConfigLister: Send + Sync {
    async fn list(&self, namespace: &str) -> Result<Vec<PodPlacementConfig>>;
}

pub struct KubePodPlacementConfigLister {
    client: Client,
}

impl KubePodPlacementConfigLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodPlacementConfigLister for KubePodPlacementConfigLister {
    async fn list(&self, namespace: &str) -> Result<Vec<PodPlacementConfig>> {
        let configs: Api<PodPlacementConfig> = Api::namespaced(self.client.clone(), namespace);
        Ok(configs.list(&ListParams::default()).await?.items)
    }
}

/// Turns the raw objects of an admission request into PodPlacementConfigs
#[derive(Debug, Clone)]
pub struct Decoder {
    expected: TypeMeta,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            expected: TypeMeta {
                api_version: PodPlacementConfig::api_version(&()).to_string(),
                kind: PodPlacementConfig::kind(&()).to_string(),
            },
        }
    }

    pub fn decode(&self, obj: &DynamicObject) -> std::result::Result<PodPlacementConfig, String> {
        if let Some(types) = &obj.types {
            if types != &self.expected {
                return Err(format!(
                    "expected {}/{}, got {}/{}",
                    self.expected.api_version, self.expected.kind, types.api_version, types.kind
                ));
            }
        }
        let value = serde_json::to_value(obj).map_err(|e| e.to_string())?;
        serde_json::from_value(value).map_err(|e| format!("invalid PodPlacementConfig: {}", e))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the node affinity scoring terms
pub fn validate_platforms(scoring: &NodeAffinityScoring) -> std::result::Result<(), String> {
    if scoring.enabled && scoring.platforms.is_empty() {
        return Err(
            "plugins.nodeAffinityScoring.platforms must have at least one entry when the plugin is enabled"
                .to_string(),
        );
    }
    let mut seen = BTreeSet::new();
    for term in &scoring.platforms {
        if !(MIN_WEIGHT..=MAX_WEIGHT).contains(&term.weight) {
            return Err(format!(
                "weight {} for architecture {} must be between {} and {}",
                term.weight, term.architecture, MIN_WEIGHT, MAX_WEIGHT
            ));
        }
        if !seen.insert(term.architecture) {
            return Err(format!(
                "architecture {} appears more than once in plugins.nodeAffinityScoring.platforms",
                term.architecture
            ));
        }
    }
    Ok(())
}

/// Decide a create or update against the other configs of the namespace.
///
/// `siblings` may include the object itself; it is never compared with its
/// own name. Objects already being deleted do not hold their priority.
pub fn validate_request(
    operation: &Operation,
    new: &PodPlacementConfig,
    old: Option<&PodPlacementConfig>,
    siblings: &[PodPlacementConfig],
) -> std::result::Result<(), String> {
    if let Some(scoring) = new.node_affinity_scoring() {
        validate_platforms(scoring)?;
    }

    let name = new.name_any();
    let priority = new.spec.priority;
    let conflict = siblings.iter().find(|s| {
        s.meta().deletion_timestamp.is_none()
            && s.name_any() != name
            && s.spec.priority == priority
    });

    let Some(conflict) = conflict else {
        return Ok(());
    };
    let must_be_unique = match operation {
        Operation::Create => true,
        // Keeping an unchanged priority is always allowed
        Operation::Update => old.map_or(true, |o| o.spec.priority != priority),
        _ => false,
    };
    if must_be_unique {
        return Err(format!(
            "priority {} is already used by PodPlacementConfig {} in namespace {}",
            priority,
            conflict.name_any(),
            conflict.namespace().unwrap_or_default()
        ));
    }
    Ok(())
}

/// Handle validating admission review for PodPlacementConfigs
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(validate(&state, &req).await.into_review())
}

async fn validate(state: &WebhookState, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let response = AdmissionResponse::from(req);
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return response;
    }

    let decoder = state.decoder();
    let Some(obj) = req.object.as_ref() else {
        return response.deny("request carries no object");
    };
    let new = match decoder.decode(obj) {
        Ok(config) => config,
        Err(reason) => return response.deny(reason),
    };
    let old = match (&req.operation, req.old_object.as_ref()) {
        (Operation::Update, Some(obj)) => match decoder.decode(obj) {
            Ok(config) => Some(config),
            Err(reason) => return response.deny(reason),
        },
        _ => None,
    };

    // An empty namespace would list every PodPlacementConfig in the cluster
    let Some(namespace) = req
        .namespace
        .clone()
        .or_else(|| new.namespace())
        .filter(|ns| !ns.is_empty())
    else {
        return response.deny("PodPlacementConfig must be namespaced");
    };
    let siblings = match state.lister().list(&namespace).await {
        Ok(siblings) => siblings,
        Err(e) => {
            warn!(uid = %req.uid, namespace = %namespace, error = %e, "Cannot list PodPlacementConfigs");
            return response.deny(format!("cannot list PodPlacementConfigs: {}", e));
        }
    };

    match validate_request(&req.operation, &new, old.as_ref(), &siblings) {
        Ok(()) => {
            debug!(uid = %req.uid, name = %new.name_any(), "PodPlacementConfig admitted");
            response
        }
        Err(reason) => {
            info!(uid = %req.uid, name = %new.name_any(), namespace = %namespace, reason = %reason, "PodPlacementConfig denied");
            response.deny(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        Architecture, LocalPlugins, NodeAffinityScoringPlatformTerm, PodPlacementConfigSpec,
    };
    use crate::error::OperatorError;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn ppc(name: &str, priority: u8) -> PodPlacementConfig {
        let mut config = PodPlacementConfig::new(
            name,
            PodPlacementConfigSpec {
                priority,
                ..Default::default()
            },
        );
        config.metadata.namespace = Some("shop".to_string());
        config
    }

    fn with_platforms(mut config: PodPlacementConfig, enabled: bool, terms: &[(Architecture, i32)]) -> PodPlacementConfig {
        config.spec.plugins = Some(LocalPlugins {
            node_affinity_scoring: Some(NodeAffinityScoring {
                enabled,
                platforms: terms
                    .iter()
                    .map(|(architecture, weight)| NodeAffinityScoringPlatformTerm {
                        architecture: *architecture,
                        weight: *weight,
                    })
                    .collect(),
            }),
        });
        config
    }

    struct StaticLister(Vec<PodPlacementConfig>);

    #[async_trait]
    impl PodPlacementConfigLister for StaticLister {
        async fn list(&self, namespace: &str) -> Result<Vec<PodPlacementConfig>> {
            Ok(self
                .0
                .iter()
                .filter(|c| c.namespace().as_deref() == Some(namespace))
                .cloned()
                .collect())
        }
    }

    /// Records every namespace it is asked to list
    #[derive(Default)]
    struct RecordingLister(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl PodPlacementConfigLister for RecordingLister {
        async fn list(&self, namespace: &str) -> Result<Vec<PodPlacementConfig>> {
            self.0.lock().unwrap().push(namespace.to_string());
            Ok(Vec::new())
        }
    }

    struct FailingLister;

    #[async_trait]
    impl PodPlacementConfigLister for FailingLister {
        async fn list(&self, _namespace: &str) -> Result<Vec<PodPlacementConfig>> {
            Err(OperatorError::KubeApi("connection refused".to_string()))
        }
    }

    #[test]
    fn test_create_with_taken_priority_is_denied() {
        let siblings = vec![ppc("a", 5)];
        let err = validate_request(&Operation::Create, &ppc("b", 5), None, &siblings).unwrap_err();
        assert!(err.contains("priority 5"));
        assert!(validate_request(&Operation::Create, &ppc("b", 6), None, &siblings).is_ok());
    }

    #[test]
    fn test_update_onto_sibling_priority_is_denied() {
        let siblings = vec![ppc("a", 5), ppc("b", 6)];
        let res = validate_request(&Operation::Update, &ppc("b", 5), Some(&ppc("b", 6)), &siblings);
        assert!(res.is_err());
    }

    #[test]
    fn test_update_keeping_priority_always_allowed() {
        // A duplicate left behind by a racing create does not block edits
        let siblings = vec![ppc("a", 5), ppc("b", 5)];
        let res = validate_request(&Operation::Update, &ppc("b", 5), Some(&ppc("b", 5)), &siblings);
        assert!(res.is_ok());
    }

    #[test]
    fn test_update_does_not_collide_with_itself() {
        let siblings = vec![ppc("a", 5)];
        let res = validate_request(&Operation::Update, &ppc("a", 7), Some(&ppc("a", 5)), &siblings);
        assert!(res.is_ok());
    }

    #[test]
    fn test_recreate_after_delete() {
        let mut terminating = ppc("a", 5);
        terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(validate_request(&Operation::Create, &ppc("a", 5), None, &[terminating]).is_ok());
        assert!(validate_request(&Operation::Create, &ppc("a", 5), None, &[]).is_ok());
    }

    #[test]
    fn test_delete_always_allowed() {
        let siblings = vec![ppc("a", 5)];
        assert!(validate_request(&Operation::Delete, &ppc("b", 5), None, &siblings).is_ok());
    }

    #[test]
    fn test_platform_terms() {
        let base = || ppc("a", 1);
        let check = |config: PodPlacementConfig| {
            validate_request(&Operation::Create, &config, None, &[])
        };

        assert!(check(with_platforms(base(), true, &[(Architecture::Arm64, 50)])).is_ok());
        assert!(check(with_platforms(base(), true, &[(Architecture::Arm64, 0)])).is_err());
        assert!(check(with_platforms(base(), true, &[(Architecture::Arm64, 101)])).is_err());
        assert!(check(with_platforms(base(), true, &[])).is_err());
        assert!(check(with_platforms(base(), false, &[])).is_ok());
        assert!(check(with_platforms(
            base(),
            true,
            &[(Architecture::Amd64, 10), (Architecture::Amd64, 20)]
        ))
        .is_err());
        assert!(check(with_platforms(base(), false, &[(Architecture::S390x, 0)])).is_err());
    }

    #[test]
    fn test_decoder_rejects_unknown_architecture() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "multiarch.openshift.io/v1beta1",
            "kind": "PodPlacementConfig",
            "metadata": {"name": "a", "namespace": "shop"},
            "spec": {
                "priority": 1,
                "plugins": {"nodeAffinityScoring": {"enabled": true, "platforms": [
                    {"architecture": "riscv64", "weight": 10}
                ]}}
            }
        }))
        .unwrap();
        assert!(Decoder::new().decode(&obj).is_err());
    }

    #[test]
    fn test_decoder_rejects_other_kinds() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "a"}
        }))
        .unwrap();
        assert!(Decoder::new().decode(&obj).unwrap_err().contains("expected"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decoder_is_built_once() {
        let state = Arc::new(WebhookState::new(Arc::new(StaticLister(vec![]))));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { state.decoder() as *const Decoder as usize })
            })
            .collect();
        let mut addresses = BTreeSet::new();
        for handle in handles {
            addresses.insert(handle.await.unwrap());
        }
        assert_eq!(addresses.len(), 1);
    }

    fn review(operation: &str, object: serde_json::Value, old: Option<serde_json::Value>) -> AdmissionReview<DynamicObject> {
        let name = object["metadata"]["name"].clone();
        serde_json::from_value(serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "multiarch.openshift.io", "version": "v1beta1", "kind": "PodPlacementConfig"},
                "resource": {"group": "multiarch.openshift.io", "version": "v1beta1", "resource": "podplacementconfigs"},
                "name": name,
                "namespace": "shop",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old,
                "dryRun": false
            }
        }))
        .unwrap()
    }

    fn object(name: &str, priority: u8) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "multiarch.openshift.io/v1beta1",
            "kind": "PodPlacementConfig",
            "metadata": {"name": name, "namespace": "shop"},
            "spec": {"priority": priority}
        })
    }

    async fn allowed(lister: Arc<dyn PodPlacementConfigLister>, review: AdmissionReview<DynamicObject>) -> bool {
        let state = Arc::new(WebhookState::new(lister));
        let Json(response) = validate_handler(State(state), Json(review)).await;
        response.response.unwrap().allowed
    }

    #[tokio::test]
    async fn test_handler_denies_duplicate_create() {
        let lister = Arc::new(StaticLister(vec![ppc("a", 3)]));
        assert!(!allowed(lister.clone(), review("CREATE", object("b", 3), None)).await);
        assert!(allowed(lister, review("CREATE", object("b", 4), None)).await);
    }

    #[tokio::test]
    async fn test_handler_update_paths() {
        let lister = Arc::new(StaticLister(vec![ppc("a", 3), ppc("b", 4)]));
        assert!(!allowed(lister.clone(), review("UPDATE", object("b", 3), Some(object("b", 4)))).await);
        assert!(allowed(lister, review("UPDATE", object("b", 4), Some(object("b", 4)))).await);
    }

    #[tokio::test]
    async fn test_handler_allows_delete() {
        let review = review("DELETE", object("a", 3), None);
        assert!(allowed(Arc::new(FailingLister), review).await);
    }

    #[tokio::test]
    async fn test_handler_fails_closed_when_listing_fails() {
        assert!(!allowed(Arc::new(FailingLister), review("CREATE", object("a", 3), None)).await);
    }

    #[tokio::test]
    async fn test_handler_denies_out_of_range_priority() {
        let mut obj = object("a", 0);
        obj["spec"]["priority"] = serde_json::json!(300);
        assert!(!allowed(Arc::new(StaticLister(vec![])), review("CREATE", obj, None)).await);
    }

    #[tokio::test]
    async fn test_handler_denies_request_without_namespace() {
        let mut obj = object("a", 3);
        obj["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("namespace");
        let mut review = review("CREATE", obj, None);
        review.request.as_mut().unwrap().namespace = None;

        let lister = Arc::new(RecordingLister::default());
        assert!(!allowed(lister.clone(), review).await);
        assert!(lister.0.lock().unwrap().is_empty(), "nothing may be listed cluster-wide");
    }

    #[tokio::test]
    async fn test_handler_lists_only_the_request_namespace() {
        let lister = Arc::new(RecordingLister::default());
        assert!(allowed(lister.clone(), review("CREATE", object("a", 3), None)).await);
        assert_eq!(lister.0.lock().unwrap().as_slice(), &["shop".to_string()]);
    }
}
