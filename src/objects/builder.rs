//! Default object set: the concrete shapes of every dependent

use super::{
    service_monitor_resource, DesiredState, ManagedObject, ObjectSetBuilder, ENOEXEC_DAEMON, ENOEXEC_HANDLER,
    MUTATING_WEBHOOK_CONFIGURATION, OPERATOR_WEBHOOK_SERVICE, POD_PLACEMENT_CONTROLLER,
    POD_PLACEMENT_WEBHOOK, VALIDATING_WEBHOOK_CONFIGURATION,
};
use crate::conditions::{PLUGIN_FINALIZER, PRIMARY_FINALIZER};
use crate::config::FIELD_MANAGER;
use crate::crd::{ClusterPodPlacementConfig, ENoExecEvent, PodPlacementConfig};
use crate::webhook::VALIDATE_PATH;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, SecurityContext, Service,
    ServiceAccount, ServicePort, ServiceSpec, Toleration, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use kube::Resource;
use std::collections::BTreeMap;

const WEBHOOK_PORT: i32 = 9443;
const HEALTH_PORT: i32 = 8081;
const METRICS_PORT: i32 = 8443;
const OPERAND_REPLICAS: i32 = 2;
const SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";
const INJECT_CA_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";
const SCHEDULING_GATE_PATH: &str = "/add-pod-scheduling-gate";
/// Label carried by the operator's own pods
const OPERATOR_POD_LABEL: (&str, &str) = ("control-plane", "controller-manager");

/// The object set shipped with the operator
#[derive(Debug, Clone, Default)]
pub struct DefaultObjectSetBuilder;

impl ObjectSetBuilder for DefaultObjectSetBuilder {
    fn pod_placement_controller(&self, desired: &DesiredState) -> Vec<ManagedObject> {
        let name = POD_PLACEMENT_CONTROLLER;
        let ns = desired.namespace.as_str();

        let mut args = vec![
            "--enable-ppc-controllers".to_string(),
            format!("--log-verbosity={}", desired.log_verbosity.as_level()),
        ];
        let mut finalizers = vec![PRIMARY_FINALIZER.to_string()];
        if desired.controller_holds_plugin_finalizer() {
            finalizers.push(PLUGIN_FINALIZER.to_string());
        }
        if desired.exec_format_error_monitor {
            args.push("--enable-enoexec-event-controller".to_string());
        }

        let mut deployment = deployment(desired, name, args, vec![], vec![]);
        deployment.metadata.finalizers = Some(finalizers);

        vec![
            ManagedObject::ServiceAccount(service_account(ns, name)),
            ManagedObject::ClusterRole(cluster_role(
                name,
                vec![
                    rule("", &["pods"], &["get", "list", "watch", "update", "patch"]),
                    rule("", &["nodes", "secrets", "configmaps"], &["get", "list", "watch"]),
                    rule("", &["events"], &["create", "patch"]),
                    crd_rule::<PodPlacementConfig>(&["get", "list", "watch"]),
                    crd_rule::<ClusterPodPlacementConfig>(&["get", "list", "watch"]),
                ],
            )),
            ManagedObject::ClusterRoleBinding(cluster_role_binding(ns, name)),
            ManagedObject::Role(role(
                ns,
                name,
                vec![
                    rule("coordination.k8s.io", &["leases"], &["get", "list", "watch", "create", "update", "patch"]),
                    rule("", &["events"], &["create", "patch"]),
                ],
            )),
            ManagedObject::RoleBinding(role_binding(ns, name, name, name)),
            ManagedObject::Service(service(ns, name, None, vec![port("metrics", METRICS_PORT, METRICS_PORT)])),
            ManagedObject::Deployment(deployment),
        ]
    }

    fn pod_placement_webhook(&self, desired: &DesiredState) -> Vec<ManagedObject> {
        let name = POD_PLACEMENT_WEBHOOK;
        let ns = desired.namespace.as_str();
        let secret = tls_secret_name(name);

        let args = vec![
            "--enable-ppc-webhook".to_string(),
            format!("--log-verbosity={}", desired.log_verbosity.as_level()),
        ];
        let volumes = vec![Volume {
            name: "webhook-cert".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                default_mode: Some(0o420),
                ..Default::default()
            }),
            ..Default::default()
        }];
        let mounts = vec![VolumeMount {
            name: "webhook-cert".to_string(),
            mount_path: "/var/run/manager/tls".to_string(),
            read_only: Some(true),
            ..Default::default()
        }];

        vec![
            ManagedObject::ServiceAccount(service_account(ns, name)),
            ManagedObject::ClusterRole(cluster_role(
                name,
                vec![
                    rule("", &["pods"], &["get", "list", "watch"]),
                    rule("", &["events"], &["create", "patch"]),
                    crd_rule::<PodPlacementConfig>(&["get", "list", "watch"]),
                    crd_rule::<ClusterPodPlacementConfig>(&["get", "list", "watch"]),
                ],
            )),
            ManagedObject::ClusterRoleBinding(cluster_role_binding(ns, name)),
            ManagedObject::Service(service(
                ns,
                name,
                Some(secret),
                vec![
                    port("https", 443, WEBHOOK_PORT),
                    port("metrics", METRICS_PORT, METRICS_PORT),
                ],
            )),
            ManagedObject::Deployment(deployment(desired, name, args, volumes, mounts)),
        ]
    }

    fn mutating_webhook_configuration(&self, desired: &DesiredState) -> ManagedObject {
        let mut selector = desired.namespace_selector.clone().unwrap_or_default();
        selector
            .match_expressions
            .get_or_insert_with(Vec::new)
            .push(LabelSelectorRequirement {
                key: NAMESPACE_NAME_LABEL.to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec![desired.namespace.clone()]),
            });

        let mut annotations = BTreeMap::new();
        annotations.insert(INJECT_CA_ANNOTATION.to_string(), "true".to_string());

        ManagedObject::MutatingWebhookConfiguration(MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(MUTATING_WEBHOOK_CONFIGURATION.to_string()),
                labels: Some(common_labels(POD_PLACEMENT_WEBHOOK)),
                annotations: Some(annotations),
                ..Default::default()
            },
            webhooks: Some(vec![MutatingWebhook {
                name: "pod-placement-scheduling-gate.multiarch.openshift.io".to_string(),
                admission_review_versions: vec!["v1".to_string()],
                client_config: WebhookClientConfig {
                    service: Some(ServiceReference {
                        namespace: desired.namespace.clone(),
                        name: POD_PLACEMENT_WEBHOOK.to_string(),
                        path: Some(SCHEDULING_GATE_PATH.to_string()),
                        port: Some(443),
                    }),
                    ..Default::default()
                },
                failure_policy: Some("Ignore".to_string()),
                side_effects: "None".to_string(),
                namespace_selector: Some(selector),
                rules: Some(vec![RuleWithOperations {
                    api_groups: Some(vec!["".to_string()]),
                    api_versions: Some(vec!["v1".to_string()]),
                    operations: Some(vec!["CREATE".to_string()]),
                    resources: Some(vec!["pods".to_string()]),
                    scope: Some("Namespaced".to_string()),
                }]),
                timeout_seconds: Some(10),
                ..Default::default()
            }]),
        })
    }

    fn pod_placement_config_validating_webhook(&self, desired: &DesiredState) -> Vec<ManagedObject> {
        let ns = desired.namespace.as_str();

        let mut svc = service(
            ns,
            OPERATOR_WEBHOOK_SERVICE,
            Some(tls_secret_name(OPERATOR_WEBHOOK_SERVICE)),
            vec![port("https", 443, WEBHOOK_PORT)],
        );
        if let Some(spec) = svc.spec.as_mut() {
            let (key, value) = OPERATOR_POD_LABEL;
            spec.selector = Some(BTreeMap::from([(key.to_string(), value.to_string())]));
        }

        let mut annotations = BTreeMap::new();
        annotations.insert(INJECT_CA_ANNOTATION.to_string(), "true".to_string());
        let plural = PodPlacementConfig::plural(&());

        let vwc = ValidatingWebhookConfiguration {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..cluster_metadata(VALIDATING_WEBHOOK_CONFIGURATION)
            },
            webhooks: Some(vec![ValidatingWebhook {
                name: "validate-podplacementconfig.multiarch.openshift.io".to_string(),
                admission_review_versions: vec!["v1".to_string()],
                client_config: WebhookClientConfig {
                    service: Some(ServiceReference {
                        namespace: ns.to_string(),
                        name: OPERATOR_WEBHOOK_SERVICE.to_string(),
                        path: Some(VALIDATE_PATH.to_string()),
                        port: Some(443),
                    }),
                    ..Default::default()
                },
                failure_policy: Some("Fail".to_string()),
                side_effects: "None".to_string(),
                rules: Some(vec![RuleWithOperations {
                    api_groups: Some(vec![PodPlacementConfig::group(&()).to_string()]),
                    api_versions: Some(vec![PodPlacementConfig::version(&()).to_string()]),
                    operations: Some(vec![
                        "CREATE".to_string(),
                        "UPDATE".to_string(),
                        "DELETE".to_string(),
                    ]),
                    resources: Some(vec![plural.to_string()]),
                    scope: Some("Namespaced".to_string()),
                }]),
                timeout_seconds: Some(10),
                ..Default::default()
            }]),
        };

        vec![
            ManagedObject::Service(svc),
            ManagedObject::ValidatingWebhookConfiguration(vwc),
        ]
    }

    fn exec_format_error_daemon(&self, desired: &DesiredState) -> Vec<ManagedObject> {
        let name = ENOEXEC_DAEMON;
        let ns = desired.namespace.as_str();
        let labels = common_labels(name);

        let mut container = container(
            desired,
            name,
            vec![
                "--enable-enoexec-event-daemon".to_string(),
                format!("--log-verbosity={}", desired.log_verbosity.as_level()),
            ],
            vec![],
        );
        container.env = Some(vec![field_env("NODE_NAME", "spec.nodeName")]);
        container.security_context = Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        });

        let daemonset = DaemonSet {
            metadata: metadata(ns, name),
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(name.to_string()),
                        host_pid: Some(true),
                        containers: vec![container],
                        tolerations: Some(vec![Toleration {
                            operator: Some("Exists".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        vec![
            ManagedObject::ServiceAccount(service_account(ns, name)),
            ManagedObject::ClusterRole(cluster_role(
                name,
                vec![
                    rule("", &["pods", "nodes"], &["get", "list", "watch"]),
                    crd_rule::<ENoExecEvent>(&["create"]),
                ],
            )),
            ManagedObject::ClusterRoleBinding(cluster_role_binding(ns, name)),
            ManagedObject::DaemonSet(daemonset),
        ]
    }

    fn exec_format_error_handler(&self, desired: &DesiredState) -> Vec<ManagedObject> {
        let ns = desired.namespace.as_str();
        vec![
            ManagedObject::Role(role(
                ns,
                ENOEXEC_HANDLER,
                vec![crd_rule::<ENoExecEvent>(&["get", "list", "watch", "delete"])],
            )),
            ManagedObject::RoleBinding(role_binding(
                ns,
                ENOEXEC_HANDLER,
                ENOEXEC_HANDLER,
                POD_PLACEMENT_CONTROLLER,
            )),
        ]
    }

    fn service_monitors(&self, desired: &DesiredState) -> Vec<ManagedObject> {
        let resource = service_monitor_resource();

        [POD_PLACEMENT_CONTROLLER, POD_PLACEMENT_WEBHOOK]
            .into_iter()
            .map(|name| {
                let mut monitor = DynamicObject::new(name, &resource)
                    .within(&desired.namespace)
                    .data(serde_json::json!({
                        "spec": {
                            "selector": {"matchLabels": common_labels(name)},
                            "endpoints": [{
                                "port": "metrics",
                                "path": "/metrics",
                                "scheme": "https",
                                "bearerTokenFile": "/var/run/secrets/kubernetes.io/serviceaccount/token",
                                "tlsConfig": {"insecureSkipVerify": true}
                            }]
                        }
                    }));
                monitor.metadata.labels = Some(common_labels(name));
                ManagedObject::ServiceMonitor(monitor)
            })
            .collect()
    }
}

fn common_labels(component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), component.to_string());
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        "multiarch-tuning-operator".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(common_labels(name)),
        ..Default::default()
    }
}

fn cluster_metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(common_labels(name)),
        ..Default::default()
    }
}

fn tls_secret_name(name: &str) -> String {
    format!("{}-tls", name)
}

fn rule(group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

fn crd_rule<K: Resource<DynamicType = ()>>(verbs: &[&str]) -> PolicyRule {
    let plural = K::plural(&());
    rule(&K::group(&()), &[&*plural], verbs)
}

fn service_account(namespace: &str, name: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(namespace, name),
        ..Default::default()
    }
}

fn subject(namespace: &str, service_account: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: service_account.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: cluster_metadata(name),
        rules: Some(rules),
        ..Default::default()
    }
}

fn cluster_role_binding(namespace: &str, name: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: cluster_metadata(name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![subject(namespace, name)]),
    }
}

fn role(namespace: &str, name: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: metadata(namespace, name),
        rules: Some(rules),
    }
}

fn role_binding(namespace: &str, name: &str, role: &str, service_account: &str) -> RoleBinding {
    RoleBinding {
        metadata: metadata(namespace, name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![subject(namespace, service_account)]),
    }
}

fn port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn service(
    namespace: &str,
    name: &str,
    serving_cert_secret: Option<String>,
    ports: Vec<ServicePort>,
) -> Service {
    let mut meta = metadata(namespace, name);
    if let Some(secret) = serving_cert_secret {
        let mut annotations = BTreeMap::new();
        annotations.insert(SERVING_CERT_ANNOTATION.to_string(), secret);
        meta.annotations = Some(annotations);
    }
    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            selector: Some(common_labels(name)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_env(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(HEALTH_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(15),
        period_seconds: Some(20),
        ..Default::default()
    }
}

fn container(
    desired: &DesiredState,
    name: &str,
    args: Vec<String>,
    mounts: Vec<VolumeMount>,
) -> Container {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity("10m".to_string()));
    requests.insert("memory".to_string(), Quantity("64Mi".to_string()));

    Container {
        name: name.to_string(),
        image: Some(desired.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(args),
        env: Some(vec![field_env("NAMESPACE", "metadata.namespace")]),
        resources: Some(ResourceRequirements {
            requests: Some(requests),
            ..Default::default()
        }),
        volume_mounts: if mounts.is_empty() { None } else { Some(mounts) },
        ..Default::default()
    }
}

fn deployment(
    desired: &DesiredState,
    name: &str,
    args: Vec<String>,
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
) -> Deployment {
    let labels = common_labels(name);

    let mut container = container(desired, name, args, mounts);
    container.ports = Some(vec![
        ContainerPort {
            name: Some("https".to_string()),
            container_port: WEBHOOK_PORT,
            ..Default::default()
        },
        ContainerPort {
            name: Some("metrics".to_string()),
            container_port: METRICS_PORT,
            ..Default::default()
        },
    ]);
    container.liveness_probe = Some(probe("/healthz"));
    container.readiness_probe = Some(probe("/readyz"));

    Deployment {
        metadata: metadata(&desired.namespace, name),
        spec: Some(DeploymentSpec {
            replicas: Some(OPERAND_REPLICAS),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name.to_string()),
                    containers: vec![container],
                    volumes: if volumes.is_empty() { None } else { Some(volumes) },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
