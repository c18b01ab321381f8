//! Multiarch Tuning Operator
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig or in-cluster credentials)
//! multiarch-tuning-operator --enable-operator --leader-election
//!
//! # Print the CustomResourceDefinitions
//! multiarch-tuning-operator --print-crds
//! ```

use clap::Parser;
use kube::Client;
use multiarch_tuning_operator::config::{
    self, OperatorConfig, DEFAULT_NAMESPACE, DEFAULT_OPERAND_IMAGE,
};
use multiarch_tuning_operator::controllers::KubeEnoexecEventClient;
use multiarch_tuning_operator::events::KubeEventPublisher;
use multiarch_tuning_operator::health::{self, Readiness};
use multiarch_tuning_operator::leader_election::LeaderElector;
use multiarch_tuning_operator::logging::{LogLevelControl, ReloadableLogLevel};
use multiarch_tuning_operator::objects::ENOEXEC_HANDLER;
use multiarch_tuning_operator::webhook::{self, KubePodPlacementConfigLister, WebhookState};
use multiarch_tuning_operator::{
    ClusterPodPlacementConfigController, DefaultObjectSetBuilder, EnoexecEventController,
    KubeClusterClient, LogVerbosity,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Multiarch Tuning Operator
#[derive(Parser, Debug)]
#[command(name = "multiarch-tuning-operator")]
#[command(version, about = "Kubernetes operator for architecture-aware pod placement")]
struct Args {
    /// Namespace the operator and its operands run in (auto-detected if empty)
    #[arg(long, env = "NAMESPACE", default_value = "")]
    namespace: String,

    /// Image of the operand deployments and daemonset
    #[arg(long, env = "OPERAND_IMAGE", default_value = DEFAULT_OPERAND_IMAGE)]
    operand_image: String,

    /// Enable leader election for HA deployments
    #[arg(long, default_value = "false")]
    leader_election: bool,

    /// Namespace for the leader election Lease (defaults to --namespace)
    #[arg(long, default_value = "")]
    leader_election_namespace: String,

    /// Health probe bind address
    #[arg(long, default_value = "0.0.0.0:8081")]
    health_probe_bind_address: SocketAddr,

    /// Admission webhook bind address
    #[arg(long, default_value = "0.0.0.0:9443")]
    webhook_bind_address: SocketAddr,

    /// Directory holding tls.crt and tls.key for the admission webhook
    #[arg(long, default_value = "/var/run/manager/tls")]
    webhook_cert_dir: PathBuf,

    /// Run the ClusterPodPlacementConfig controller and the admission webhook
    #[arg(long, default_value = "false")]
    enable_operator: bool,

    /// Run the ENoExecEvent handler
    #[arg(long, default_value = "false")]
    enable_enoexec_event_controller: bool,

    /// Initial log verbosity (0-3) until the singleton sets one
    #[arg(long)]
    log_verbosity: Option<u8>,

    /// Print the CustomResourceDefinitions as YAML and exit
    #[arg(long, default_value = "false")]
    print_crds: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", multiarch_tuning_operator::crd::crds_yaml()?);
        return Ok(());
    }

    // Err only means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let log_level = Arc::new(ReloadableLogLevel::init());
    if let Some(level) = args.log_verbosity {
        log_level.set_verbosity(LogVerbosity::from_level(level))?;
    }

    if !args.enable_operator && !args.enable_enoexec_event_controller {
        anyhow::bail!("nothing to run: pass --enable-operator and/or --enable-enoexec-event-controller");
    }

    let namespace = config::detect_namespace(&args.namespace, DEFAULT_NAMESPACE);
    let operator_config = OperatorConfig::new(namespace, args.operand_image.clone());

    info!(
        namespace = %operator_config.namespace,
        operand_image = %operator_config.operand_image,
        operator = args.enable_operator,
        enoexec_event_controller = args.enable_enoexec_event_controller,
        leader_election = args.leader_election,
        "Starting Multiarch Tuning Operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let mut tasks: JoinSet<(&'static str, multiarch_tuning_operator::Result<()>)> = JoinSet::new();
    let readiness = Arc::new(Readiness::default());

    {
        let readiness = Arc::clone(&readiness);
        let addr = args.health_probe_bind_address;
        tasks.spawn(async move { ("health probes", health::serve(addr, readiness).await) });
    }

    // Admission runs on every replica, leader or not
    if args.enable_operator {
        let state = Arc::new(WebhookState::new(Arc::new(KubePodPlacementConfigLister::new(
            client.clone(),
        ))));
        let addr = args.webhook_bind_address;
        let cert_dir = args.webhook_cert_dir.clone();
        tasks.spawn(async move { ("admission webhook", webhook::serve(addr, &cert_dir, state).await) });
    }
    readiness.mark_ready();

    let elector = if args.leader_election {
        let lease_namespace = if args.leader_election_namespace.is_empty() {
            operator_config.namespace.clone()
        } else {
            args.leader_election_namespace.clone()
        };
        let elector = LeaderElector::new(client.clone(), &lease_namespace);
        tokio::select! {
            acquired = elector.acquire() => acquired?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal before acquiring leadership");
                return Ok(());
            }
        }
        Some(Arc::new(elector))
    } else {
        None
    };

    if args.enable_operator {
        let controller = Arc::new(ClusterPodPlacementConfigController::new(
            Arc::new(KubeClusterClient::new(client.clone())),
            Arc::new(DefaultObjectSetBuilder),
            log_level.clone(),
            operator_config.clone(),
        ));
        let kube = client.clone();
        tasks.spawn(async move { ("ClusterPodPlacementConfig controller", controller.run(kube).await) });
    }

    if args.enable_enoexec_event_controller {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), ENOEXEC_HANDLER));
        let controller = Arc::new(EnoexecEventController::new(
            Arc::new(KubeEnoexecEventClient::new(client.clone())),
            events,
            operator_config.namespace.clone(),
        ));
        let kube = client.clone();
        tasks.spawn(async move { ("ENoExecEvent controller", controller.run(kube).await) });
    }

    // Periodic lease renewal (never completes when leader election is disabled)
    let renewer = elector.clone();
    let renew_lease = async move {
        match renewer {
            Some(e) => loop {
                tokio::time::sleep(e.renew_interval()).await;
                match e.renew().await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        error!(error = %err, "Failed to renew leader lease");
                        break;
                    }
                }
            },
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        Some(joined) = tasks.join_next() => match joined {
            Ok((component, Ok(()))) => warn!(component, "Component stopped"),
            Ok((component, Err(e))) => error!(component, error = %e, "Component failed"),
            Err(e) => error!(error = %e, "Component task panicked"),
        },
        _ = renew_lease => {
            error!("Leader lease lost, initiating shutdown");
        }
    }

    tasks.abort_all();

    if let Some(e) = &elector {
        e.release().await;
    }

    info!("Multiarch Tuning Operator shutting down");
    Ok(())
}
