//! Admission webhook server
//!
//! Serves the validating hook for PodPlacementConfig over TLS. The control
//! plane calls it synchronously on every create, update and delete.

mod pod_placement_config;

pub use pod_placement_config::{
    validate_handler, validate_platforms, validate_request, Decoder,
    KubePodPlacementConfigLister, PodPlacementConfigLister, VALIDATE_PATH,
};

use crate::error::{OperatorError, Result};
use axum::routing::post;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Shared state of the admission handlers
pub struct WebhookState {
    lister: Arc<dyn PodPlacementConfigLister>,
    decoder: OnceLock<Decoder>,
}

impl WebhookState {
    pub fn new(lister: Arc<dyn PodPlacementConfigLister>) -> Self {
        Self {
            lister,
            decoder: OnceLock::new(),
        }
    }

    /// The request decoder, built on first use
    pub fn decoder(&self) -> &Decoder {
        self.decoder.get_or_init(Decoder::new)
    }

    pub fn lister(&self) -> &dyn PodPlacementConfigLister {
        self.lister.as_ref()
    }
}

/// Router with every admission endpoint
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate_handler))
        .with_state(state)
}

/// Serve the admission endpoints with the key pair found in `cert_dir`
/// (`tls.crt`, `tls.key`).
pub async fn serve(addr: SocketAddr, cert_dir: &Path, state: Arc<WebhookState>) -> Result<()> {
    let tls_config = RustlsConfig::from_pem_file(cert_dir.join("tls.crt"), cert_dir.join("tls.key"))
        .await
        .map_err(|e| OperatorError::Configuration(format!("TLS config error: {}", e)))?;

    info!(addr = %addr, "Starting admission webhook server");

    axum_server::bind_rustls(addr, tls_config)
        .serve(router(state).into_make_service())
        .await
        .map_err(|e| OperatorError::Server(format!("admission webhook: {}", e)))?;

    Ok(())
}
