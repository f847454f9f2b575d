//! HTTPS server exposing the admission endpoints

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admission::{review_mutating, review_validating};
use crate::codec::GameCodec;
use crate::error::WebhookError;

/// Certificate file name inside the TLS directory
pub const TLS_CERT_FILE: &str = "tls.crt";
/// Private key file name inside the TLS directory
pub const TLS_KEY_FILE: &str = "tls.key";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared state for webhook handlers
#[derive(Clone, Debug, Default)]
pub struct WebhookState {
    /// Decoder for admitted objects
    pub codec: GameCodec,
}

impl WebhookState {
    /// Create the handler state
    pub fn new() -> Self {
        Self::default()
    }
}

/// Create the webhook router
///
/// - POST /validating - validating admission for Games
/// - POST /mutating - mutating admission for Games
/// - GET /healthz - liveness
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validating", post(validating_handler))
        .route("/mutating", post(mutating_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

fn parse_review(
    body: AdmissionReview<DynamicObject>,
) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    let req: Result<AdmissionRequest<DynamicObject>, _> = body.try_into();
    match req {
        Ok(req) => Ok(req),
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            Err(AdmissionResponse::invalid(e.to_string()))
        }
    }
}

async fn validating_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let response = match parse_review(body) {
        Ok(req) => review_validating(&state.codec, &req),
        Err(invalid) => invalid,
    };
    Json(response.into_review())
}

async fn mutating_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let response = match parse_review(body) {
        Ok(req) => review_mutating(&state.codec, &req),
        Err(invalid) => invalid,
    };
    Json(response.into_review())
}

/// Serve the webhook over HTTPS until `shutdown` fires
///
/// The certificate and key are read from `tls.crt` and `tls.key` under
/// `tls_dir`. In-flight reviews get a short grace period on shutdown.
pub async fn serve_tls(
    addr: SocketAddr,
    tls_dir: &Path,
    state: Arc<WebhookState>,
    shutdown: CancellationToken,
) -> Result<(), WebhookError> {
    let cert = tls_dir.join(TLS_CERT_FILE);
    let key = tls_dir.join(TLS_KEY_FILE);
    let tls_config = RustlsConfig::from_pem_file(&cert, &key)
        .await
        .map_err(|e| WebhookError::Tls(format!("{}: {}", cert.display(), e)))?;

    let handle = Handle::new();
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });
    }

    info!(addr = %addr, "starting admission webhook");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;
    info!("admission webhook stopped");
    Ok(())
}
