//! Mutating admission webhook
//!
//! Intercepts pod admission and attaches the monitoring agent to pods whose
//! namespace or labels opt in. The webhook never denies: every failure is
//! reported in the response status while the pod is still allowed, so a broken
//! injector cannot block application rollouts.

pub mod pod;
pub mod review;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

use crate::config::InjectorConfig;
use crate::namespace::NamespaceReader;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Reader for the opt-in labels of the pod's namespace
    pub namespaces: Arc<dyn NamespaceReader>,
    /// Namespace the operator runs in
    pub operator_namespace: String,
    /// Image of the `install-agent` init container
    pub installer_image: String,
    /// Namespace lookup deadline when the request carries none
    pub lookup_timeout: Duration,
}

impl WebhookState {
    /// Create webhook state from a namespace reader and the runtime config
    pub fn new(namespaces: Arc<dyn NamespaceReader>, config: &InjectorConfig) -> Self {
        Self {
            namespaces,
            operator_namespace: config.operator_namespace.clone(),
            installer_image: config.installer_image.clone(),
            lookup_timeout: config.lookup_timeout,
        }
    }
}

/// Create the webhook router
///
/// - POST /inject - Mutate pods with the monitoring agent
/// - GET /healthz - Liveness, empty 200
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/inject", post(pod::inject_handler))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .with_state(state)
}
