//! Webhook listener
//!
//! Serves the webhook router over TLS when certificate files are configured,
//! plain HTTP otherwise (for local testing behind a TLS-terminating proxy).

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::config::InjectorConfig;
use crate::webhook::{webhook_router, WebhookState};
use crate::{Error, Result};

/// Serve the webhook until the listener fails
pub async fn serve(config: &InjectorConfig, state: Arc<WebhookState>) -> Result<()> {
    let app = webhook_router(state);

    match &config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .map_err(|e| Error::config(format!("TLS config error: {}", e)))?;

            info!(addr = %config.listen_addr, "Starting agent injector webhook (TLS)");

            axum_server::bind_rustls(config.listen_addr, tls_config)
                .serve(app.into_make_service())
                .await
                .map_err(|e| Error::config(format!("webhook server error: {}", e)))
        }
        None => {
            let listener = tokio::net::TcpListener::bind(config.listen_addr)
                .await
                .map_err(|e| {
                    Error::config(format!("failed to bind {}: {}", config.listen_addr, e))
                })?;

            info!(addr = %config.listen_addr, "Starting agent injector webhook (plain HTTP)");

            axum::serve(listener, app)
                .await
                .map_err(|e| Error::config(format!("webhook server error: {}", e)))
        }
    }
}
