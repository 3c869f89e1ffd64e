//! Agent Injector - mutating admission webhook for monitoring agent injection

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;

use agent_injector::config::{tls_files, InjectorConfig, DEFAULT_INSTALLER_IMAGE};
use agent_injector::namespace::KubeNamespaceReader;
use agent_injector::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use agent_injector::webhook::WebhookState;

/// Agent Injector - preloads the monitoring agent into admitted pods
#[derive(Parser, Debug)]
#[command(name = "agent-injector", version, about, long_about = None)]
struct Cli {
    /// Address the webhook listens on
    #[arg(long, env = "AGENT_INJECTOR_LISTEN_ADDR", default_value = "0.0.0.0:8443")]
    listen_addr: SocketAddr,

    /// PEM certificate for the webhook listener
    #[arg(long, env = "AGENT_INJECTOR_TLS_CERT")]
    tls_cert_file: Option<PathBuf>,

    /// PEM private key for the webhook listener
    #[arg(long, env = "AGENT_INJECTOR_TLS_KEY")]
    tls_key_file: Option<PathBuf>,

    /// Namespace the operator runs in
    ///
    /// Scopes the `agent-webhook-config` secret reference.
    #[arg(long, env = "POD_NAMESPACE")]
    operator_namespace: String,

    /// Image of the `install-agent` init container
    #[arg(long, env = "AGENT_INSTALLER_IMAGE", default_value = DEFAULT_INSTALLER_IMAGE)]
    installer_image: String,

    /// Namespace lookup deadline when the API server sends none
    #[arg(long, env = "AGENT_INJECTOR_LOOKUP_TIMEOUT_SECS", default_value = "10")]
    lookup_timeout_secs: u64,

    /// Stdout log format: json or text
    #[arg(long, env = "AGENT_INJECTOR_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// OTLP collector endpoint; spans are not exported when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let config = InjectorConfig {
        listen_addr: cli.listen_addr,
        tls: tls_files(cli.tls_cert_file, cli.tls_key_file)?,
        operator_namespace: cli.operator_namespace,
        installer_image: cli.installer_image,
        lookup_timeout: Duration::from_secs(cli.lookup_timeout_secs),
    };
    config.validate()?;

    init_telemetry(&TelemetryConfig::for_injector(
        &config,
        cli.otlp_endpoint,
        cli.log_format,
    ))?;

    tracing::info!(
        operator_namespace = %config.operator_namespace,
        config_secret = %config.config_secret_ref(),
        installer_image = %config.installer_image,
        "Starting agent injector"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let state = WebhookState::new(Arc::new(KubeNamespaceReader::new(client)), &config);

    agent_injector::server::serve(&config, Arc::new(state)).await?;

    Ok(())
}
