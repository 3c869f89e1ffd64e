//! Agent Injector - mutating admission webhook for host-monitoring agent injection
//!
//! Pods admitted to the cluster are rewritten so that the monitoring agent's
//! preload library is loaded into every application process.
//!
//! # Architecture
//!
//! A request flows through four pieces, leaves first:
//! - [`policy`] decides whether a pod is injected and with which agent flavor
//! - [`inject`] rewrites the pod (volumes, init container, per-container env/mounts)
//! - [`patch`] diffs the original and rewritten pod into a JSON patch
//! - [`webhook`] decodes the AdmissionReview, looks up the namespace and answers
//!
//! # Modules
//!
//! - [`config`] - Runtime configuration assembled from CLI flags and environment
//! - [`error`] - Error types and their admission status codes
//! - [`namespace`] - Namespace reader abstraction over the Kubernetes API
//! - [`server`] - HTTP(S) listener serving the webhook router
//! - [`telemetry`] - Structured logging and optional OTLP trace export

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod inject;
pub mod namespace;
pub mod patch;
pub mod policy;
pub mod server;
pub mod telemetry;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Label and annotation vocabulary
// =============================================================================

/// Opt-in gate, read from both namespace and pod labels (pod wins)
pub const INJECT_LABEL: &str = "agent/inject";

/// Pod annotation selecting the agent flavor
pub const FLAVOR_ANNOTATION: &str = "agent/flavor";

/// Pod annotation written by the injector as a mutation marker
pub const INJECTED_ANNOTATION: &str = "agent/injected";

/// Flavor used when the pod does not select one
pub const DEFAULT_FLAVOR: &str = "default";

/// Default port for the webhook HTTPS server
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;
