//! Error types for the agent injector

use thiserror::Error;

/// Main error type for injector operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The body is not an AdmissionReview, or the embedded object is not a pod
    #[error("request decode error: {0}")]
    RequestDecode(String),

    /// The control plane failed to return the request's namespace
    #[error("namespace lookup error: {0}")]
    NamespaceLookup(String),

    /// The rewritten pod could not be encoded
    #[error("serialization error: {0}")]
    Serialize(String),

    /// An `agent/inject` value outside the recognised vocabulary.
    ///
    /// Reserved: unknown values currently fall through to injection.
    #[error("policy misconfiguration: {0}")]
    PolicyMisconfiguration(String),

    /// Invalid startup configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a request decode error with the given message
    pub fn request_decode(msg: impl Into<String>) -> Self {
        Self::RequestDecode(msg.into())
    }

    /// Create a namespace lookup error with the given message
    pub fn namespace_lookup(msg: impl Into<String>) -> Self {
        Self::NamespaceLookup(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialize(msg: impl Into<String>) -> Self {
        Self::Serialize(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// HTTP-style status code carried in the admission response envelope
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RequestDecode(_) | Error::PolicyMisconfiguration(_) => 400,
            Error::NamespaceLookup(_) | Error::Serialize(_) | Error::Config(_) => 500,
        }
    }

    /// Short machine-readable reason for the envelope's `status.reason`
    pub fn reason(&self) -> &'static str {
        match self {
            Error::RequestDecode(_) => "BadRequest",
            Error::PolicyMisconfiguration(_) => "Invalid",
            Error::NamespaceLookup(_) | Error::Serialize(_) | Error::Config(_) => {
                "InternalError"
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Self::NamespaceLookup(e.to_string())
    }
}
