//! AdmissionReview response envelope
//!
//! `patch` is carried as a base64 string and `status` only appears when
//! something went wrong, matching what the API server expects from a
//! mutating webhook.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;

use crate::{Error, Result};

/// API version of the admission review we answer with
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";

/// Patch type for JSON patches
pub const JSON_PATCH_TYPE: &str = "JSONPatch";

/// Outer `AdmissionReview` wrapper
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEnvelope {
    api_version: &'static str,
    kind: &'static str,
    /// The admission decision
    pub response: ReviewResponse,
}

/// The `response` half of an `AdmissionReview`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    /// Request uid, echoed back
    pub uid: String,
    /// Always true: the injector never blocks admission
    pub allowed: bool,
    /// Base64-encoded JSON patch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// `JSONPatch` whenever `patch` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<&'static str>,
    /// Error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReviewStatus>,
}

/// Failure status reported alongside an allowed response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewStatus {
    /// Always `Failure`
    pub status: &'static str,
    /// HTTP-style status code
    pub code: u16,
    /// Machine-readable reason
    pub reason: &'static str,
    /// Human-readable message
    pub message: String,
}

impl ReviewResponse {
    /// Allow the request unchanged
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            patch: None,
            patch_type: None,
            status: None,
        }
    }

    /// Attach a JSON patch
    pub fn with_patch(mut self, patch: &json_patch::Patch) -> Result<Self> {
        let raw = serde_json::to_vec(patch)
            .map_err(|e| Error::serialize(format!("patch serialization error: {e}")))?;
        self.patch = Some(STANDARD.encode(raw));
        self.patch_type = Some(JSON_PATCH_TYPE);
        Ok(self)
    }

    /// Report an error while still allowing the pod
    ///
    /// Any patch is dropped.
    pub fn with_error(mut self, err: &Error) -> Self {
        self.allowed = true;
        self.patch = None;
        self.patch_type = None;
        self.status = Some(ReviewStatus {
            status: "Failure",
            code: err.status_code(),
            reason: err.reason(),
            message: err.to_string(),
        });
        self
    }

    /// Wrap into a full `AdmissionReview`
    pub fn into_review(self) -> ReviewEnvelope {
        ReviewEnvelope {
            api_version: ADMISSION_API_VERSION,
            kind: "AdmissionReview",
            response: self,
        }
    }
}
