//! Pod Injection Webhook
//!
//! Handles AdmissionReview requests for pods: evaluates the opt-in labels,
//! rewrites the pod and answers with a JSON patch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    Json,
};
use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{AdmissionRequest, AdmissionReview, Operation},
    DynamicObject,
};
use tracing::{debug, error, info, warn};

use super::review::{ReviewEnvelope, ReviewResponse};
use super::WebhookState;
use crate::inject::inject_agent;
use crate::patch::{self, build_patch};
use crate::policy::{self, InjectionDecision};
use crate::{Error, Result};

/// Handle mutating admission review for pods
///
/// The response always allows the pod. Errors are reported through the
/// response status: 400 for undecodable requests, 500 for lookup and
/// encoding failures.
pub async fn inject_handler(
    State(state): State<Arc<WebhookState>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Json<ReviewEnvelope> {
    let request = match decode_request(&body) {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(ReviewResponse::allow("").with_error(&e).into_review());
        }
    };

    let deadline = request_deadline(query.as_deref()).unwrap_or(state.lookup_timeout);

    let response = match mutate_pod(&state, &request, deadline).await {
        Ok(response) => response,
        Err(e) => {
            error!(
                uid = %request.uid,
                status = e.status_code(),
                error = %e,
                "Pod injection failed, admitting unchanged"
            );
            ReviewResponse::allow(request.uid.as_str()).with_error(&e)
        }
    };

    Json(response.into_review())
}

/// Decode an AdmissionReview body into its request
fn decode_request(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(body)
        .map_err(|e| Error::request_decode(format!("invalid admission review: {e}")))?;

    review
        .try_into()
        .map_err(|e| Error::request_decode(format!("invalid admission review: {e}")))
}

/// Process a single pod admission request
async fn mutate_pod(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
    deadline: Duration,
) -> Result<ReviewResponse> {
    let uid = &request.uid;

    // Volumes, init containers and env are immutable once the pod exists
    if request.operation != Operation::Create {
        debug!(
            uid = %uid,
            operation = ?request.operation,
            "Not a create, allowing unchanged"
        );
        return Ok(ReviewResponse::allow(uid.as_str()));
    }

    let obj = match &request.object {
        Some(obj) => obj,
        None => {
            debug!(uid = %uid, "No object in request, allowing unchanged");
            return Ok(ReviewResponse::allow(uid.as_str()));
        }
    };

    let pod = decode_pod(request, obj)?;

    let namespace = request
        .namespace
        .as_deref()
        .or(pod.metadata.namespace.as_deref())
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| Error::request_decode("admission request has no namespace"))?;

    info!(
        uid = %uid,
        pod = ?pod.metadata.name,
        generate_name = ?pod.metadata.generate_name,
        namespace = %namespace,
        "Evaluating pod for agent injection"
    );

    let namespace_labels = lookup_namespace_labels(state, namespace, deadline).await?;

    let decision = policy::evaluate(
        namespace_labels.as_ref(),
        pod.metadata.labels.as_ref(),
        pod.metadata.annotations.as_ref(),
    )?;

    let flavor = match &decision {
        InjectionDecision::Inject(flavor) => flavor,
        InjectionDecision::Skip => {
            debug!(uid = %uid, namespace = %namespace, "Pod opted out, allowing unchanged");
            return Ok(ReviewResponse::allow(uid.as_str()));
        }
    };

    let injected = inject_agent(&pod, flavor, &state.installer_image);
    let diff = build_patch(&pod, &injected)?;

    if patch::is_empty(&diff) {
        debug!(uid = %uid, "Pod already injected, allowing unchanged");
        return Ok(ReviewResponse::allow(uid.as_str()));
    }

    info!(
        uid = %uid,
        flavor = %flavor,
        patch_ops = diff.0.len(),
        "Injecting agent into pod"
    );

    ReviewResponse::allow(uid.as_str()).with_patch(&diff)
}

/// Convert the embedded object into a pod, rejecting other kinds
fn decode_pod(request: &AdmissionRequest<DynamicObject>, obj: &DynamicObject) -> Result<Pod> {
    if !request.kind.group.is_empty() || request.kind.kind != "Pod" {
        return Err(Error::request_decode(format!(
            "expected core Pod, got {}/{}",
            request.kind.group, request.kind.kind
        )));
    }

    serde_json::to_value(obj)
        .and_then(serde_json::from_value::<Pod>)
        .map_err(|e| Error::request_decode(format!("object is not a valid pod: {e}")))
}

/// Fetch the namespace labels within the deadline
///
/// A missing namespace has no labels.
async fn lookup_namespace_labels(
    state: &WebhookState,
    namespace: &str,
    deadline: Duration,
) -> Result<Option<BTreeMap<String, String>>> {
    match tokio::time::timeout(deadline, state.namespaces.namespace_labels(namespace)).await {
        Ok(Ok(Some(labels))) => Ok(Some(labels)),
        Ok(Ok(None)) => {
            warn!(namespace = %namespace, "Namespace not found, evaluating pod labels only");
            Ok(None)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::namespace_lookup(format!(
            "lookup of namespace '{}' exceeded deadline of {:?}",
            namespace, deadline
        ))),
    }
}

/// Deadline from the `timeout` query parameter the API server appends
///
/// Accepts `<n>ms`, `<n>s` and `<n>m`; anything else is ignored.
fn request_deadline(query: Option<&str>) -> Option<Duration> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "timeout")
        .and_then(|(_, value)| parse_timeout(value))
        .filter(|d| !d.is_zero())
}

fn parse_timeout(value: &str) -> Option<Duration> {
    let split = value.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(amount)),
        "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        _ => None,
    }
}
