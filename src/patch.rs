//! JSON patch encoding
//!
//! Diffs the canonical JSON of the original and rewritten pod. Both sides go
//! through the same typed round trip, so fields unknown to the pod schema never
//! show up as spurious removals.

use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;

use crate::Result;

/// Build the patch turning `original` into `mutated`
///
/// Returns an empty patch when the two pods serialize identically.
pub fn build_patch(original: &Pod, mutated: &Pod) -> Result<Patch> {
    let before = serde_json::to_value(original)?;
    let after = serde_json::to_value(mutated)?;
    Ok(json_patch::diff(&before, &after))
}

/// Whether a patch carries no operations
pub fn is_empty(patch: &Patch) -> bool {
    patch.0.is_empty()
}
