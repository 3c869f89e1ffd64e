//! Injection policy evaluation
//!
//! Decides, from namespace labels, pod labels and pod annotations, whether a
//! pod receives the agent and which flavor of installer it uses.
//!
//! Precedence is pod label over namespace label. Only the literal value
//! `"false"` opts out; every other value, including an empty or missing one,
//! results in injection.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::{Result, DEFAULT_FLAVOR, FLAVOR_ANNOTATION, INJECT_LABEL};

/// Agent flavor selected through the `agent/flavor` annotation
///
/// Never empty: a missing or empty annotation yields [`DEFAULT_FLAVOR`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flavor(String);

impl Flavor {
    /// Build a flavor from an annotation value, defaulting empty input
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() => Self(v.to_string()),
            _ => Self::default(),
        }
    }

    /// The flavor string passed to the installer
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Flavor {
    fn default() -> Self {
        Self(DEFAULT_FLAVOR.to_string())
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of policy evaluation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InjectionDecision {
    /// Leave the pod untouched
    Skip,
    /// Inject the agent using the given flavor
    Inject(Flavor),
}

impl InjectionDecision {
    /// Whether the decision mutates the pod
    pub fn is_inject(&self) -> bool {
        matches!(self, InjectionDecision::Inject(_))
    }
}

/// Effective `agent/inject` value: pod label if non-empty, else namespace label
/// if non-empty, else the empty string.
pub fn effective_inject_value<'a>(
    namespace_labels: Option<&'a BTreeMap<String, String>>,
    pod_labels: Option<&'a BTreeMap<String, String>>,
) -> &'a str {
    let non_empty = |labels: Option<&'a BTreeMap<String, String>>| {
        labels
            .and_then(|l| l.get(INJECT_LABEL))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    };

    non_empty(pod_labels)
        .or_else(|| non_empty(namespace_labels))
        .unwrap_or("")
}

/// Evaluate the injection policy for a pod
///
/// Any of the maps may be absent. The `Result` is reserved for a stricter
/// vocabulary; today every value is accepted.
pub fn evaluate(
    namespace_labels: Option<&BTreeMap<String, String>>,
    pod_labels: Option<&BTreeMap<String, String>>,
    pod_annotations: Option<&BTreeMap<String, String>>,
) -> Result<InjectionDecision> {
    let value = effective_inject_value(namespace_labels, pod_labels);

    match value {
        "false" => return Ok(InjectionDecision::Skip),
        "" | "true" => {}
        other => {
            // Unrecognised values inject; keep that behaviour but make it visible.
            warn!(
                label = INJECT_LABEL,
                value = %other,
                "Unrecognised inject label value, treating as opt-in"
            );
        }
    }

    let flavor = Flavor::from_annotation(
        pod_annotations
            .and_then(|a| a.get(FLAVOR_ANNOTATION))
            .map(String::as_str),
    );

    Ok(InjectionDecision::Inject(flavor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // Unit Tests
    // =========================================================================

    #[test]
    fn test_no_labels_injects_default_flavor() {
        let decision = evaluate(None, None, None).unwrap();
        assert_eq!(decision, InjectionDecision::Inject(Flavor::default()));
        assert_eq!(Flavor::default().as_str(), "default");
    }

    #[test]
    fn test_namespace_opt_out() {
        let ns = labels(&[(INJECT_LABEL, "false")]);
        assert_eq!(
            evaluate(Some(&ns), None, None).unwrap(),
            InjectionDecision::Skip
        );
    }

    #[test]
    fn test_empty_pod_label_falls_back_to_namespace() {
        let ns = labels(&[(INJECT_LABEL, "false")]);
        let pod = labels(&[(INJECT_LABEL, "")]);
        assert_eq!(effective_inject_value(Some(&ns), Some(&pod)), "false");
        assert_eq!(
            evaluate(Some(&ns), Some(&pod), None).unwrap(),
            InjectionDecision::Skip
        );
    }

    #[test]
    fn test_unrecognised_value_injects() {
        let ns = labels(&[(INJECT_LABEL, "ture")]);
        assert!(evaluate(Some(&ns), None, None).unwrap().is_inject());
    }

    #[test]
    fn test_empty_flavor_annotation_defaults() {
        let ann = labels(&[(FLAVOR_ANNOTATION, "")]);
        assert_eq!(
            evaluate(None, None, Some(&ann)).unwrap(),
            InjectionDecision::Inject(Flavor::default())
        );
    }

    #[test]
    fn test_flavor_display() {
        let flavor = Flavor::from_annotation(Some("musl"));
        assert_eq!(flavor.to_string(), "musl");
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: a pod owner exempts one workload from an opted-in namespace
    #[test]
    fn story_pod_opts_out_of_opted_in_namespace() {
        let ns = labels(&[(INJECT_LABEL, "true")]);
        let pod = labels(&[(INJECT_LABEL, "false")]);

        assert_eq!(
            evaluate(Some(&ns), Some(&pod), None).unwrap(),
            InjectionDecision::Skip
        );
    }

    /// Story: a pod opts back in although its namespace opted out
    #[test]
    fn story_pod_opts_in_to_opted_out_namespace() {
        let ns = labels(&[(INJECT_LABEL, "false")]);
        let pod = labels(&[(INJECT_LABEL, "true")]);

        assert!(evaluate(Some(&ns), Some(&pod), None).unwrap().is_inject());
    }

    /// Story: musl-based images ask for the musl agent flavor
    #[test]
    fn story_flavor_annotation_selects_installer_variant() {
        let ns = labels(&[(INJECT_LABEL, "true")]);
        let ann = labels(&[(FLAVOR_ANNOTATION, "musl")]);

        match evaluate(Some(&ns), None, Some(&ann)).unwrap() {
            InjectionDecision::Inject(flavor) => assert_eq!(flavor.as_str(), "musl"),
            InjectionDecision::Skip => panic!("expected injection"),
        }
    }
}
