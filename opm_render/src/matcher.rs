//! Matching components against transformer predicates.

use std::collections::BTreeMap;

use tracing::{instrument, trace};

use crate::provider::Transformer;
use crate::release::Component;

/// MatchDetail is the per-pair diagnostic record.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchDetail {
    /// Component field name.
    pub component: String,
    /// Transformer FQN.
    pub transformer: String,
    /// Whether the pair matched.
    pub matched: bool,
    /// Required labels the component is missing or carries with a different
    /// value.
    pub missing_labels: Vec<String>,
    /// Required resources the component does not declare.
    pub missing_resources: Vec<String>,
    /// Required traits the component does not declare.
    pub missing_traits: Vec<String>,
    /// Component traits this transformer neither requires nor declares
    /// optional. Only meaningful on matched pairs.
    pub unhandled_traits: Vec<String>,
    /// Human-readable summary of the decision.
    pub reason: String,
}

/// MatchPlan is the complete matching outcome.
#[derive(Clone, Debug, Default)]
pub struct MatchPlan {
    /// Components grouped by the transformer that will process them, in
    /// transformer-FQN order; component order within a group follows the
    /// component iteration order.
    pub by_transformer: BTreeMap<String, Vec<String>>,
    /// Components no transformer matched.
    pub unmatched: Vec<String>,
    /// One record per (component, transformer) pair.
    pub details: Vec<MatchDetail>,
}

impl MatchPlan {
    /// Matched_transformers returns the FQNs matched to `component`.
    pub fn matched_transformers(&self, component: &str) -> Vec<&str> {
        self.details
            .iter()
            .filter(|d| d.matched && d.component == component)
            .map(|d| d.transformer.as_str())
            .collect()
    }
}

/// Plan evaluates every (component, transformer) pair.
///
/// Components arrive in a sorted map and transformers in declaration order,
/// so the plan is deterministic for fixed inputs.
#[instrument(skip_all, fields(components = components.len(), transformers = transformers.len()))]
pub fn plan(
    components: &BTreeMap<String, Component>,
    transformers: &[Transformer],
) -> MatchPlan {
    let mut plan = MatchPlan::default();
    for (cname, component) in components {
        let mut matched_any = false;
        for t in transformers {
            let detail = check(cname, component, t);
            trace!(
                component = %cname,
                transformer = %t.fqn,
                matched = detail.matched,
                reason = %detail.reason,
                "considered pair"
            );
            if detail.matched {
                matched_any = true;
                plan.by_transformer
                    .entry(t.fqn.clone())
                    .or_default()
                    .push(cname.clone());
            }
            plan.details.push(detail);
        }
        if !matched_any {
            plan.unmatched.push(cname.clone());
        }
    }
    plan
}

/// Check decides a single pair.
fn check(cname: &str, component: &Component, t: &Transformer) -> MatchDetail {
    let missing_labels: Vec<String> = t
        .required_labels
        .iter()
        .filter(|(k, v)| component.labels.get(*k) != Some(v))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    let missing_resources: Vec<String> = t
        .required_resources
        .iter()
        .filter(|fqn| !component.resources.contains_key(*fqn))
        .cloned()
        .collect();
    let missing_traits: Vec<String> = t
        .required_traits
        .iter()
        .filter(|fqn| !component.traits.contains_key(*fqn))
        .cloned()
        .collect();

    let matched =
        missing_labels.is_empty() && missing_resources.is_empty() && missing_traits.is_empty();

    let unhandled_traits: Vec<String> = if matched {
        component
            .traits
            .keys()
            .filter(|fqn| !t.required_traits.contains(*fqn) && !t.optional_traits.contains(*fqn))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let reason = if matched {
        "all requirements satisfied".to_string()
    } else {
        let mut parts = Vec::new();
        if !missing_labels.is_empty() {
            parts.push(format!("missing labels: {}", missing_labels.join(", ")));
        }
        if !missing_resources.is_empty() {
            parts.push(format!(
                "missing resources: {}",
                missing_resources.join(", ")
            ));
        }
        if !missing_traits.is_empty() {
            parts.push(format!("missing traits: {}", missing_traits.join(", ")));
        }
        parts.join("; ")
    };

    MatchDetail {
        component: cname.to_string(),
        transformer: t.fqn.clone(),
        matched,
        missing_labels,
        missing_resources,
        missing_traits,
        unhandled_traits,
        reason,
    }
}
