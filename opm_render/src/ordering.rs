//! Deterministic resource ordering and unhandled-trait warnings.

use std::collections::BTreeMap;

use tracing::trace;

use api::Resource;

use crate::matcher::MatchPlan;

/// Weight buckets kinds for safe apply: namespaces and CRDs first, RBAC and
/// configuration next, workloads in the middle, routing after them, and
/// admission webhooks last. Kinds not listed land between workloads and
/// webhooks, so custom resources follow their definitions.
fn weight(kind: &str) -> i32 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 10,
        "NetworkPolicy" => 20,
        "ResourceQuota" => 21,
        "LimitRange" => 22,
        "PodDisruptionBudget" => 23,
        "ServiceAccount" => 30,
        "Secret" => 31,
        "ConfigMap" => 32,
        "StorageClass" => 33,
        "PersistentVolume" => 34,
        "PersistentVolumeClaim" => 35,
        "ClusterRole" => 40,
        "ClusterRoleBinding" => 41,
        "Role" => 42,
        "RoleBinding" => 43,
        "Service" => 50,
        "DaemonSet" => 60,
        "Pod" => 61,
        "ReplicaSet" => 62,
        "Deployment" => 63,
        "StatefulSet" => 64,
        "Job" => 65,
        "CronJob" => 66,
        "Ingress" => 70,
        "HTTPRoute" => 71,
        "APIService" => 90,
        "MutatingWebhookConfiguration" => 95,
        "ValidatingWebhookConfiguration" => 96,
        _ => 80,
    }
}

/// Key is the five-part sort key of a resource.
fn key(r: &Resource) -> (i32, String, String, String, String) {
    let (group, kind) = match &r.object.types {
        Some(t) => {
            let group = match t.api_version.split_once('/') {
                Some((group, _)) => group.to_string(),
                None => String::new(), // core group
            };
            (group, t.kind.clone())
        }
        None => (String::new(), String::new()),
    };
    (
        weight(&kind),
        group,
        kind,
        r.object.metadata.namespace.clone().unwrap_or_default(),
        r.object.metadata.name.clone().unwrap_or_default(),
    )
}

/// Sort orders resources by `(weight, group, kind, namespace, name)`.
///
/// The sort is stable: resources with equal keys keep their executor
/// emission order. Downstream inventory digesting relies on this order, so
/// identical inputs must produce byte-identical sequences.
pub fn sort(resources: &mut [Resource]) {
    resources.sort_by_key(key);
}

/// Unhandled_trait_warnings reports every component trait that no matched
/// transformer declares, required or optional.
///
/// A trait only warns when it is unhandled by *every* matched transformer:
/// a component with traits split across several transformers is fully
/// handled even though each transformer ignores some of them.
pub fn unhandled_trait_warnings(plan: &MatchPlan) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut matched_per_component: BTreeMap<&str, u32> = BTreeMap::new();
    let mut unhandled_counts: BTreeMap<(&str, &str), u32> = BTreeMap::new();
    for d in plan.details.iter().filter(|d| d.matched) {
        *matched_per_component.entry(&d.component).or_default() += 1;
        for t in &d.unhandled_traits {
            *unhandled_counts
                .entry((&d.component, t.as_str()))
                .or_default() += 1;
        }
    }
    for ((component, trait_fqn), unhandled) in unhandled_counts {
        let total = matched_per_component[component];
        trace!(component, trait_fqn, unhandled, total, "trait handling count");
        if unhandled == total {
            warnings.push(format!(
                "component {component:?}: trait {trait_fqn:?} is not handled by any matched transformer",
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    use kube::core::DynamicObject;
    use serde_json::{from_value, json};

    fn resource(api_version: &str, kind: &str, namespace: &str, name: &str) -> Resource {
        let object: DynamicObject = from_value(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {"name": name, "namespace": namespace},
        }))
        .unwrap();
        Resource {
            object,
            component: "c".into(),
            transformer: "p#t".into(),
        }
    }

    fn kinds(resources: &[Resource]) -> Vec<String> {
        resources
            .iter()
            .map(|r| r.object.types.as_ref().unwrap().kind.clone())
            .collect()
    }

    #[test]
    fn weights_order_kinds_for_apply() {
        let mut rs = vec![
            resource("admissionregistration.k8s.io/v1", "ValidatingWebhookConfiguration", "", "w"),
            resource("apps/v1", "Deployment", "ns", "d"),
            resource("acme.dev/v1", "Widget", "ns", "cr"),
            resource("apiextensions.k8s.io/v1", "CustomResourceDefinition", "", "widgets.acme.dev"),
            resource("v1", "Namespace", "", "ns"),
            resource("v1", "ConfigMap", "ns", "cm"),
        ];
        sort(&mut rs);
        assert_eq!(
            kinds(&rs),
            [
                "Namespace",
                "CustomResourceDefinition",
                "ConfigMap",
                "Deployment",
                "Widget",
                "ValidatingWebhookConfiguration",
            ],
        );
    }

    #[test]
    fn name_breaks_ties() {
        let mut rs = vec![
            resource("v1", "Service", "ns", "web"),
            resource("v1", "Service", "ns", "api"),
        ];
        sort(&mut rs);
        let names: Vec<_> = rs
            .iter()
            .map(|r| r.object.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, ["api", "web"]);
    }

    #[test]
    fn namespace_breaks_ties_before_name() {
        let mut rs = vec![
            resource("v1", "Service", "zz", "api"),
            resource("v1", "Service", "aa", "web"),
        ];
        sort(&mut rs);
        let ns: Vec<_> = rs
            .iter()
            .map(|r| r.object.metadata.namespace.clone().unwrap())
            .collect();
        assert_eq!(ns, ["aa", "zz"]);
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let mut rs = vec![
            resource("v1", "Service", "ns", "same"),
            resource("v1", "Service", "ns", "same"),
        ];
        rs[0].transformer = "p#first".into();
        rs[1].transformer = "p#second".into();
        sort(&mut rs);
        assert_eq!(rs[0].transformer, "p#first");
        assert_eq!(rs[1].transformer, "p#second");
    }

    mod warnings {
        use super::*;

        use crate::matcher::MatchDetail;

        fn detail(component: &str, transformer: &str, unhandled: &[&str]) -> MatchDetail {
            MatchDetail {
                component: component.into(),
                transformer: transformer.into(),
                matched: true,
                missing_labels: vec![],
                missing_resources: vec![],
                missing_traits: vec![],
                unhandled_traits: unhandled.iter().map(|s| s.to_string()).collect(),
                reason: "all requirements satisfied".into(),
            }
        }

        #[test]
        fn trait_handled_by_any_matched_transformer_does_not_warn() {
            // Two transformers match; each handles the trait the other does
            // not.
            let plan = MatchPlan {
                details: vec![
                    detail("web", "k8s#Deployment", &["Expose"]),
                    detail("web", "k8s#Service", &["AutoScale"]),
                ],
                ..Default::default()
            };
            assert!(unhandled_trait_warnings(&plan).is_empty());
        }

        #[test]
        fn trait_unhandled_everywhere_warns_once() {
            let plan = MatchPlan {
                details: vec![
                    detail("web", "k8s#Deployment", &["Backup"]),
                    detail("web", "k8s#Service", &["Backup"]),
                ],
                ..Default::default()
            };
            let warnings = unhandled_trait_warnings(&plan);
            assert_eq!(warnings.len(), 1);
            assert!(warnings[0].contains("Backup"), "{}", warnings[0]);
            assert!(warnings[0].contains("web"), "{}", warnings[0]);
        }

        #[test]
        fn unmatched_pairs_do_not_count() {
            let mut unmatched = detail("web", "k8s#Other", &["Backup"]);
            unmatched.matched = false;
            let plan = MatchPlan {
                details: vec![detail("web", "k8s#Deployment", &[]), unmatched],
                ..Default::default()
            };
            assert!(unhandled_trait_warnings(&plan).is_empty());
        }
    }
}
