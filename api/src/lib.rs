#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Api contains the serializable boundary types of the render pipeline:
//! module and release metadata, rendered resources, match summaries, render
//! results, and the managed-label contract consumed by the apply layer.

use std::collections::BTreeMap;

use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};

/// GROUP is the label namespace for module-level keys.
pub static GROUP: &str = "opmodel.dev";

/// MANAGED_BY_LABEL is the well-known Kubernetes "managed-by" label key.
pub static MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// MANAGED_BY is the value set under [`MANAGED_BY_LABEL`].
pub static MANAGED_BY: &str = "open-platform-model";
/// RELEASE_NAME_LABEL carries the release name.
pub static RELEASE_NAME_LABEL: &str = "module-release.opmodel.dev/name";
/// RELEASE_NAMESPACE_LABEL carries the release namespace.
pub static RELEASE_NAMESPACE_LABEL: &str = "module-release.opmodel.dev/namespace";
/// RELEASE_UUID_LABEL carries the release identity.
pub static RELEASE_UUID_LABEL: &str = "module-release.opmodel.dev/uuid";
/// RELEASE_VERSION_LABEL carries the module version on release metadata.
pub static RELEASE_VERSION_LABEL: &str = "module-release.opmodel.dev/version";
/// MODULE_UUID_LABEL carries the module identity.
pub static MODULE_UUID_LABEL: &str = "module.opmodel.dev/uuid";
/// MODULE_VERSION_LABEL carries the module version on rendered resources.
pub static MODULE_VERSION_LABEL: &str = "module.opmodel.dev/version";
/// COMPONENT_NAME_LABEL carries the component a resource was rendered from.
pub static COMPONENT_NAME_LABEL: &str = "component.opmodel.dev/name";

/// ModuleMetadata is the static metadata of a module.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    /// Module name.
    pub name: String,
    /// Module version. May be empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Fully qualified module name.
    pub fqn: String,
    /// Namespace used when the caller supplies none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_namespace: String,
    /// Module labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Stable module identity.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub identity: String,
}

/// ReleaseMetadata identifies one release of a module.
///
/// The release identity is a name-based UUID of `fqn:name:namespace`: two
/// releases of the same module under the same name and namespace are the
/// same release.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseMetadata {
    /// Release name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Fully qualified module name.
    pub fqn: String,
    /// Module version. May be empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Release labels, as computed by the release overlay.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Identity of the module the release was built from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module_identity: String,
    /// Identity of this release.
    pub release_identity: String,
}

/// Resource is one rendered Kubernetes object, together with where it came
/// from. Resources are immutable once emitted; the pipeline only reorders
/// them.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// The object itself, unstructured.
    pub object: DynamicObject,
    /// Name of the component the object was rendered for.
    pub component: String,
    /// FQN of the transformer that produced the object.
    pub transformer: String,
}

/// TransformerMatch records one transformer matched to a component.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerMatch {
    /// Transformer FQN (`provider#transformer`).
    pub fqn: String,
}

/// MatchSummary is the externally-visible part of a match plan.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    /// Transformers matched per component.
    pub matches: BTreeMap<String, Vec<TransformerMatch>>,
    /// Components no transformer matched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched: Vec<String>,
}

/// TransformerSummary describes a transformer's requirements, for use in
/// "nothing matched" reporting.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerSummary {
    /// Transformer FQN.
    pub fqn: String,
    /// Labels the transformer requires, with their values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_labels: BTreeMap<String, String>,
    /// Resource FQNs the transformer requires.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_resources: Vec<String>,
    /// Trait FQNs the transformer requires.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_traits: Vec<String>,
}

impl std::fmt::Display for TransformerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.fqn)?;
        let mut sep = "";
        for (k, v) in &self.required_labels {
            write!(f, "{sep}label {k}={v}")?;
            sep = ", ";
        }
        for r in &self.required_resources {
            write!(f, "{sep}resource {r}")?;
            sep = ", ";
        }
        for t in &self.required_traits {
            write!(f, "{sep}trait {t}")?;
            sep = ", ";
        }
        write!(f, ")")
    }
}

/// TransformCause classifies a transform failure.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    PartialEq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransformCause {
    /// The transformer has no `#transform` definition.
    MissingTransform,
    /// Evaluating the filled transform failed.
    Eval,
    /// The transform output could not be decoded into objects.
    Decode,
}

/// RenderError is a per-component render failure. These aggregate on the
/// result; they do not abort the render.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderError {
    /// No transformer matched the component.
    #[error("component {component:?} did not match any transformer; available: {}",
        .available.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    #[serde(rename_all = "camelCase")]
    UnmatchedComponent {
        /// The component nothing matched.
        component: String,
        /// Every transformer that was considered, with its requirements.
        available: Vec<TransformerSummary>,
    },
    /// A transformer failed for one component.
    #[error("transformer {transformer} failed for component {component:?}: {cause}: {message}")]
    #[serde(rename_all = "camelCase")]
    Transform {
        /// The component being transformed.
        component: String,
        /// FQN of the failing transformer.
        transformer: String,
        /// Failure classification.
        cause: TransformCause,
        /// Details.
        message: String,
    },
    /// The render was cancelled between jobs.
    #[error("render cancelled: {reason}")]
    #[serde(rename_all = "camelCase")]
    Cancelled {
        /// Why the render stopped.
        reason: String,
    },
}

/// RenderResult is the complete outcome of a render.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResult {
    /// Rendered resources in apply order. May be empty, never null.
    pub resources: Vec<Resource>,
    /// The release that was rendered.
    pub release: ReleaseMetadata,
    /// The module the release came from.
    pub module: ModuleMetadata,
    /// Which transformers matched which components.
    pub match_plan: MatchSummary,
    /// Per-component errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RenderError>,
    /// Non-fatal findings, e.g. traits no matched transformer handles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Managed_labels is the label set the apply layer attaches to every
/// rendered resource. The version label is omitted when the module declares
/// no version.
pub fn managed_labels(release: &ReleaseMetadata, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (RELEASE_NAME_LABEL.to_string(), release.name.clone()),
        (
            RELEASE_NAMESPACE_LABEL.to_string(),
            release.namespace.clone(),
        ),
        (
            RELEASE_UUID_LABEL.to_string(),
            release.release_identity.clone(),
        ),
        (
            MODULE_UUID_LABEL.to_string(),
            release.module_identity.clone(),
        ),
        (COMPONENT_NAME_LABEL.to_string(), component.to_string()),
    ]);
    if !release.version.is_empty() {
        labels.insert(MODULE_VERSION_LABEL.to_string(), release.version.clone());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{from_value, json, to_value};

    fn release() -> ReleaseMetadata {
        ReleaseMetadata {
            name: "web".into(),
            namespace: "prod".into(),
            fqn: "ex.com/app@v0".into(),
            version: "1.2.3".into(),
            labels: BTreeMap::new(),
            module_identity: "0e0e0e0e-0000-5000-8000-000000000000".into(),
            release_identity: "2e0e4713-559b-5d22-a4b8-b9b6fcd42d86".into(),
        }
    }

    #[test]
    fn managed_labels_contract() {
        let labels = managed_labels(&release(), "api");
        assert_eq!(
            labels["app.kubernetes.io/managed-by"],
            "open-platform-model"
        );
        assert_eq!(labels["module-release.opmodel.dev/name"], "web");
        assert_eq!(labels["module-release.opmodel.dev/namespace"], "prod");
        assert_eq!(
            labels["module-release.opmodel.dev/uuid"],
            "2e0e4713-559b-5d22-a4b8-b9b6fcd42d86",
        );
        assert_eq!(labels["component.opmodel.dev/name"], "api");
        assert_eq!(labels["module.opmodel.dev/version"], "1.2.3");
    }

    #[test]
    fn version_label_omitted_when_empty() {
        let mut rel = release();
        rel.version = String::new();
        let labels = managed_labels(&rel, "api");
        assert!(!labels.contains_key(MODULE_VERSION_LABEL));
    }

    #[test]
    fn result_roundtrip_preserves_resource_order() {
        let objects = ["a", "b", "c"].map(|name| {
            from_value::<DynamicObject>(json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": name, "namespace": "prod"},
            }))
            .unwrap()
        });
        let result = RenderResult {
            resources: objects
                .into_iter()
                .map(|object| Resource {
                    object,
                    component: "web".into(),
                    transformer: "k8s#Service".into(),
                })
                .collect(),
            release: release(),
            module: ModuleMetadata::default(),
            match_plan: MatchSummary::default(),
            errors: vec![],
            warnings: vec![],
        };
        let encoded = to_value(&result).unwrap();
        let decoded: RenderResult = from_value(encoded).unwrap();
        let names: Vec<_> = decoded
            .resources
            .iter()
            .map(|r| r.object.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn render_errors_serialize_tagged() {
        let err = RenderError::Transform {
            component: "web".into(),
            transformer: "k8s#Deployment".into(),
            cause: TransformCause::MissingTransform,
            message: "no #transform".into(),
        };
        let v = to_value(&err).unwrap();
        assert_eq!(v["kind"], "transform");
        assert_eq!(v["cause"], "missing-transform");
        assert!(err.to_string().contains("missing-transform"));
    }
}
