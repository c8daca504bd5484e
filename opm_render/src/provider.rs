//! Provider loading: extracting transformer requirements.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;
use tracing::{debug, instrument};

use api::TransformerSummary;
use opm_cue::{Value, ValuePath};

use crate::{Error, Result};

/// Provider is a named set of transformers.
#[derive(Debug)]
pub struct Provider {
    /// Provider name, as configured by the caller.
    pub name: String,
    /// The compiled provider value.
    pub value: Value,
}

/// Transformer is one transformer of a provider, with its declared
/// requirements extracted and its `#transform` left opaque.
#[derive(Debug)]
pub struct Transformer {
    /// Transformer name within its provider.
    pub name: String,
    /// `<provider>#<transformer>`.
    pub fqn: String,
    /// Labels a component must carry, with equal values.
    pub required_labels: BTreeMap<String, String>,
    /// Resource FQNs a component must declare.
    pub required_resources: BTreeSet<String>,
    /// Trait FQNs a component must declare.
    pub required_traits: BTreeSet<String>,
    /// Labels the transformer understands but does not require.
    pub optional_labels: BTreeMap<String, String>,
    /// Resources the transformer understands but does not require.
    pub optional_resources: BTreeSet<String>,
    /// Traits the transformer handles without requiring them.
    pub optional_traits: BTreeSet<String>,
    /// The transformer's compiled value; `#transform` is looked up on it at
    /// execution time.
    pub value: Value,
}

impl Transformer {
    /// Summary flattens the required sets for error reporting.
    pub fn summary(&self) -> TransformerSummary {
        TransformerSummary {
            fqn: self.fqn.clone(),
            required_labels: self.required_labels.clone(),
            required_resources: self.required_resources.iter().cloned().collect(),
            required_traits: self.required_traits.iter().cloned().collect(),
        }
    }
}

/// Load selects a provider by name and extracts its transformers.
///
/// An empty name selects the sole configured provider; anything else is
/// [`Error::ProviderNotFound`] carrying the known names.
#[instrument(skip(providers), err)]
pub fn load(providers: &BTreeMap<String, Value>, name: &str) -> Result<(Provider, Vec<Transformer>)> {
    let known = || providers.keys().cloned().collect::<Vec<_>>();
    let (name, value) = if name.is_empty() {
        if providers.len() == 1 {
            let (n, v) = providers.iter().next().expect("length checked");
            (n.clone(), v)
        } else {
            return Err(Error::ProviderNotFound {
                name: String::new(),
                known: known(),
            });
        }
    } else {
        match providers.get(name) {
            Some(v) => (name.to_string(), v),
            None => {
                return Err(Error::ProviderNotFound {
                    name: name.to_string(),
                    known: known(),
                });
            }
        }
    };

    let mut transformers = Vec::new();
    let root = value.lookup_path(&ValuePath::new().field("transformers"));
    if root.exists() {
        for (tname, tvalue) in root.fields().map_err(Error::provider(&name))? {
            let json = tvalue.encode_json().map_err(Error::provider(&name))?;
            transformers.push(Transformer {
                fqn: format!("{name}#{tname}"),
                required_labels: label_map(&json, "requiredLabels"),
                required_resources: fqn_set(&json, "requiredResources"),
                required_traits: fqn_set(&json, "requiredTraits"),
                optional_labels: label_map(&json, "optionalLabels"),
                optional_resources: fqn_set(&json, "optionalResources"),
                optional_traits: fqn_set(&json, "optionalTraits"),
                name: tname,
                value: tvalue,
            });
        }
    }
    debug!(provider = %name, transformers = transformers.len(), "loaded provider");

    Ok((
        Provider {
            name,
            value: value.clone(),
        },
        transformers,
    ))
}

fn label_map(json: &Json, key: &str) -> BTreeMap<String, String> {
    json.get(key)
        .and_then(Json::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn fqn_set(json: &Json, key: &str) -> BTreeSet<String> {
    json.get(key)
        .and_then(Json::as_array)
        .map(|xs| {
            xs.iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    use opm_cue::Evaluator;

    use crate::testing::PROVIDER_SRC;

    fn providers() -> BTreeMap<String, Value> {
        let eval = Evaluator::new();
        BTreeMap::from([(
            "k8s".to_string(),
            eval.compile("provider.cue", PROVIDER_SRC).unwrap(),
        )])
    }

    #[test]
    fn extracts_requirements() {
        let (provider, transformers) = load(&providers(), "k8s").unwrap();
        assert_eq!(provider.name, "k8s");
        assert_eq!(transformers.len(), 2);

        let deployment = transformers.iter().find(|t| t.name == "Deployment").unwrap();
        assert_eq!(deployment.fqn, "k8s#Deployment");
        assert_eq!(
            deployment.required_labels.get("workload-type").map(String::as_str),
            Some("stateless"),
        );
        assert!(deployment.required_resources.contains("Container"));
        assert!(deployment.optional_traits.contains("AutoScale"));

        let service = transformers.iter().find(|t| t.name == "Service").unwrap();
        assert!(service.required_traits.contains("Expose"));
    }

    #[test]
    fn transform_subtree_is_retained_opaquely() {
        let (_, transformers) = load(&providers(), "k8s").unwrap();
        let t = &transformers[0];
        assert!(t
            .value
            .lookup_path(&ValuePath::new().def("transform"))
            .exists());
    }

    #[test]
    fn sole_provider_is_selected_by_default() {
        let (provider, _) = load(&providers(), "").unwrap();
        assert_eq!(provider.name, "k8s");
    }

    #[test]
    fn unknown_provider_lists_known_names() {
        let err = load(&providers(), "nope").unwrap_err();
        let Error::ProviderNotFound { name, known } = err else {
            panic!("wrong error: {err}")
        };
        assert_eq!(name, "nope");
        assert_eq!(known, ["k8s"]);
    }
}
