//! Executing matched (component, transformer) pairs.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use kube::core::DynamicObject;
use serde_json::{json, Map as JsonMap, Value as Json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use api::{RenderError, Resource, TransformCause};
use opm_cue::{Value, ValuePath};

use crate::matcher::MatchPlan;
use crate::provider::Transformer;
use crate::release::{BuiltRelease, Component};

static TRANSFORM: LazyLock<ValuePath> = LazyLock::new(|| ValuePath::new().def("transform"));
static COMPONENT: LazyLock<ValuePath> = LazyLock::new(|| ValuePath::new().def("component"));
static OUTPUT: LazyLock<ValuePath> = LazyLock::new(|| ValuePath::new().field("output"));
static CTX_NAME: LazyLock<ValuePath> =
    LazyLock::new(|| ValuePath::new().def("context").field("name"));
static CTX_NAMESPACE: LazyLock<ValuePath> =
    LazyLock::new(|| ValuePath::new().def("context").field("namespace"));
static CTX_RELEASE_META: LazyLock<ValuePath> =
    LazyLock::new(|| ValuePath::new().def("context").def("moduleReleaseMetadata"));
static CTX_COMPONENT_META: LazyLock<ValuePath> =
    LazyLock::new(|| ValuePath::new().def("context").def("componentMetadata"));

/// Execute runs every job in the match plan, in plan order, and shapes the
/// transformer outputs into a uniform resource stream.
///
/// A failing job records an error and never disturbs other jobs. The
/// cancellation token is honored between jobs only; a single transform
/// evaluation is atomic.
#[instrument(skip_all, fields(jobs = plan.by_transformer.values().map(Vec::len).sum::<usize>()))]
pub fn execute(
    release: &BuiltRelease,
    plan: &MatchPlan,
    transformers: &[Transformer],
    cancel: &CancellationToken,
) -> (Vec<Resource>, Vec<RenderError>) {
    let by_fqn: BTreeMap<&str, &Transformer> =
        transformers.iter().map(|t| (t.fqn.as_str(), t)).collect();

    let mut resources = Vec::new();
    let mut errors = Vec::new();
    'jobs: for (fqn, components) in &plan.by_transformer {
        let Some(t) = by_fqn.get(fqn.as_str()) else {
            warn!(transformer = %fqn, "match plan names an unknown transformer");
            continue;
        };
        for cname in components {
            if cancel.is_cancelled() {
                debug!("cancelled between executor jobs");
                errors.push(RenderError::Cancelled {
                    reason: "cancellation requested between transform jobs".to_string(),
                });
                break 'jobs;
            }
            let Some(component) = release.components.get(cname) else {
                warn!(component = %cname, "match plan names an unknown component");
                continue;
            };
            match run_job(release, component, t) {
                Ok(mut out) => resources.append(&mut out),
                Err(e) => errors.push(e),
            }
        }
    }
    (resources, errors)
}

/// Run_job evaluates one transformer against one component.
fn run_job(
    release: &BuiltRelease,
    component: &Component,
    t: &Transformer,
) -> Result<Vec<Resource>, RenderError> {
    let fail = |cause: TransformCause, message: String| RenderError::Transform {
        component: component.name.clone(),
        transformer: t.fqn.clone(),
        cause,
        message,
    };

    let transform = t.value.lookup_path(&TRANSFORM);
    if !transform.exists() {
        return Err(fail(
            TransformCause::MissingTransform,
            "transformer declares no #transform".to_string(),
        ));
    }

    let filled = transform
        .fill_path(&COMPONENT, &component.value)
        .fill_path(
            &CTX_RELEASE_META,
            &Value::from_json(&release_meta_json(release)),
        )
        .fill_path(
            &CTX_COMPONENT_META,
            &Value::from_json(&component_meta_json(component)),
        )
        .fill_path(&CTX_NAME, &Value::from_json(&json!(release.metadata.name)))
        .fill_path(
            &CTX_NAMESPACE,
            &Value::from_json(&json!(release.metadata.namespace)),
        );

    if let Err(errs) = filled.validate(false) {
        return Err(fail(TransformCause::Eval, errs.format(None)));
    }

    let output = filled.lookup_path(&OUTPUT);
    if !output.exists() {
        // The transformer chose not to produce anything for this component.
        trace!(transformer = %t.fqn, component = %component.name, "no output");
        return Ok(Vec::new());
    }
    let json = output
        .encode_json()
        .map_err(|errs| fail(TransformCause::Decode, errs.format(None)))?;

    let mut resources = Vec::new();
    let mut push = |v: Json| -> Result<(), RenderError> {
        let object: DynamicObject = serde_json::from_value(v)
            .map_err(|e| fail(TransformCause::Decode, e.to_string()))?;
        resources.push(Resource {
            object,
            component: component.name.clone(),
            transformer: t.fqn.clone(),
        });
        Ok(())
    };

    // Output shapes: a list of resources, a single resource (the struct has
    // a top-level apiVersion), or a map of local name to resource.
    match json {
        Json::Array(elems) => {
            for v in elems {
                push(v)?;
            }
        }
        Json::Object(m) => {
            if m.contains_key("apiVersion") {
                push(Json::Object(m))?;
            } else {
                for (key, v) in m {
                    push(named(key, v))?;
                }
            }
        }
        other => {
            return Err(fail(
                TransformCause::Decode,
                format!("output must be a list or struct, got {other}"),
            ));
        }
    }
    debug!(
        transformer = %t.fqn,
        component = %component.name,
        resources = resources.len(),
        "transform complete"
    );
    Ok(resources)
}

/// Named defaults a map-shaped resource's name to its map key.
fn named(key: String, mut v: Json) -> Json {
    if let Json::Object(m) = &mut v {
        let meta = m
            .entry("metadata".to_string())
            .or_insert_with(|| Json::Object(JsonMap::new()));
        if let Json::Object(meta) = meta {
            meta.entry("name".to_string()).or_insert(Json::String(key));
        }
    }
    v
}

fn release_meta_json(release: &BuiltRelease) -> Json {
    let m = &release.metadata;
    let mut out = JsonMap::from_iter([
        ("name".to_string(), json!(m.name)),
        ("namespace".to_string(), json!(m.namespace)),
        ("fqn".to_string(), json!(m.fqn)),
        ("version".to_string(), json!(m.version)),
        ("identity".to_string(), json!(m.release_identity)),
    ]);
    if !m.labels.is_empty() {
        out.insert("labels".to_string(), json!(m.labels));
    }
    Json::Object(out)
}

fn component_meta_json(component: &Component) -> Json {
    let mut out = JsonMap::from_iter([("name".to_string(), json!(component.name))]);
    if !component.labels.is_empty() {
        out.insert("labels".to_string(), json!(component.labels));
    }
    if !component.annotations.is_empty() {
        out.insert("annotations".to_string(), json!(component.annotations));
    }
    if !component.resources.is_empty() {
        out.insert("resources".to_string(), json!(component.resources));
    }
    if !component.traits.is_empty() {
        out.insert("traits".to_string(), json!(component.traits));
    }
    Json::Object(out)
}
