//! End-to-end render pipeline tests over txtar fixtures.
//!
//! Each fixture holds a `module.cue`, a `provider.cue`, and the `want.json`
//! resource stream the render must produce.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use assert_json_diff::assert_json_eq;
use serde_json::{from_str, to_value, Value as Json};
use simple_txtar::Archive;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use api::{RenderError, RenderResult};
use opm_cue::{Evaluator, Value, MODULE_MARKER};
use opm_render::{render, RenderOptions};

struct Fixture {
    // Holds the on-disk module for the duration of the test.
    _dir: TempDir,
    module_path: PathBuf,
    providers: BTreeMap<String, Value>,
    want: Json,
}

fn load_fixture(eval: &Evaluator, name: &str) -> Fixture {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("render")
        .join(format!("{name}.txtar"));
    let path = path.as_path().to_str().expect("programmer error");
    let ar = Archive::from_file(path).expect("unable to load txtar");

    let dir = TempDir::new().expect("tempdir");
    fs::create_dir(dir.path().join(MODULE_MARKER)).expect("marker");
    let module = ar.get("module.cue").expect("malformed txtar");
    fs::write(dir.path().join("module.cue"), &module.content).expect("write module");

    let provider = ar.get("provider.cue").expect("malformed txtar");
    let providers = BTreeMap::from([(
        "k8s".to_string(),
        eval.compile("provider.cue", &provider.content)
            .expect("bad provider fixture"),
    )]);

    let want: Json = {
        let f = ar.get("want.json").expect("malformed txtar");
        from_str(&f.content).expect("bad json")
    };

    Fixture {
        module_path: dir.path().to_path_buf(),
        _dir: dir,
        providers,
        want,
    }
}

fn run(eval: &Evaluator, fixture: &Fixture, name: &str, namespace: &str) -> RenderResult {
    render(
        eval,
        &RenderOptions {
            module_path: fixture.module_path.clone(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        },
        &fixture.providers,
        &CancellationToken::new(),
    )
    .expect("render failed")
}

#[test_log::test]
fn single_matched_component() {
    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "single_match");
    let got = run(&eval, &fixture, "x", "prod");

    assert!(got.errors.is_empty(), "{:?}", got.errors);
    assert!(got.warnings.is_empty(), "{:?}", got.warnings);
    assert_eq!(got.match_plan.matches["web"].len(), 1);
    assert_eq!(got.match_plan.matches["web"][0].fqn, "k8s#Deployment");
    assert!(got.match_plan.unmatched.is_empty());
    assert_json_eq!(to_value(&got.resources).unwrap(), fixture.want);
}

#[test_log::test]
fn typed_decode_of_rendered_deployment() {
    use k8s_openapi::api::apps::v1::Deployment;

    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "single_match");
    let got = run(&eval, &fixture, "x", "prod");

    let object = to_value(&got.resources[0].object).unwrap();
    let deployment: Deployment = serde_json::from_value(object).unwrap();
    let spec = deployment.spec.unwrap();
    assert_eq!(
        spec.template.spec.unwrap().containers[0].image.as_deref(),
        Some("nginx:1.27"),
    );
}

#[test_log::test]
fn release_identity_is_deterministic() {
    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "single_match");

    let prod1 = run(&eval, &fixture, "x", "prod");
    let prod2 = run(&eval, &fixture, "x", "prod");
    let stage = run(&eval, &fixture, "x", "stage");

    // uuid5(uuid5(DNS, "opmodel.dev"), "ex.com/app@v0:x:prod")
    assert_eq!(
        prod1.release.release_identity,
        "2e0e4713-559b-5d22-a4b8-b9b6fcd42d86",
    );
    assert_eq!(prod1.release.release_identity, prod2.release.release_identity);
    assert_ne!(prod1.release.release_identity, stage.release.release_identity);
    assert_eq!(prod1.release.fqn, "ex.com/app@v0");
    assert_eq!(
        prod1.release.labels["module-release.opmodel.dev/uuid"],
        prod1.release.release_identity,
    );
}

#[test_log::test]
fn unmatched_component_reports_requirements() {
    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "unmatched");
    let got = run(&eval, &fixture, "x", "prod");

    assert_json_eq!(to_value(&got.resources).unwrap(), fixture.want);
    assert_eq!(got.match_plan.unmatched, ["web"]);
    assert_eq!(got.errors.len(), 1);
    let RenderError::UnmatchedComponent {
        component,
        available,
    } = &got.errors[0]
    else {
        panic!("wrong error: {:?}", got.errors[0]);
    };
    assert_eq!(component, "web");
    assert_eq!(available.len(), 1);
    assert_eq!(
        available[0]
            .required_labels
            .get("workload-type")
            .map(String::as_str),
        Some("stateless"),
    );
    let rendered = got.errors[0].to_string();
    assert!(rendered.contains("k8s#Deployment"), "{rendered}");
}

#[test_log::test]
fn traits_warn_only_when_nothing_handles_them() {
    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "traits");
    let got = run(&eval, &fixture, "x", "prod");

    assert!(got.errors.is_empty(), "{:?}", got.errors);
    assert_json_eq!(to_value(&got.resources).unwrap(), fixture.want);
    // Expose and AutoScale are each declared by a matched transformer;
    // Backup by neither.
    assert_eq!(got.warnings.len(), 1, "{:?}", got.warnings);
    assert!(got.warnings[0].contains("Backup"), "{}", got.warnings[0]);
}

#[test_log::test]
fn resources_order_deterministically() {
    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "ordering");
    let got = run(&eval, &fixture, "x", "prod");

    assert_json_eq!(to_value(&got.resources).unwrap(), fixture.want);

    let again = run(&eval, &fixture, "x", "prod");
    assert_eq!(
        serde_json::to_string(&got.resources).unwrap(),
        serde_json::to_string(&again.resources).unwrap(),
    );
}

#[test_log::test]
fn zero_components_render_empty() {
    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "zero_components");
    let got = run(&eval, &fixture, "x", "prod");

    assert!(got.errors.is_empty(), "{:?}", got.errors);
    assert!(got.warnings.is_empty());
    assert!(got.resources.is_empty());
    assert!(got.match_plan.matches.is_empty());
}

#[test_log::test]
fn result_json_roundtrip_keeps_order() {
    let eval = Evaluator::new();
    let fixture = load_fixture(&eval, "ordering");
    let got = run(&eval, &fixture, "x", "prod");

    let encoded = serde_json::to_string(&got).unwrap();
    let decoded: RenderResult = serde_json::from_str(&encoded).unwrap();
    let names = |r: &RenderResult| {
        r.resources
            .iter()
            .map(|r| r.object.metadata.name.clone().unwrap_or_default())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&got), names(&decoded));
}
