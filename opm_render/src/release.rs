//! Building a concrete release from a loaded module.
//!
//! The interesting part is the overlay: a synthesized source file, compiled
//! together with the module, that computes release identity and labels
//! inside the configuration language itself. It is never written to disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use serde_json::Value as Json;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use api::{
    ModuleMetadata, ReleaseMetadata, RELEASE_NAME_LABEL, RELEASE_UUID_LABEL,
    RELEASE_VERSION_LABEL,
};
use opm_cue::ast::{BasicType, Decl, Expr, Field, File, Import, Label, StrPart};
use opm_cue::{Errors, Evaluator, Pos, Value, ValuePath};

use crate::module::LoadedModule;
use crate::{Error, Result};

/// OVERLAY_FILE is the name the synthesized release overlay is compiled
/// under. Observable in diagnostics; never present on disk.
pub const OVERLAY_FILE: &str = "opm_release_overlay.cue";

/// NAMESPACE_UUID is the project namespace for name-based UUIDs, itself the
/// name-based UUID of `opmodel.dev` under the DNS namespace.
pub const NAMESPACE_UUID: &str = "c1cbe76d-5687-5a47-bfe6-83b081b15413";

static NAMESPACE: LazyLock<Uuid> = LazyLock::new(|| {
    Uuid::parse_str(NAMESPACE_UUID).expect("programmer error: static UUID")
});

/// Release_identity computes the identity UUID for a release coordinate.
///
/// This is the same derivation the overlay performs in-language; the two
/// must agree.
pub fn release_identity(fqn: &str, name: &str, namespace: &str) -> String {
    Uuid::new_v5(&NAMESPACE, format!("{fqn}:{name}:{namespace}").as_bytes()).to_string()
}

/// BuildOptions name the release being built.
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// Release name; empty means the module's name.
    pub name: String,
    /// Target namespace. Required.
    pub namespace: String,
}

/// Component is one concrete component extracted from a release.
#[derive(Debug)]
pub struct Component {
    /// Component name (`metadata.name`, falling back to the field label).
    pub name: String,
    /// Component labels.
    pub labels: BTreeMap<String, String>,
    /// Component annotations. Booleans are coerced to strings; values of
    /// other kinds are dropped.
    pub annotations: BTreeMap<String, String>,
    /// Declared resources by FQN.
    pub resources: BTreeMap<String, Json>,
    /// Declared traits by FQN.
    pub traits: BTreeMap<String, Json>,
    /// The compiled component value, for the executor to fill into
    /// transformers.
    pub value: Value,
}

/// BuiltRelease is a fully concrete release.
#[derive(Debug)]
pub struct BuiltRelease {
    /// The composed release value (module + overlay + values).
    pub value: Value,
    /// Release metadata, extracted from the overlay.
    pub metadata: ReleaseMetadata,
    /// The module's own metadata.
    pub module: ModuleMetadata,
    /// Concrete components by field name.
    pub components: BTreeMap<String, Component>,
}

static VALUES: LazyLock<ValuePath> = LazyLock::new(|| ValuePath::new().field("values"));
static CONFIG: LazyLock<ValuePath> = LazyLock::new(|| ValuePath::new().def("config"));
static COMPONENTS: LazyLock<ValuePath> = LazyLock::new(|| ValuePath::new().def("components"));
static RELEASE_META: LazyLock<ValuePath> =
    LazyLock::new(|| ValuePath::new().def("opmReleaseMeta"));

/// Build produces a release: overlay attached, external values unified,
/// values filled into `#config`, components extracted and validated.
#[instrument(skip_all, fields(name = %opts.name, namespace = %opts.namespace), err)]
pub fn build(
    eval: &Evaluator,
    module: &LoadedModule,
    opts: &BuildOptions,
    values_files: &[&Path],
) -> Result<BuiltRelease> {
    let name = if opts.name.is_empty() {
        module.metadata.name.clone()
    } else {
        opts.name.clone()
    };
    if opts.namespace.is_empty() {
        return Err(Error::NamespaceRequired(module.metadata.name.clone()));
    }

    // The overlay shares the module's package so its references resolve in
    // the module's top-level scope.
    let package = module.files.iter().find_map(|f| f.package.clone());
    let overlay = release_overlay(package, &name, &opts.namespace);

    let mut files = module.files.clone();
    files.push(overlay);
    let mut value = eval
        .compile_files(files)
        .map_err(Error::compile(&module.dir))?;

    // External values, in caller order: later files constrain further.
    for path in values_files {
        let src = fs::read_to_string(path)?;
        let v = eval
            .compile(&path.display().to_string(), &src)
            .map_err(Error::compile(&module.dir))?;
        trace!(file = %path.display(), "unifying values file");
        value = value.unify(&v);
    }

    value = inject_values(&value, &module.dir)?;

    let components = extract_components(&value, &module.dir)?;
    for c in components.values() {
        c.value.validate(true).map_err(|errs| {
            Error::ReleaseValidation(format!(
                "component {:?} is not concrete:\n{}",
                c.name,
                errs.format(Some(&module.dir)),
            ))
        })?;
    }

    let metadata = release_metadata(&value, &module.metadata, &name, &opts.namespace);
    debug!(
        release = %metadata.name,
        identity = %metadata.release_identity,
        components = components.len(),
        "built release"
    );

    Ok(BuiltRelease {
        value,
        metadata,
        module: module.metadata.clone(),
        components,
    })
}

/// Inject_values fills `values` into `#config` and reports closedness and
/// conflict errors together.
///
/// On top of validating the full fill, every top-level values field is also
/// unified with `#config` in isolation: single-field probes keep "field not
/// allowed" findings visible even when a sibling field in the same struct
/// has a type error, so one report carries both kinds.
fn inject_values(value: &Value, dir: &Path) -> Result<Value> {
    let values = value.lookup_path(&VALUES);
    if !values.exists() {
        return Err(Error::ReleaseValidation(
            "cannot fill #config: module declares no \"values\" field".to_string(),
        ));
    }

    let filled = value.fill_path(&CONFIG, &values);

    let mut errs = Errors::new();
    if let Err(e) = filled.lookup_path(&CONFIG).validate(false) {
        errs.extend(e);
    }
    if let Ok(fields) = values.fields() {
        for (fname, fvalue) in fields {
            let Ok(json) = fvalue.encode_json() else {
                continue;
            };
            let probe_json = Json::Object(serde_json::Map::from_iter([(fname, json)]));
            let probe = value.fill_path(&CONFIG, &Value::from_json(&probe_json));
            if let Err(e) = probe.lookup_path(&CONFIG).validate(false) {
                errs.extend(e);
            }
        }
    }
    errs.into_result()
        .map_err(|e| Error::ReleaseValidation(e.format(Some(dir))))?;

    Ok(filled)
}

/// Extract_components pulls the concrete components out of `#components`.
fn extract_components(value: &Value, dir: &Path) -> Result<BTreeMap<String, Component>> {
    let root = value.lookup_path(&COMPONENTS);
    if !root.exists() {
        return Ok(BTreeMap::new());
    }
    let mut out = BTreeMap::new();
    for (field_name, comp) in root.fields().map_err(Error::compile(dir))? {
        let name = comp
            .lookup_path(&ValuePath::new().field("metadata").field("name"))
            .to_str()
            .unwrap_or_else(|| field_name.clone());

        let meta = comp.lookup_path(&ValuePath::new().field("metadata"));
        let mut labels = BTreeMap::new();
        let mut annotations = BTreeMap::new();
        if meta.exists() {
            if let Ok(json) = meta.encode_json() {
                if let Some(m) = json.get("labels").and_then(Json::as_object) {
                    for (k, v) in m {
                        match v.as_str() {
                            Some(s) => {
                                labels.insert(k.clone(), s.to_string());
                            }
                            None => {
                                trace!(component = %name, label = %k, "dropping non-string label");
                            }
                        }
                    }
                }
                if let Some(m) = json.get("annotations").and_then(Json::as_object) {
                    for (k, v) in m {
                        match v {
                            Json::String(s) => {
                                annotations.insert(k.clone(), s.clone());
                            }
                            Json::Bool(b) => {
                                annotations.insert(k.clone(), b.to_string());
                            }
                            _ => {
                                debug!(
                                    component = %name,
                                    annotation = %k,
                                    "dropping annotation of unsupported kind"
                                );
                            }
                        }
                    }
                }
            }
        }

        out.insert(
            field_name,
            Component {
                resources: fqn_map(&comp, "resources"),
                traits: fqn_map(&comp, "traits"),
                name,
                labels,
                annotations,
                value: comp,
            },
        );
    }
    Ok(out)
}

/// Fqn_map reads a `#resources`-style definition as an FQN-keyed map.
fn fqn_map(comp: &Value, def: &str) -> BTreeMap<String, Json> {
    let v = comp.lookup_path(&ValuePath::new().def(def));
    if !v.exists() {
        return BTreeMap::new();
    }
    let Ok(fields) = v.fields() else {
        return BTreeMap::new();
    };
    fields
        .into_iter()
        .map(|(fqn, val)| {
            let json = val.encode_json().unwrap_or(Json::Null);
            (fqn, json)
        })
        .collect()
}

/// Release_metadata reads `#opmReleaseMeta`, falling back to `metadata.*`
/// when the overlay is absent (module values compiled without it).
fn release_metadata(
    value: &Value,
    module: &ModuleMetadata,
    name: &str,
    namespace: &str,
) -> ReleaseMetadata {
    let meta = value.lookup_path(&RELEASE_META);
    let get = |field: &str| {
        meta.lookup_path(&ValuePath::new().field(field))
            .to_str()
            .unwrap_or_default()
    };
    if meta.exists() {
        let labels = meta
            .lookup_path(&ValuePath::new().field("labels"))
            .encode_json()
            .ok()
            .and_then(|json| {
                json.as_object().map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect::<BTreeMap<_, _>>()
                })
            })
            .unwrap_or_default();
        ReleaseMetadata {
            name: get("name"),
            namespace: get("namespace"),
            fqn: get("fqn"),
            version: get("version"),
            labels,
            module_identity: module.identity.clone(),
            release_identity: get("identity"),
        }
    } else {
        ReleaseMetadata {
            name: name.to_string(),
            namespace: namespace.to_string(),
            fqn: module.fqn.clone(),
            version: module.version.clone(),
            labels: module.labels.clone(),
            module_identity: module.identity.clone(),
            release_identity: release_identity(&module.fqn, name, namespace),
        }
    }
}

/// Release_overlay synthesizes the overlay file.
///
/// `name`, `version`, and `identity` use identifier labels so the sibling
/// references inside `identity` and `labels` resolve; the three release
/// label keys use string-literal labels.
fn release_overlay(package: Option<String>, name: &str, namespace: &str) -> File {
    let pos = || Pos::synthetic(OVERLAY_FILE);
    let ident = |s: &str| Expr::Ident(s.to_string(), pos());
    let field = |label: Label, value: Expr| {
        Decl::Field(Field {
            label,
            optional: false,
            value,
            pos: pos(),
        })
    };
    let interp = |e: Expr| StrPart::Interp(e);
    let lit = |s: &str| StrPart::Lit(s.to_string());

    // identity: string & uuid.SHA1(<ns>, "\(fqn):\(name):\(namespace)")
    let identity = Expr::And(
        Box::new(Expr::BasicType(BasicType::String, pos())),
        Box::new(Expr::Call(
            Box::new(Expr::Select(
                Box::new(ident("uuid")),
                "SHA1".to_string(),
                pos(),
            )),
            vec![
                Expr::lit_str(NAMESPACE_UUID, pos()),
                Expr::Str(
                    vec![
                        interp(ident("fqn")),
                        lit(":"),
                        interp(ident("name")),
                        lit(":"),
                        interp(ident("namespace")),
                    ],
                    pos(),
                ),
            ],
            pos(),
        )),
        pos(),
    );

    // labels: metadata.labels & {<release label keys>}
    let labels = Expr::And(
        Box::new(Expr::Select(
            Box::new(ident("metadata")),
            "labels".to_string(),
            pos(),
        )),
        Box::new(Expr::Struct(
            vec![
                field(Label::string(RELEASE_NAME_LABEL), ident("name")),
                field(Label::string(RELEASE_VERSION_LABEL), ident("version")),
                field(Label::string(RELEASE_UUID_LABEL), ident("identity")),
            ],
            pos(),
        )),
        pos(),
    );

    let meta = Expr::Struct(
        vec![
            field(Label::ident("name"), Expr::lit_str(name, pos())),
            field(Label::ident("namespace"), Expr::lit_str(namespace, pos())),
            field(
                Label::ident("fqn"),
                Expr::Select(Box::new(ident("metadata")), "fqn".to_string(), pos()),
            ),
            field(
                Label::ident("version"),
                Expr::Select(Box::new(ident("metadata")), "version".to_string(), pos()),
            ),
            field(Label::ident("identity"), identity),
            field(Label::ident("labels"), labels),
        ],
        pos(),
    );

    File {
        filename: OVERLAY_FILE.to_string(),
        package,
        imports: vec![Import {
            path: "uuid".to_string(),
            alias: None,
            pos: pos(),
        }],
        decls: vec![field(Label::definition("opmReleaseMeta"), meta)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::module;
    use crate::testing::{write_module, MODULE_SRC};

    fn demo_release(opts: &BuildOptions) -> Result<BuiltRelease> {
        let eval = Evaluator::new();
        let dir = write_module(&[("module.cue", MODULE_SRC)]);
        let module = module::load(&eval, dir.path(), None)?;
        build(&eval, &module, opts, &[])
    }

    fn opts(name: &str, namespace: &str) -> BuildOptions {
        BuildOptions {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    #[test]
    fn overlay_formats_like_source() {
        let f = release_overlay(Some("demo".into()), "rel", "prod");
        let src = opm_cue::ast::format_file(&f);
        assert!(src.starts_with("package demo\n"), "{src}");
        assert!(src.contains("import \"uuid\""), "{src}");
        assert!(src.contains("#opmReleaseMeta"), "{src}");
        assert!(
            src.contains("uuid.SHA1(\"c1cbe76d-5687-5a47-bfe6-83b081b15413\""),
            "{src}"
        );
    }

    #[test]
    fn build_computes_release_metadata() {
        let r = demo_release(&opts("rel", "prod")).unwrap();
        assert_eq!(r.metadata.name, "rel");
        assert_eq!(r.metadata.namespace, "prod");
        assert_eq!(r.metadata.fqn, "ex.com/demo@v0");
        assert_eq!(r.metadata.version, "0.1.0");
        assert_eq!(
            r.metadata.release_identity,
            release_identity("ex.com/demo@v0", "rel", "prod"),
        );
        assert_eq!(r.metadata.module_identity, r.module.identity);
        assert_eq!(
            r.metadata.labels.get(RELEASE_NAME_LABEL).map(String::as_str),
            Some("rel"),
        );
        assert_eq!(
            r.metadata.labels.get("app.io/team").map(String::as_str),
            Some("platform"),
        );
    }

    #[test]
    fn identity_is_stable_and_namespace_sensitive() {
        let a = demo_release(&opts("x", "prod")).unwrap();
        let b = demo_release(&opts("x", "prod")).unwrap();
        let c = demo_release(&opts("x", "stage")).unwrap();
        assert_eq!(a.metadata.release_identity, b.metadata.release_identity);
        assert_ne!(a.metadata.release_identity, c.metadata.release_identity);
    }

    #[test]
    fn release_name_defaults_to_module_name() {
        let r = demo_release(&opts("", "prod")).unwrap();
        assert_eq!(r.metadata.name, "demo");
    }

    #[test]
    fn namespace_is_required() {
        let err = demo_release(&opts("rel", "")).unwrap_err();
        assert!(matches!(err, Error::NamespaceRequired(_)));
    }

    #[test]
    fn components_are_extracted() {
        let r = demo_release(&opts("rel", "prod")).unwrap();
        let web = &r.components["web"];
        assert_eq!(web.name, "web");
        assert_eq!(
            web.labels.get("workload-type").map(String::as_str),
            Some("stateless"),
        );
        // Annotation coercion: strings kept, booleans stringified.
        assert_eq!(
            web.annotations.get("app.io/gc").map(String::as_str),
            Some("true"),
        );
        assert!(web.resources.contains_key("Container"));
        assert_eq!(web.resources["Container"]["image"], "nginx:1.27");
        assert!(web.traits.contains_key("Expose"));
        assert_eq!(r.components["data"].resources["Volume"]["size"], "10Gi");
    }

    fn values_file(src: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("values.cue");
        std::fs::write(&path, src).unwrap();
        (dir, path)
    }

    #[test]
    fn values_files_constrain_further() {
        let eval = Evaluator::new();
        let dir = write_module(&[("module.cue", MODULE_SRC)]);
        let (_vdir, values) = values_file("values: debug: true\n");
        let module = module::load(&eval, dir.path(), None).unwrap();
        let r = build(&eval, &module, &opts("rel", "prod"), &[values.as_path()]).unwrap();
        let debug = r
            .value
            .lookup_path(&ValuePath::new().def("config").field("debug"));
        assert_eq!(debug.encode_json().unwrap(), serde_json::json!(true));
        // Unifying the same file again changes nothing.
        let r2 = build(
            &eval,
            &module,
            &opts("rel", "prod"),
            &[values.as_path(), values.as_path()],
        )
        .unwrap();
        assert_eq!(
            r2.components["web"].resources["Container"],
            r.components["web"].resources["Container"],
        );
    }

    #[test]
    fn conflicting_values_file_fails_validation() {
        let eval = Evaluator::new();
        let dir = write_module(&[("module.cue", MODULE_SRC)]);
        let (_vdir, values) = values_file("values: replicas: \"three\"\n");
        let module = module::load(&eval, dir.path(), None).unwrap();
        let err =
            build(&eval, &module, &opts("rel", "prod"), &[values.as_path()]).unwrap_err();
        let Error::ReleaseValidation(msg) = err else {
            panic!("wrong error: {err}")
        };
        assert!(msg.contains("conflicting"), "{msg}");
    }

    #[test]
    fn unknown_values_field_is_not_allowed() {
        let eval = Evaluator::new();
        let dir = write_module(&[("module.cue", MODULE_SRC)]);
        let (_vdir, values) = values_file("values: bogus: 1\n");
        let module = module::load(&eval, dir.path(), None).unwrap();
        let err =
            build(&eval, &module, &opts("rel", "prod"), &[values.as_path()]).unwrap_err();
        let Error::ReleaseValidation(msg) = err else {
            panic!("wrong error: {err}")
        };
        assert!(msg.contains("bogus"), "{msg}");
        assert!(msg.contains("not allowed"), "{msg}");
    }

    #[test]
    fn missing_values_field_is_fatal() {
        let eval = Evaluator::new();
        let dir = write_module(&[(
            "module.cue",
            "package p\nmetadata: {name: \"m\", fqn: \"f\"}\n#config: {...}\n",
        )]);
        let module = module::load(&eval, dir.path(), None).unwrap();
        let err = build(&eval, &module, &opts("rel", "prod"), &[]).unwrap_err();
        let Error::ReleaseValidation(msg) = err else {
            panic!("wrong error: {err}")
        };
        assert!(msg.contains("#config"), "{msg}");
    }

    #[test]
    fn non_concrete_component_is_fatal() {
        let eval = Evaluator::new();
        let dir = write_module(&[(
            "module.cue",
            concat!(
                "package p\n",
                "metadata: {name: \"m\", fqn: \"f\"}\n",
                "#config: {...}\n",
                "values: {}\n",
                "#components: broken: metadata: {name: string}\n",
            ),
        )]);
        let module = module::load(&eval, dir.path(), None).unwrap();
        let err = build(&eval, &module, &opts("rel", "prod"), &[]).unwrap_err();
        let Error::ReleaseValidation(msg) = err else {
            panic!("wrong error: {err}")
        };
        assert!(msg.contains("broken"), "{msg}");
    }

    #[test]
    fn namespace_uuid_matches_dns_derivation() {
        let want = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"opmodel.dev");
        assert_eq!(want.to_string(), NAMESPACE_UUID);
    }
}
