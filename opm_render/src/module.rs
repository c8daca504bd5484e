//! Module loading and static inspection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value as Json;
use tracing::{debug, instrument, trace};

use api::ModuleMetadata;
use opm_cue::ast::{Decl, Expr, File, LabelKind, StrPart};
use opm_cue::{Evaluator, ScopedEnv, Value, ValuePath, MODULE_MARKER};

use crate::{Error, Result};

/// LoadedModule is a compiled module plus everything later phases need.
#[derive(Debug)]
pub struct LoadedModule {
    /// The compiled module value.
    pub value: Value,
    /// The parsed sources, kept so the release builder can recompile the
    /// module together with its overlay.
    pub files: Vec<File>,
    /// Evaluated module metadata.
    pub metadata: ModuleMetadata,
    /// The resolved module directory.
    pub dir: PathBuf,
}

/// ModuleInfo is the statically-extractable part of a module's metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModuleInfo {
    /// `metadata.name` when it is a string literal, else empty.
    pub name: String,
    /// `metadata.defaultNamespace` when it is a string literal, else empty.
    pub default_namespace: String,
}

/// Resolve_path canonicalizes a module path and checks the module marker.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let abs = path
        .canonicalize()
        .map_err(|_| Error::PathMissing(path.to_path_buf()))?;
    if !abs.is_dir() {
        return Err(Error::PathMissing(path.to_path_buf()));
    }
    if !abs.join(MODULE_MARKER).is_dir() {
        return Err(Error::NotAModule(abs));
    }
    Ok(abs)
}

/// Load compiles the module at `path`.
///
/// When `registry` is set, the compiler's external package source is scoped
/// to it for the duration of the load and restored on exit.
#[instrument(skip(eval, registry), err)]
pub fn load(eval: &Evaluator, path: &Path, registry: Option<&str>) -> Result<LoadedModule> {
    let dir = resolve_path(path)?;
    let _registry = registry.map(ScopedEnv::registry);

    let files = eval.parse_dir(&dir).map_err(Error::compile(&dir))?;
    let value = eval
        .compile_files(files.clone())
        .map_err(Error::compile(&dir))?;
    let metadata = metadata_of(&value, &dir)?;
    debug!(name = %metadata.name, fqn = %metadata.fqn, "loaded module");

    Ok(LoadedModule {
        value,
        files,
        metadata,
        dir,
    })
}

/// Metadata_of evaluates `metadata` into a [`ModuleMetadata`].
pub(crate) fn metadata_of(value: &Value, dir: &Path) -> Result<ModuleMetadata> {
    let meta = value.lookup_path(&ValuePath::new().field("metadata"));
    if !meta.exists() {
        return Ok(ModuleMetadata::default());
    }
    let json = meta.encode_json().map_err(Error::compile(dir))?;
    let get = |k: &str| {
        json.get(k)
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let labels = json
        .get("labels")
        .and_then(Json::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();
    Ok(ModuleMetadata {
        name: get("name"),
        version: get("version"),
        fqn: get("fqn"),
        default_namespace: get("defaultNamespace"),
        labels,
        identity: get("identity"),
    })
}

/// Inspect_metadata recovers `metadata.name` and `metadata.defaultNamespace`
/// from the syntax tree, without evaluating.
///
/// Only string literals are recovered; computed metadata comes back as empty
/// strings, and callers that need it go through [`load`]. Static extraction
/// exists because full evaluation of `metadata` is circular with the release
/// overlay, whose labels reference it.
pub fn inspect_metadata(files: &[File]) -> ModuleInfo {
    let mut info = ModuleInfo::default();
    for f in files {
        for d in &f.decls {
            let Decl::Field(field) = d else { continue };
            if field.label.kind == LabelKind::Definition || field.label.name != "metadata" {
                continue;
            }
            let Expr::Struct(decls, _) = &field.value else {
                continue;
            };
            for d in decls {
                let Decl::Field(field) = d else { continue };
                let Some(lit) = string_lit(&field.value) else {
                    continue;
                };
                match field.label.name.as_str() {
                    "name" if info.name.is_empty() => info.name = lit,
                    "defaultNamespace" if info.default_namespace.is_empty() => {
                        info.default_namespace = lit;
                    }
                    _ => trace!(field = %field.label.name, "ignoring metadata field"),
                }
            }
        }
    }
    info
}

/// String_lit returns the literal text of an interpolation-free string.
fn string_lit(e: &Expr) -> Option<String> {
    match e {
        Expr::Str(parts, _) => match parts.as_slice() {
            [StrPart::Lit(s)] => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use opm_cue::parse_file;
    use tempfile::TempDir;

    use crate::testing::write_module;

    #[test]
    fn resolve_path_missing() {
        let err = resolve_path(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::PathMissing(_)));
    }

    #[test]
    fn resolve_path_requires_marker() {
        let dir = TempDir::new().unwrap();
        let err = resolve_path(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotAModule(_)));
    }

    #[test]
    fn load_reads_metadata() {
        let dir = write_module(&[(
            "module.cue",
            concat!(
                "package demo\n",
                "metadata: {\n",
                "\tname:    \"demo\"\n",
                "\tversion: \"0.1.0\"\n",
                "\tfqn:     \"ex.com/demo@v0\"\n",
                "\tidentity: \"11111111-2222-5333-8444-555555555555\"\n",
                "\tdefaultNamespace: \"demo-ns\"\n",
                "}\n",
            ),
        )]);
        let m = load(&Evaluator::new(), dir.path(), None).unwrap();
        assert_eq!(m.metadata.name, "demo");
        assert_eq!(m.metadata.fqn, "ex.com/demo@v0");
        assert_eq!(m.metadata.default_namespace, "demo-ns");
    }

    #[test]
    fn load_propagates_compile_errors() {
        let dir = write_module(&[("bad.cue", "a: {\n")]);
        let err = load(&Evaluator::new(), dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn inspect_finds_literals_only() {
        let f = parse_file(
            "m.cue",
            concat!(
                "metadata: {\n",
                "\tname: \"static\"\n",
                "\tdefaultNamespace: \"ns-\\(name)\"\n",
                "}\n",
            ),
        )
        .unwrap();
        let info = inspect_metadata(&[f]);
        assert_eq!(info.name, "static");
        // Computed: intentionally left empty by static extraction.
        assert_eq!(info.default_namespace, "");
    }
}
