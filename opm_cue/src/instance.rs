//! Compiling source files and module directories into values.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Expr, File};
use crate::diag::{Diagnostic, Errors, Pos};
use crate::eval::{self, Conjunct};
use crate::parser::parse_file;
use crate::value::{Value, ValuePath};

/// MODULE_MARKER is the subdirectory that marks a directory as a module.
pub const MODULE_MARKER: &str = "cue.mod";

/// Compile parses a single source and returns its value.
pub fn compile(filename: &str, src: &str) -> Result<Value, Errors> {
    let file = parse_file(filename, src)?;
    instance(vec![file])
}

/// Instance combines parsed files into a single value. All files share one
/// top-level scope; files declaring different package names do not belong to
/// the same instance.
pub fn instance(files: Vec<File>) -> Result<Value, Errors> {
    let mut errs = Errors::new();
    let mut package: Option<String> = None;
    for f in &files {
        if let Some(pkg) = &f.package {
            match &package {
                Some(prev) if prev != pkg => {
                    errs.push(
                        Diagnostic::new(format!(
                            "found packages {prev:?} and {pkg:?} in the same instance"
                        ))
                        .at(Pos::synthetic(&f.filename)),
                    );
                }
                Some(_) => {}
                None => package = Some(pkg.clone()),
            }
        }
    }

    let mut conjuncts = Vec::with_capacity(files.len());
    for f in files {
        let env = match eval::file_env(&f.imports) {
            Ok(env) => env,
            Err(e) => {
                errs.extend(e);
                continue;
            }
        };
        let pos = Pos::synthetic(&f.filename);
        conjuncts.push(Conjunct::expr(Rc::new(Expr::Struct(f.decls, pos)), env));
    }
    errs.into_result()?;

    Ok(Value {
        conjuncts: Rc::new(conjuncts),
        path: ValuePath::new(),
    })
}

/// Parse_dir parses every `*.cue` file directly under `dir`, sorted by file
/// name, aggregating parse errors across all of them.
pub fn parse_dir(dir: &Path) -> Result<Vec<File>, Errors> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .map_err(|e| {
            Errors::from_one(Diagnostic::new(format!(
                "cannot read module directory {}: {e}",
                dir.display()
            )))
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "cue"))
        .collect();
    names.sort();
    debug!(dir = %dir.display(), files = names.len(), "parsing module directory");

    let mut files = Vec::new();
    let mut errs = Errors::new();
    for path in names {
        let src = match fs::read_to_string(&path) {
            Ok(src) => src,
            Err(e) => {
                errs.push(Diagnostic::new(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
                continue;
            }
        };
        match parse_file(&path.display().to_string(), &src) {
            Ok(f) => files.push(f),
            Err(e) => errs.extend(e),
        }
    }
    errs.into_result().map(|()| files)
}

/// Load_dir parses every `*.cue` file directly under `dir`, appends
/// `overlays`, and builds the instance.
///
/// Overlay files never touch the filesystem.
pub fn load_dir(dir: &Path, overlays: Vec<File>) -> Result<Value, Errors> {
    let mut files = parse_dir(dir)?;
    for o in overlays {
        trace!(file = %o.filename, "adding overlay file");
        files.push(o);
    }
    instance(files)
}
