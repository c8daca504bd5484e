#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

//! Opm_cue is a small constraint-based configuration evaluator.
//!
//! It implements the subset of the language that open-platform-model modules,
//! providers, and values files use: struct and list literals, definitions,
//! optional fields, primitive type constraints, conjunction, string
//! interpolation, lexical references, and the `uuid` builtin package.
//! Disjunctions, comprehensions, `let`, and arithmetic are out of the subset
//! and fail to parse.
//!
//! Values are compiled once and queried lazily:
//!
//! ```
//! use opm_cue::{Evaluator, ValuePath};
//!
//! let eval = Evaluator::new();
//! let v = eval.compile("demo.cue", "a: {b: string}\na: {b: \"hi\"}").unwrap();
//! let b = v.lookup_path(&ValuePath::new().field("a").field("b"));
//! assert_eq!(b.to_str().as_deref(), Some("hi"));
//! ```
//!
//! Values are `Rc`-based: they are neither `Send` nor `Sync`, and must not
//! be mixed between [`Evaluator`] instances. Concurrent use requires one
//! evaluator per thread.

pub mod ast;
pub mod builtin;
mod diag;
mod env;
mod eval;
mod instance;
mod parser;
mod token;
mod value;

pub use diag::{Diagnostic, Errors, Pos};
pub use env::{ScopedEnv, REGISTRY_VAR};
pub use instance::MODULE_MARKER;
pub use parser::parse_file;
pub use value::{FieldVal, Incomplete, Seg, StructVal, Val, Value, ValuePath};

use std::marker::PhantomData;
use std::path::Path;
use std::rc::Rc;

/// Evaluator is a compilation context.
///
/// The evaluator itself carries no state; it exists to anchor the threading
/// contract. It is deliberately not `Send`: every value it produces shares
/// that property, and passing values between evaluator instances is a
/// programmer error with no guarantees.
#[derive(Debug, Default)]
pub struct Evaluator {
    _not_send: PhantomData<Rc<()>>,
}

impl Evaluator {
    /// New creates an evaluator.
    pub fn new() -> Evaluator {
        Evaluator::default()
    }

    /// Compile parses and compiles a single in-memory source.
    pub fn compile(&self, filename: &str, src: &str) -> Result<Value, Errors> {
        instance::compile(filename, src)
    }

    /// Compile_files builds an instance from already-parsed files.
    pub fn compile_files(&self, files: Vec<ast::File>) -> Result<Value, Errors> {
        instance::instance(files)
    }

    /// Parse_dir parses all source files directly under `dir` without
    /// evaluating them.
    pub fn parse_dir(&self, dir: &Path) -> Result<Vec<ast::File>, Errors> {
        instance::parse_dir(dir)
    }

    /// Load_dir compiles the module directory at `dir` together with the
    /// given overlay files. Overlays never touch the filesystem.
    pub fn load_dir(&self, dir: &Path, overlays: Vec<ast::File>) -> Result<Value, Errors> {
        instance::load_dir(dir, overlays)
    }

    /// From_json compiles a JSON document into a value.
    pub fn from_json(&self, v: &serde_json::Value) -> Value {
        Value::from_json(v)
    }
}
