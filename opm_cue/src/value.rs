//! Evaluated values and unification.
//!
//! Evaluation is total: conflicts become [`Val::Bottom`] and unresolvable
//! references become [`Val::Incomplete`], both of which are ordinary values
//! until a caller asks for validation or encoding.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::rc::Rc;

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::ast::{self, BasicType};
use crate::builtin;
use crate::diag::{Diagnostic, Errors, Pos};
use crate::eval;

/// Val is an evaluated value.
#[derive(Clone, Debug)]
#[allow(missing_docs)] // Scalar variants carry only their payload.
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Val>),
    /// Open list constraint, `[...Elem]`.
    ListOf(Box<Val>),
    Struct(StructVal),
    /// A primitive type constraint.
    Type(BasicType),
    /// `_`; unifies with anything.
    Top,
    /// A builtin package brought into scope by an import.
    Builtin(&'static builtin::Package),
    /// A function of a builtin package.
    Func(&'static builtin::Func),
    /// Not resolvable (yet): unresolved reference, unselected optional,
    /// structural cycle.
    Incomplete(Incomplete),
    /// A conflict; carries the diagnostic.
    Bottom(Box<Diagnostic>),
}

/// Incomplete describes why a value could not be resolved.
#[derive(Clone, Debug)]
pub struct Incomplete {
    /// What was missing.
    pub reason: String,
    /// Where the unresolved expression lives, when known.
    pub pos: Option<Pos>,
}

/// StructVal is an evaluated struct.
#[derive(Clone, Debug, Default)]
pub struct StructVal {
    /// Fields in sorted order.
    pub fields: BTreeMap<String, FieldVal>,
    /// Set when a definition contributed to this struct: unification may not
    /// introduce fields the definition does not allow.
    pub closed: bool,
    /// Set when a `...` declaration reopened the struct.
    pub explicit_open: bool,
}

/// FieldVal is a single evaluated struct field.
#[derive(Clone, Debug)]
pub struct FieldVal {
    /// The field's value.
    pub val: Val,
    /// True while every declaration of the field is optional.
    pub optional: bool,
    /// True when a definition label declared the field.
    pub definition: bool,
}

impl Val {
    /// Incomplete constructs an incomplete value.
    pub fn incomplete<S: ToString>(reason: S, pos: Option<Pos>) -> Val {
        Val::Incomplete(Incomplete {
            reason: reason.to_string(),
            pos,
        })
    }

    /// Bottom constructs a conflict value.
    pub fn bottom(d: Diagnostic) -> Val {
        Val::Bottom(Box::new(d))
    }

    /// Kind_name names the value kind for messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "string",
            Val::List(_) | Val::ListOf(_) => "list",
            Val::Struct(_) => "struct",
            Val::Type(t) => t.name(),
            Val::Top => "_",
            Val::Builtin(_) => "package",
            Val::Func(_) => "function",
            Val::Incomplete(_) => "incomplete",
            Val::Bottom(_) => "error",
        }
    }

    /// Is_concrete reports whether the value (shallowly) is a data value.
    pub fn is_concrete(&self) -> bool {
        !matches!(
            self,
            Val::Type(_)
                | Val::Top
                | Val::ListOf(_)
                | Val::Builtin(_)
                | Val::Func(_)
                | Val::Incomplete(_)
                | Val::Bottom(_)
        )
    }

    /// As_str returns the string payload, when the value is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Display renders a value for messages; structs and lists abbreviate.
impl Display for Val {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Val::Null => write!(f, "null"),
            Val::Bool(b) => write!(f, "{b}"),
            Val::Int(n) => write!(f, "{n}"),
            Val::Float(x) => write!(f, "{x}"),
            Val::Str(s) => write!(f, "{s:?}"),
            Val::List(_) => write!(f, "[…]"),
            Val::ListOf(_) => write!(f, "[...]"),
            Val::Struct(_) => write!(f, "{{…}}"),
            Val::Type(t) => write!(f, "{}", t.name()),
            Val::Top => write!(f, "_"),
            Val::Builtin(p) => write!(f, "package {}", p.name),
            Val::Func(fun) => write!(f, "{}", fun.name),
            Val::Incomplete(i) => write!(f, "incomplete ({})", i.reason),
            Val::Bottom(d) => write!(f, "error ({})", d.message),
        }
    }
}

fn conflict(path: &str, msg: String) -> Val {
    Val::bottom(Diagnostic::new(msg).in_path(path))
}

fn type_matches(t: BasicType, v: &Val) -> bool {
    matches!(
        (t, v),
        (BasicType::String, Val::Str(_))
            | (BasicType::Int, Val::Int(_))
            | (BasicType::Float, Val::Float(_))
            | (BasicType::Number, Val::Int(_))
            | (BasicType::Number, Val::Float(_))
            | (BasicType::Bool, Val::Bool(_))
    )
}

fn type_unify(a: BasicType, b: BasicType) -> Option<BasicType> {
    use BasicType::*;
    match (a, b) {
        _ if a == b => Some(a),
        (Number, Int) | (Int, Number) => Some(Int),
        (Number, Float) | (Float, Number) => Some(Float),
        _ => None,
    }
}

/// Unify computes the greatest lower bound of two values. `path` is the
/// value path used in conflict diagnostics.
pub fn unify(a: Val, b: Val, path: &str) -> Val {
    use Val::*;
    match (a, b) {
        (Bottom(d), _) | (_, Bottom(d)) => Bottom(d),
        (Top, v) | (v, Top) => v,
        (Incomplete(i), _) | (_, Incomplete(i)) => Val::Incomplete(i),

        (Type(x), Type(y)) => match type_unify(x, y) {
            Some(t) => Type(t),
            None => conflict(
                path,
                format!("conflicting types {} and {}", x.name(), y.name()),
            ),
        },
        (Type(t), v) | (v, Type(t)) => {
            if type_matches(t, &v) {
                v
            } else {
                conflict(
                    path,
                    format!("conflicting values {v} and {} (mismatched types)", t.name()),
                )
            }
        }

        (Null, Null) => Null,
        (Bool(x), Bool(y)) if x == y => Bool(x),
        (Int(x), Int(y)) if x == y => Int(x),
        (Float(x), Float(y)) if x == y => Float(x),
        (Str(x), Str(y)) if x == y => Str(x),

        (ListOf(t), ListOf(u)) => ListOf(Box::new(unify(*t, *u, path))),
        (ListOf(t), List(xs)) | (List(xs), ListOf(t)) => {
            let mut out = Vec::with_capacity(xs.len());
            for (i, x) in xs.into_iter().enumerate() {
                out.push(unify(x, (*t).clone(), &format!("{path}[{i}]")));
            }
            List(out)
        }
        (List(xs), List(ys)) => {
            if xs.len() != ys.len() {
                return conflict(
                    path,
                    format!("conflicting list lengths {} and {}", xs.len(), ys.len()),
                );
            }
            List(
                xs.into_iter()
                    .zip(ys)
                    .enumerate()
                    .map(|(i, (x, y))| unify(x, y, &format!("{path}[{i}]")))
                    .collect(),
            )
        }

        (Struct(x), Struct(y)) => struct_unify(x, y, path),

        (a, b) => {
            let msg = if a.kind_name() == b.kind_name() {
                format!("conflicting values {a} and {b}")
            } else {
                format!(
                    "conflicting values {a} and {b} (mismatched types {} and {})",
                    a.kind_name(),
                    b.kind_name()
                )
            };
            conflict(path, msg)
        }
    }
}

fn struct_unify(a: StructVal, b: StructVal, path: &str) -> Val {
    // A struct restricts lookups when it is closed and not reopened; the
    // unification restricts when either side does.
    let restricting = |s: &StructVal| s.closed && !s.explicit_open;
    let restricted = restricting(&a) || restricting(&b);
    let mut out = StructVal {
        fields: BTreeMap::new(),
        closed: a.closed || b.closed,
        explicit_open: !restricted && (a.explicit_open || b.explicit_open),
    };

    let allowed = |closed: bool, explicit_open: bool, contains: bool| -> bool {
        !closed || explicit_open || contains
    };

    let a_closed = a.closed;
    let a_explicit_open = a.explicit_open;
    let b_closed = b.closed;
    let b_explicit_open = b.explicit_open;

    let mut bfields = b.fields;
    for (name, fa) in a.fields {
        let merged = match bfields.remove(&name) {
            Some(fb) => FieldVal {
                val: unify(fa.val, fb.val, &child_path(path, &name)),
                optional: fa.optional && fb.optional,
                definition: fa.definition || fb.definition,
            },
            None => {
                let mut f = fa;
                if !f.optional && !f.definition && !allowed(b_closed, b_explicit_open, false) {
                    f.val = conflict(
                        &child_path(path, &name),
                        format!("field not allowed: {name}"),
                    );
                }
                f
            }
        };
        out.fields.insert(name, merged);
    }
    for (name, mut fb) in bfields {
        if !fb.optional && !fb.definition && !allowed(a_closed, a_explicit_open, false) {
            fb.val = conflict(
                &child_path(path, &name),
                format!("field not allowed: {name}"),
            );
        }
        out.fields.insert(name, fb);
    }
    Val::Struct(out)
}

/// Child_path appends a segment to a dotted value path.
pub fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

/// Validate walks the exported (regular, non-optional) fields of `v` and
/// collects all conflicts, plus incompleteness when `concrete` is set.
pub fn validate(v: &Val, path: &str, concrete: bool, errs: &mut Errors) {
    match v {
        Val::Bottom(d) => {
            errs.push(d.as_ref().clone().in_path(path));
        }
        Val::Incomplete(i) => {
            if concrete {
                let mut d = Diagnostic::new(format!("incomplete value ({})", i.reason))
                    .in_path(path);
                if let Some(pos) = &i.pos {
                    d = d.at(pos.clone());
                }
                errs.push(d);
            }
        }
        Val::Type(t) => {
            if concrete {
                errs.push(
                    Diagnostic::new(format!("incomplete value ({})", t.name())).in_path(path),
                );
            }
        }
        Val::Top | Val::ListOf(_) => {
            if concrete {
                errs.push(Diagnostic::new("incomplete value").in_path(path));
            }
        }
        Val::Builtin(_) | Val::Func(_) => {
            errs.push(Diagnostic::new("package used as value").in_path(path));
        }
        Val::List(xs) => {
            for (i, x) in xs.iter().enumerate() {
                validate(x, &format!("{path}[{i}]"), concrete, errs);
            }
        }
        Val::Struct(s) => {
            for (name, f) in &s.fields {
                if f.definition || f.optional {
                    continue;
                }
                validate(&f.val, &child_path(path, name), concrete, errs);
            }
        }
        _ => {}
    }
}

/// Encode_json converts a value into JSON, erroring on anything that is not
/// concrete. Definitions and unresolved optional fields are omitted, the way
/// the source language exports data.
pub fn encode_json(v: &Val, path: &str) -> Result<Json, Errors> {
    match v {
        Val::Null => Ok(Json::Null),
        Val::Bool(b) => Ok(Json::Bool(*b)),
        Val::Int(n) => Ok(Json::Number((*n).into())),
        Val::Float(x) => Number::from_f64(*x)
            .map(Json::Number)
            .ok_or_else(|| Errors::from_one(Diagnostic::new("non-finite float").in_path(path))),
        Val::Str(s) => Ok(Json::String(s.clone())),
        Val::List(xs) => {
            let mut out = Vec::with_capacity(xs.len());
            for (i, x) in xs.iter().enumerate() {
                out.push(encode_json(x, &format!("{path}[{i}]"))?);
            }
            Ok(Json::Array(out))
        }
        Val::Struct(s) => {
            let mut out = JsonMap::new();
            for (name, f) in &s.fields {
                if f.definition || f.optional {
                    continue;
                }
                out.insert(name.clone(), encode_json(&f.val, &child_path(path, name))?);
            }
            Ok(Json::Object(out))
        }
        Val::Bottom(d) => Err(Errors::from_one(d.as_ref().clone().in_path(path))),
        other => Err(Errors::from_one(
            Diagnostic::new(format!("cannot encode incomplete value ({other})")).in_path(path),
        )),
    }
}

/// Seg is one segment of a [`ValuePath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Seg {
    /// Field name; definitions keep their `#` prefix.
    pub name: String,
    /// True for definition segments.
    pub definition: bool,
}

/// ValuePath addresses a value inside a struct tree. Definition segments
/// (`#name`) address definition fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValuePath(
    /// The segments, outermost first.
    pub Vec<Seg>,
);

impl ValuePath {
    /// New creates an empty path.
    pub fn new() -> ValuePath {
        ValuePath::default()
    }

    /// Field appends a regular-field segment. The name is taken verbatim, so
    /// keys containing dots are safe.
    pub fn field<S: ToString>(mut self, name: S) -> ValuePath {
        self.0.push(Seg {
            name: name.to_string(),
            definition: false,
        });
        self
    }

    /// Def appends a definition segment (`#name`; pass the name without `#`).
    pub fn def<S: ToString>(mut self, name: S) -> ValuePath {
        self.0.push(Seg {
            name: format!("#{}", name.to_string()),
            definition: true,
        });
        self
    }

    /// Is_empty reports whether the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ValuePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, s) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", s.name)?;
        }
        Ok(())
    }
}

/// From a dotted string; segments starting with `#` become definitions.
/// Only usable when no segment itself contains a dot.
impl From<&str> for ValuePath {
    fn from(s: &str) -> ValuePath {
        let mut p = ValuePath::new();
        for seg in s.split('.').filter(|s| !s.is_empty()) {
            p = match seg.strip_prefix('#') {
                Some(name) => p.def(name),
                None => p.field(seg),
            };
        }
        p
    }
}

/// Value is a compiled, lazily-evaluated value: a set of conjuncts plus a
/// path into the tree they denote. Values are immutable; operations return
/// new values sharing the conjunct list.
///
/// Values are `Rc`-based and must stay on the thread of the [`Evaluator`]
/// that produced them.
///
/// [`Evaluator`]: crate::Evaluator
#[derive(Clone, Debug)]
pub struct Value {
    pub(crate) conjuncts: Rc<Vec<eval::Conjunct>>,
    pub(crate) path: ValuePath,
}

impl Value {
    /// Unify combines two values. The result evaluates both sides' conjuncts
    /// against one another. When this value points below its root, the
    /// surrounding tree is kept so references out of the subtree stay
    /// resolvable, and `other` is grafted in at this value's path.
    pub fn unify(&self, other: &Value) -> Value {
        let mut conjuncts = self.conjuncts.as_ref().clone();
        conjuncts.push(eval::Conjunct::embed_at(self.path.clone(), other.clone()));
        Value {
            conjuncts: Rc::new(conjuncts),
            path: self.path.clone(),
        }
    }

    /// Fill_path unifies `v` into the value at `path` (relative to this
    /// value), returning the new composite.
    pub fn fill_path(&self, path: &ValuePath, v: &Value) -> Value {
        let mut segs = self.path.0.clone();
        segs.extend(path.0.iter().cloned());
        let mut conjuncts = self.conjuncts.as_ref().clone();
        conjuncts.push(eval::Conjunct::embed_at(ValuePath(segs), v.clone()));
        Value {
            conjuncts: Rc::new(conjuncts),
            path: self.path.clone(),
        }
    }

    /// Lookup_path returns the value at `path` relative to this value. The
    /// result is computed lazily; use [`Value::exists`] to probe it.
    pub fn lookup_path(&self, path: &ValuePath) -> Value {
        let mut segs = self.path.0.clone();
        segs.extend(path.0.iter().cloned());
        Value {
            conjuncts: Rc::clone(&self.conjuncts),
            path: ValuePath(segs),
        }
    }

    /// Resolve evaluates the composition and returns the value at this
    /// value's path, or `None` when the path does not exist.
    pub fn resolve(&self) -> Option<Val> {
        eval::resolve(self)
    }

    /// Exists reports whether the path denotes a field.
    pub fn exists(&self) -> bool {
        self.resolve().is_some()
    }

    /// Validate evaluates and reports all conflicts; with `concrete`, also
    /// anything not fully resolved.
    pub fn validate(&self, concrete: bool) -> Result<(), Errors> {
        let v = match self.resolve() {
            Some(v) => v,
            None => {
                return Err(Errors::from_one(Diagnostic::new(format!(
                    "value not found at {}",
                    self.path
                ))));
            }
        };
        let mut errs = Errors::new();
        validate(&v, &self.path.to_string(), concrete, &mut errs);
        errs.into_result()
    }

    /// Encode_json evaluates and exports the value as JSON.
    pub fn encode_json(&self) -> Result<Json, Errors> {
        let v = self.resolve().ok_or_else(|| {
            Errors::from_one(Diagnostic::new(format!("value not found at {}", self.path)))
        })?;
        encode_json(&v, &self.path.to_string())
    }

    /// Fields returns the regular fields of a struct value in sorted order,
    /// paired with lazy handles to each.
    pub fn fields(&self) -> Result<Vec<(String, Value)>, Errors> {
        let v = self.resolve().ok_or_else(|| {
            Errors::from_one(Diagnostic::new(format!("value not found at {}", self.path)))
        })?;
        match v {
            Val::Struct(s) => Ok(s
                .fields
                .iter()
                .filter(|(_, f)| !f.definition && !f.optional)
                .map(|(name, _)| {
                    (
                        name.clone(),
                        self.lookup_path(&ValuePath::new().field(name)),
                    )
                })
                .collect()),
            other => Err(Errors::from_one(
                Diagnostic::new(format!(
                    "cannot iterate fields of {} value",
                    other.kind_name()
                ))
                .in_path(self.path.to_string()),
            )),
        }
    }

    /// From_json compiles a JSON document into a value.
    pub fn from_json(v: &Json) -> Value {
        let expr = json_expr(v);
        Value {
            conjuncts: Rc::new(vec![eval::Conjunct::expr(Rc::new(expr), eval::Env::empty())]),
            path: ValuePath::new(),
        }
    }

    /// To_string_value resolves and returns a string payload.
    pub fn to_str(&self) -> Option<String> {
        match self.resolve()? {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Display_path renders the path this value points at, for messages.
    pub fn display_path(&self) -> String {
        self.path.to_string()
    }
}

fn json_expr(v: &Json) -> ast::Expr {
    let pos = Pos::synthetic("json");
    match v {
        Json::Null => ast::Expr::Null(pos),
        Json::Bool(b) => ast::Expr::Bool(*b, pos),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                ast::Expr::Int(i, pos)
            } else {
                ast::Expr::Float(n.as_f64().unwrap_or(f64::NAN), pos)
            }
        }
        Json::String(s) => ast::Expr::lit_str(s, pos),
        Json::Array(xs) => ast::Expr::List(
            ast::ListLit {
                elems: xs.iter().map(json_expr).collect(),
                open: None,
            },
            pos,
        ),
        Json::Object(m) => ast::Expr::Struct(
            m.iter()
                .map(|(k, v)| {
                    ast::Decl::Field(ast::Field {
                        label: ast::Label::string(k),
                        optional: false,
                        value: json_expr(v),
                        pos: Pos::synthetic("json"),
                    })
                })
                .collect(),
            pos,
        ),
    }
}
