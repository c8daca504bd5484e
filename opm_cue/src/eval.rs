//! The evaluator.
//!
//! Evaluation builds a tree of vertices, one per struct field. A vertex
//! accumulates conjuncts — syntax from any number of declarations plus
//! values embedded by `fill_path`/`unify` — and references resolve to the
//! merged vertex, so a field filled in later is visible to expressions that
//! were compiled earlier. Each query re-evaluates from the conjunct lists;
//! nothing is cached across queries (values stay small at the configuration
//! sizes this handles).

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::{Decl, Expr, Import, LabelKind, StrPart};
use crate::builtin;
use crate::diag::{Diagnostic, Errors, Pos};
use crate::value::{self, child_path, FieldVal, StructVal, Val, Value, ValuePath};

/// Conjunct is one contribution to a value.
#[derive(Clone, Debug)]
pub(crate) enum Conjunct {
    /// A syntax tree with the environment its references resolve in. The
    /// `close` flag is set for syntax living under a definition label.
    Expr {
        expr: Rc<Expr>,
        env: Env,
        close: bool,
    },
    /// A previously-compiled value grafted in at `at` (possibly the root).
    Embed { at: ValuePath, value: Value },
}

impl Conjunct {
    pub(crate) fn expr(expr: Rc<Expr>, env: Env) -> Conjunct {
        Conjunct::Expr {
            expr,
            env,
            close: false,
        }
    }

    pub(crate) fn embed_at(at: ValuePath, value: Value) -> Conjunct {
        Conjunct::Embed { at, value }
    }
}

/// Scope is one lexical scope level.
#[derive(Debug)]
struct Scope {
    names: HashMap<String, ScopeEntry>,
    parent: Option<Env>,
}

#[derive(Clone, Debug)]
enum ScopeEntry {
    Vertex(VertexRef),
    Builtin(Val),
}

/// Env is a chain of scopes.
#[derive(Clone, Debug)]
pub(crate) struct Env(Option<Rc<Scope>>);

impl Env {
    pub(crate) fn empty() -> Env {
        Env(None)
    }

    fn child(&self, names: HashMap<String, ScopeEntry>) -> Env {
        Env(Some(Rc::new(Scope {
            names,
            parent: Some(self.clone()),
        })))
    }

    fn lookup(&self, name: &str) -> Option<ScopeEntry> {
        let mut cur = self.0.clone();
        while let Some(scope) = cur {
            if let Some(e) = scope.names.get(name) {
                return Some(e.clone());
            }
            cur = scope.parent.as_ref().and_then(|p| p.0.clone());
        }
        None
    }
}

/// File_env resolves a file's imports into a file-level environment.
pub(crate) fn file_env(imports: &[Import]) -> Result<Env, Errors> {
    let mut names = HashMap::new();
    let mut errs = Errors::new();
    for imp in imports {
        match builtin::lookup(&imp.path) {
            Some(pkg) => {
                let name = imp.alias.clone().unwrap_or_else(|| {
                    imp.path
                        .rsplit('/')
                        .next()
                        .unwrap_or(imp.path.as_str())
                        .to_string()
                });
                names.insert(name, ScopeEntry::Builtin(Val::Builtin(pkg)));
            }
            None => {
                let hint = match std::env::var(crate::env::REGISTRY_VAR) {
                    Ok(r) if !r.is_empty() => format!(" (registry {r:?} not consulted)"),
                    _ => String::new(),
                };
                errs.push(
                    Diagnostic::new(format!("cannot resolve import {:?}{hint}", imp.path))
                        .at(imp.pos.clone()),
                );
            }
        }
    }
    errs.into_result().map(|()| {
        Env(Some(Rc::new(Scope {
            names,
            parent: None,
        })))
    })
}

type VertexRef = Rc<RefCell<Vertex>>;

#[derive(Debug)]
enum State {
    Idle,
    Forcing,
    Done(Val),
}

#[derive(Debug)]
struct Vertex {
    state: State,
    conjuncts: Vec<Conjunct>,
}

impl Vertex {
    fn new(conjuncts: Vec<Conjunct>) -> VertexRef {
        Rc::new(RefCell::new(Vertex {
            state: State::Idle,
            conjuncts,
        }))
    }
}

/// ChildSlot tracks everything known about one field of a vertex.
struct ChildSlot {
    vertex: VertexRef,
    /// A field is optional only while every contribution is optional.
    optional: bool,
    definition: bool,
    /// Whether an identifier- or definition-form label declared the field,
    /// making it addressable by references.
    in_scope: bool,
}

/// Resolve evaluates a value and returns the `Val` at its path, or `None`
/// when the path does not denote a field.
pub(crate) fn resolve(v: &Value) -> Option<Val> {
    let root = Vertex::new(v.conjuncts.as_ref().clone());
    let val = force(&root, "");
    navigate(val, &v.path)
}

fn navigate(mut cur: Val, path: &ValuePath) -> Option<Val> {
    for seg in &path.0 {
        match cur {
            Val::Struct(s) => match s.fields.get(&seg.name) {
                Some(f) if !f.optional => cur = f.val.clone(),
                _ => return None,
            },
            Val::Bottom(_) => return Some(cur),
            _ => return None,
        }
    }
    Some(cur)
}

/// A field declaration gathered while distributing conjuncts; the scope it
/// evaluates in is not built until distribution finishes.
struct PendingField {
    key: String,
    expr: Rc<Expr>,
    close: bool,
    lit: usize,
}

/// Force fully evaluates a vertex. `path` is the dotted path used in
/// diagnostics.
fn force(vref: &VertexRef, path: &str) -> Val {
    {
        let v = vref.borrow();
        match &v.state {
            State::Forcing => {
                return Val::incomplete(format!("structural cycle at {path}"), None);
            }
            State::Done(val) => return val.clone(),
            State::Idle => {}
        }
    }
    vref.borrow_mut().state = State::Forcing;
    let conjuncts = vref.borrow().conjuncts.clone();

    let mut slots: BTreeMap<String, ChildSlot> = BTreeMap::new();
    // Value contributions; the flag records whether one was grafted in from
    // outside (fill/unify) rather than being part of the declaring syntax.
    let mut values: Vec<(Val, bool)> = Vec::new();
    let mut lit_envs: Vec<Env> = Vec::new();
    let mut fields: Vec<PendingField> = Vec::new();
    let mut embeds: Vec<(String, ValuePath, Value)> = Vec::new();
    let mut closed_sets: Vec<Vec<String>> = Vec::new();
    let mut explicit_open = false;
    let mut is_struct = false;

    fn slot_for<'m>(
        slots: &'m mut BTreeMap<String, ChildSlot>,
        key: &str,
    ) -> &'m mut ChildSlot {
        slots.entry(key.to_string()).or_insert_with(|| ChildSlot {
            vertex: Vertex::new(Vec::new()),
            optional: true,
            definition: false,
            in_scope: false,
        })
    }

    // Phase 1: distribute conjuncts. Struct literals contribute their fields
    // to child vertices; everything else evaluates to a value contribution.
    let mut queue: Vec<Conjunct> = conjuncts;
    queue.reverse();
    while let Some(c) = queue.pop() {
        match c {
            Conjunct::Embed { at, value } => {
                if at.is_empty() {
                    match value.resolve() {
                        Some(val) => values.push((val, true)),
                        None => values.push((
                            Val::incomplete(
                                format!("no value at {}", value.display_path()),
                                None,
                            ),
                            true,
                        )),
                    }
                } else {
                    is_struct = true;
                    let seg = at.0[0].clone();
                    let s = slot_for(&mut slots, &seg.name);
                    s.optional = false;
                    s.definition |= seg.definition;
                    embeds.push((seg.name, ValuePath(at.0[1..].to_vec()), value));
                }
            }
            Conjunct::Expr { expr, env, close } => match expr.as_ref() {
                Expr::And(l, r, _) => {
                    // Preserve left-to-right order in the work stack.
                    queue.push(Conjunct::Expr {
                        expr: Rc::new(r.as_ref().clone()),
                        env: env.clone(),
                        close,
                    });
                    queue.push(Conjunct::Expr {
                        expr: Rc::new(l.as_ref().clone()),
                        env,
                        close,
                    });
                }
                Expr::Struct(decls, _) => {
                    is_struct = true;
                    let lit = lit_envs.len();
                    lit_envs.push(env);
                    let has_ellipsis = decls.iter().any(|d| matches!(d, Decl::Ellipsis(_)));
                    if has_ellipsis {
                        explicit_open = true;
                    } else if close {
                        closed_sets.push(
                            decls
                                .iter()
                                .filter_map(|d| match d {
                                    Decl::Field(f) => Some(f.label.key()),
                                    Decl::Ellipsis(_) => None,
                                })
                                .collect(),
                        );
                    }
                    for d in decls {
                        let Decl::Field(f) = d else { continue };
                        let key = f.label.key();
                        let s = slot_for(&mut slots, &key);
                        s.optional &= f.optional;
                        s.definition |= f.label.kind == LabelKind::Definition;
                        s.in_scope |= f.label.kind != LabelKind::String;
                        let child_close = (close || f.label.kind == LabelKind::Definition)
                            && !matches!(f.value, Expr::Embed(_));
                        fields.push(PendingField {
                            key,
                            expr: Rc::new(f.value.clone()),
                            close: child_close,
                            lit,
                        });
                    }
                }
                _ => values.push((eval_expr(&expr, &env, path), false)),
            },
        }
    }

    // Phase 2: shared scope. Every addressable field of the merged struct is
    // visible to every contributing literal; parent scopes differ per
    // literal, so each gets its own extension.
    let scope_names: HashMap<String, ScopeEntry> = slots
        .iter()
        .filter(|(_, s)| s.in_scope)
        .map(|(k, s)| (k.clone(), ScopeEntry::Vertex(Rc::clone(&s.vertex))))
        .collect();
    let scoped: Vec<Env> = lit_envs
        .iter()
        .map(|env| env.child(scope_names.clone()))
        .collect();

    // Phase 3: hand the gathered conjuncts to the children.
    for pf in fields {
        let s = &slots[&pf.key];
        s.vertex.borrow_mut().conjuncts.push(Conjunct::Expr {
            expr: pf.expr,
            env: scoped[pf.lit].clone(),
            close: pf.close,
        });
    }
    for (key, rest, val) in embeds {
        let s = &slots[&key];
        s.vertex
            .borrow_mut()
            .conjuncts
            .push(Conjunct::Embed { at: rest, value: val });
    }

    // Phase 4: force children and assemble.
    //
    // Declared (non-grafted) conjuncts that evaluate to structs are part of
    // the closing syntax, so their field names extend what a closing
    // definition allows; grafted values do not get that privilege.
    let declared_names: Vec<String> = values
        .iter()
        .filter(|(_, grafted)| !grafted)
        .filter_map(|(v, _)| match v {
            Val::Struct(s) => Some(s.fields.keys().cloned().collect::<Vec<_>>()),
            _ => None,
        })
        .flatten()
        .collect();
    let result = if is_struct {
        let mut sv = StructVal {
            fields: BTreeMap::new(),
            closed: false,
            explicit_open,
        };
        for (key, s) in &slots {
            let cpath = child_path(path, key);
            let val = force(&s.vertex, &cpath);
            sv.fields.insert(
                key.clone(),
                FieldVal {
                    val,
                    optional: s.optional,
                    definition: s.definition,
                },
            );
        }
        let mut out = Val::Struct(sv);
        for (v, _) in values {
            out = value::unify(out, v, path);
        }
        if !closed_sets.is_empty() {
            if let Val::Struct(s) = &mut out {
                for (key, f) in s.fields.iter_mut() {
                    if f.optional || f.definition {
                        continue;
                    }
                    let disallowed = closed_sets.iter().any(|set| {
                        !set.iter().any(|k| k == key) && !declared_names.contains(key)
                    });
                    if disallowed {
                        f.val = Val::bottom(
                            Diagnostic::new(format!("field not allowed: {key}"))
                                .in_path(&child_path(path, key)),
                        );
                    }
                }
                if !s.explicit_open {
                    s.closed = true;
                }
            }
        }
        out
    } else {
        let mut it = values.into_iter();
        let mut out = it
            .next()
            .map(|(v, _)| v)
            .unwrap_or_else(|| Val::incomplete("empty value", None));
        for (v, _) in it {
            out = value::unify(out, v, path);
        }
        out
    };

    vref.borrow_mut().state = State::Done(result.clone());
    result
}

/// Eval_expr evaluates an expression that is not a struct-literal conjunct.
fn eval_expr(expr: &Expr, env: &Env, path: &str) -> Val {
    match expr {
        Expr::Null(_) => Val::Null,
        Expr::Bool(b, _) => Val::Bool(*b),
        Expr::Int(n, _) => Val::Int(*n),
        Expr::Float(x, _) => Val::Float(*x),
        Expr::Top(_) => Val::Top,
        Expr::BasicType(t, _) => Val::Type(*t),
        Expr::Str(parts, pos) => eval_string(parts, env, path, pos),
        Expr::Ident(name, pos) => match env.lookup(name) {
            Some(ScopeEntry::Vertex(v)) => force(&v, path),
            Some(ScopeEntry::Builtin(v)) => v,
            None => Val::bottom(
                Diagnostic::new(format!("reference \"{name}\" not found")).at(pos.clone()),
            ),
        },
        Expr::Select(base, sel, pos) => select(eval_expr(base, env, path), sel, pos),
        Expr::Call(f, args, pos) => {
            let fv = eval_expr(f, env, path);
            match fv {
                Val::Func(fun) => {
                    let mut vals = Vec::with_capacity(args.len());
                    for a in args {
                        match eval_expr(a, env, path) {
                            v @ (Val::Bottom(_) | Val::Incomplete(_)) => return v,
                            v => vals.push(v),
                        }
                    }
                    if vals.len() != fun.arity {
                        return Val::bottom(
                            Diagnostic::new(format!(
                                "{} expects {} arguments, got {}",
                                fun.name,
                                fun.arity,
                                vals.len()
                            ))
                            .at(pos.clone()),
                        );
                    }
                    match (fun.call)(&vals) {
                        Ok(v) => v,
                        Err(d) => Val::Bottom(Box::new(d.at(pos.clone()))),
                    }
                }
                Val::Bottom(_) | Val::Incomplete(_) => fv,
                other => Val::bottom(
                    Diagnostic::new(format!("cannot call {} value", other.kind_name()))
                        .at(pos.clone()),
                ),
            }
        }
        Expr::List(lit, _) => {
            if lit.elems.is_empty() {
                if let Some(open) = &lit.open {
                    return Val::ListOf(Box::new(eval_expr(open, env, path)));
                }
            }
            Val::List(lit.elems.iter().map(|e| eval_expr(e, env, path)).collect())
        }
        Expr::And(l, r, _) => {
            let lv = eval_expr(l, env, path);
            let rv = eval_expr(r, env, path);
            value::unify(lv, rv, path)
        }
        Expr::Struct(..) => {
            // A struct literal in expression position (list element, call
            // argument) evaluates through a detached vertex so its scope
            // rules stay uniform.
            let v = Vertex::new(vec![Conjunct::Expr {
                expr: Rc::new(expr.clone()),
                env: env.clone(),
                close: false,
            }]);
            force(&v, path)
        }
        Expr::Embed(value) => match value.resolve() {
            Some(v) => v,
            None => Val::incomplete(format!("no value at {}", value.display_path()), None),
        },
    }
}

fn select(base: Val, sel: &str, pos: &Pos) -> Val {
    match base {
        Val::Struct(s) => match s.fields.get(sel) {
            Some(f) if f.optional => Val::incomplete(
                format!("optional field \"{sel}\" not set"),
                Some(pos.clone()),
            ),
            Some(f) => f.val.clone(),
            None => {
                if s.closed && !s.explicit_open {
                    Val::bottom(
                        Diagnostic::new(format!("undefined field \"{sel}\"")).at(pos.clone()),
                    )
                } else {
                    Val::incomplete(format!("undefined field \"{sel}\""), Some(pos.clone()))
                }
            }
        },
        Val::Builtin(pkg) => match pkg.funcs.iter().find(|f| f.name == sel) {
            Some(f) => Val::Func(f),
            None => Val::bottom(
                Diagnostic::new(format!("undefined function {}.{sel}", pkg.name)).at(pos.clone()),
            ),
        },
        Val::Bottom(_) | Val::Incomplete(_) => base,
        other => Val::bottom(
            Diagnostic::new(format!(
                "cannot select {sel:?} from {} value",
                other.kind_name()
            ))
            .at(pos.clone()),
        ),
    }
}

fn eval_string(parts: &[StrPart], env: &Env, path: &str, pos: &Pos) -> Val {
    let mut out = String::new();
    for p in parts {
        match p {
            StrPart::Lit(s) => out.push_str(s),
            StrPart::Interp(e) => match eval_expr(e, env, path) {
                Val::Str(s) => out.push_str(&s),
                Val::Int(n) => out.push_str(&n.to_string()),
                Val::Float(x) => out.push_str(&x.to_string()),
                Val::Bool(b) => out.push_str(&b.to_string()),
                v @ (Val::Bottom(_) | Val::Incomplete(_)) => return v,
                other => {
                    return Val::bottom(
                        Diagnostic::new(format!("cannot interpolate {} value", other.kind_name()))
                            .at(pos.clone()),
                    );
                }
            },
        }
    }
    Val::Str(out)
}
