//! Abstract syntax for the configuration language subset.
//!
//! The tree is deliberately small: structs, lists, scalars, references,
//! selectors, calls, conjunction, and string interpolation. It is public so
//! callers can do static inspection (see the module loader) and synthesize
//! overlay files without going through source text.

use std::fmt::Write as _;

use crate::diag::Pos;
use crate::value::Value;

/// File is a parsed source file.
#[derive(Clone, Debug)]
pub struct File {
    /// Name the file was parsed under, used in positions.
    pub filename: String,
    /// Package clause, when present.
    pub package: Option<String>,
    /// Import clauses.
    pub imports: Vec<Import>,
    /// Top-level declarations.
    pub decls: Vec<Decl>,
}

/// Import is a single import clause.
#[derive(Clone, Debug)]
pub struct Import {
    /// Import path, e.g. `"uuid"`.
    pub path: String,
    /// Local alias, when given.
    pub alias: Option<String>,
    /// Position of the clause.
    pub pos: Pos,
}

/// Decl is a declaration inside a file or struct literal.
#[derive(Clone, Debug)]
pub enum Decl {
    /// A labelled field.
    Field(Field),
    /// `...`, marking the enclosing struct as open.
    Ellipsis(Pos),
}

/// Field is a single labelled declaration.
#[derive(Clone, Debug)]
pub struct Field {
    /// The label.
    pub label: Label,
    /// True for `label?: value`.
    pub optional: bool,
    /// The value expression.
    pub value: Expr,
    /// Position of the label.
    pub pos: Pos,
}

/// LabelKind distinguishes the three label forms.
///
/// Identifier and definition labels are visible to sibling references;
/// string-literal labels are not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum LabelKind {
    Ident,
    String,
    Definition,
}

/// Label is a field label.
#[derive(Clone, Debug)]
pub struct Label {
    /// The label text, without `#` or quotes.
    pub name: String,
    /// The form the label was written in.
    pub kind: LabelKind,
}

impl Label {
    /// Ident creates an identifier-form label.
    pub fn ident<S: ToString>(name: S) -> Label {
        Label {
            name: name.to_string(),
            kind: LabelKind::Ident,
        }
    }

    /// String creates a string-literal-form label.
    pub fn string<S: ToString>(name: S) -> Label {
        Label {
            name: name.to_string(),
            kind: LabelKind::String,
        }
    }

    /// Definition creates a definition-form label (`#name`).
    pub fn definition<S: ToString>(name: S) -> Label {
        Label {
            name: name.to_string(),
            kind: LabelKind::Definition,
        }
    }

    /// Key is the name fields are stored under; definitions keep their `#`.
    pub fn key(&self) -> String {
        match self.kind {
            LabelKind::Definition => format!("#{}", self.name),
            _ => self.name.clone(),
        }
    }
}

/// StrPart is a piece of a parsed string literal.
#[derive(Clone, Debug)]
pub enum StrPart {
    /// Literal text.
    Lit(String),
    /// An interpolated expression.
    Interp(Expr),
}

/// BasicType is a primitive type constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BasicType {
    String,
    Int,
    Float,
    Number,
    Bool,
}

impl BasicType {
    /// Name is the source-level spelling.
    pub fn name(&self) -> &'static str {
        match self {
            BasicType::String => "string",
            BasicType::Int => "int",
            BasicType::Float => "float",
            BasicType::Number => "number",
            BasicType::Bool => "bool",
        }
    }
}

/// ListLit is a list literal, possibly open (`[...Elem]`).
#[derive(Clone, Debug)]
pub struct ListLit {
    /// The leading fixed elements.
    pub elems: Vec<Expr>,
    /// `Some(constraint)` when the list ends with `...`; the constraint is
    /// `Top` for a bare `...`.
    pub open: Option<Box<Expr>>,
}

/// Expr is an expression.
#[derive(Clone, Debug)]
#[allow(missing_docs)] // Literal variants carry only their payload.
pub enum Expr {
    Null(Pos),
    Bool(bool, Pos),
    Int(i64, Pos),
    Float(f64, Pos),
    Str(Vec<StrPart>, Pos),
    /// `_`, the top value.
    Top(Pos),
    BasicType(BasicType, Pos),
    Ident(String, Pos),
    /// `base.sel`.
    Select(Box<Expr>, String, Pos),
    /// `fn(args…)`.
    Call(Box<Expr>, Vec<Expr>, Pos),
    Struct(Vec<Decl>, Pos),
    List(ListLit, Pos),
    /// `left & right`.
    And(Box<Expr>, Box<Expr>, Pos),
    /// A previously-compiled value embedded into new syntax. Produced by
    /// [`Value::fill_path`] and [`Value::unify`], never by the parser.
    Embed(Value),
}

impl Expr {
    /// Pos is the position of the expression, if it came from source.
    pub fn pos(&self) -> Option<&Pos> {
        use Expr::*;
        match self {
            Null(p) | Bool(_, p) | Int(_, p) | Float(_, p) | Str(_, p) | Top(p)
            | BasicType(_, p) | Ident(_, p) | Select(_, _, p) | Call(_, _, p) | Struct(_, p)
            | List(_, p) | And(_, _, p) => Some(p),
            Embed(_) => None,
        }
    }

    /// Lit_str builds a plain string literal.
    pub fn lit_str<S: ToString>(s: S, pos: Pos) -> Expr {
        Expr::Str(vec![StrPart::Lit(s.to_string())], pos)
    }
}

/// Format renders a file back to source text.
///
/// Used for overlay debugging and tests; not a full fidelity printer
/// (comments are not retained).
pub fn format_file(f: &File) -> String {
    let mut out = String::new();
    if let Some(pkg) = &f.package {
        let _ = writeln!(out, "package {pkg}\n");
    }
    for imp in &f.imports {
        match &imp.alias {
            Some(a) => {
                let _ = writeln!(out, "import {a} \"{}\"", imp.path);
            }
            None => {
                let _ = writeln!(out, "import \"{}\"", imp.path);
            }
        }
    }
    if !f.imports.is_empty() {
        out.push('\n');
    }
    for d in &f.decls {
        format_decl(&mut out, d, 0);
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn format_decl(out: &mut String, d: &Decl, depth: usize) {
    indent(out, depth);
    match d {
        Decl::Ellipsis(_) => out.push_str("...\n"),
        Decl::Field(f) => {
            match f.label.kind {
                LabelKind::Ident => out.push_str(&f.label.name),
                LabelKind::Definition => {
                    out.push('#');
                    out.push_str(&f.label.name);
                }
                LabelKind::String => {
                    let _ = write!(out, "{:?}", f.label.name);
                }
            }
            if f.optional {
                out.push('?');
            }
            out.push_str(": ");
            format_expr(out, &f.value, depth);
            out.push('\n');
        }
    }
}

fn format_expr(out: &mut String, e: &Expr, depth: usize) {
    match e {
        Expr::Null(_) => out.push_str("null"),
        Expr::Bool(b, _) => {
            let _ = write!(out, "{b}");
        }
        Expr::Int(n, _) => {
            let _ = write!(out, "{n}");
        }
        Expr::Float(x, _) => {
            let _ = write!(out, "{x}");
        }
        Expr::Top(_) => out.push('_'),
        Expr::BasicType(t, _) => out.push_str(t.name()),
        Expr::Ident(name, _) => out.push_str(name),
        Expr::Str(parts, _) => {
            out.push('"');
            for p in parts {
                match p {
                    StrPart::Lit(s) => {
                        for c in s.chars() {
                            match c {
                                '"' => out.push_str("\\\""),
                                '\\' => out.push_str("\\\\"),
                                '\n' => out.push_str("\\n"),
                                '\t' => out.push_str("\\t"),
                                c => out.push(c),
                            }
                        }
                    }
                    StrPart::Interp(e) => {
                        out.push_str("\\(");
                        format_expr(out, e, depth);
                        out.push(')');
                    }
                }
            }
            out.push('"');
        }
        Expr::Select(base, sel, _) => {
            format_expr(out, base, depth);
            out.push('.');
            out.push_str(sel);
        }
        Expr::Call(f, args, _) => {
            format_expr(out, f, depth);
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                format_expr(out, a, depth);
            }
            out.push(')');
        }
        Expr::And(l, r, _) => {
            format_expr(out, l, depth);
            out.push_str(" & ");
            format_expr(out, r, depth);
        }
        Expr::Struct(decls, _) => {
            if decls.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{\n");
            for d in decls {
                format_decl(out, d, depth + 1);
            }
            indent(out, depth);
            out.push('}');
        }
        Expr::List(l, _) => {
            out.push('[');
            for (i, e) in l.elems.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                format_expr(out, e, depth);
            }
            if let Some(open) = &l.open {
                if !l.elems.is_empty() {
                    out.push_str(", ");
                }
                out.push_str("...");
                if !matches!(open.as_ref(), Expr::Top(_)) {
                    format_expr(out, open, depth);
                }
            }
            out.push(']');
        }
        Expr::Embed(_) => out.push_str("_|embedded|_"),
    }
}
