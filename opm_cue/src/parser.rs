//! Recursive-descent parser producing [`ast`] trees.

use crate::ast::{
    BasicType, Decl, Expr, Field, File, Import, Label, LabelKind, ListLit, StrPart,
};
use crate::diag::{Diagnostic, Errors, Pos};
use crate::token::{lex, RawPart, Tok, Token};

/// Parse_file parses a single source file.
pub fn parse_file(filename: &str, src: &str) -> Result<File, Errors> {
    let toks = lex(filename, src)?;
    let mut p = Parser {
        filename,
        toks,
        i: 0,
    };
    p.file()
}

/// Parse_expr parses a standalone expression, as found in interpolations.
fn parse_expr(filename: &str, src: &str, base: &Pos) -> Result<Expr, Errors> {
    let mut toks = lex(filename, src)?;
    // Re-base positions onto the interpolation start so diagnostics point
    // into the original file.
    for t in &mut toks {
        if t.pos.line == 1 {
            t.pos.col += base.col;
        }
        t.pos.line += base.line - 1;
    }
    let mut p = Parser {
        filename,
        toks,
        i: 0,
    };
    let e = p.expr()?;
    p.expect(Tok::Eof)?;
    Ok(e)
}

struct Parser<'a> {
    filename: &'a str,
    toks: Vec<Token>,
    i: usize,
}

impl<'a> Parser<'a> {
    fn cur(&self) -> &Token {
        &self.toks[self.i.min(self.toks.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let t = self.cur().clone();
        if self.i < self.toks.len() - 1 {
            self.i += 1;
        }
        t
    }

    fn at(&self, t: &Tok) -> bool {
        &self.cur().tok == t
    }

    fn eat(&mut self, t: &Tok) -> bool {
        if self.at(t) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Tok) -> Result<Token, Errors> {
        if self.at(&t) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(&format!("expected {}", t.describe())))
        }
    }

    fn unexpected(&self, what: &str) -> Errors {
        let cur = self.cur();
        Errors::from_one(
            Diagnostic::new(format!("{what}, found {}", cur.tok.describe())).at(cur.pos.clone()),
        )
    }

    /// At_clause reports whether the current token starts a `package` or
    /// `import` clause, as opposed to a field that happens to use the word
    /// as its label.
    fn at_clause(&self, word: &str) -> bool {
        if !matches!(&self.cur().tok, Tok::Ident(kw) if kw == word) {
            return false;
        }
        !matches!(
            self.toks.get(self.i + 1).map(|t| &t.tok),
            Some(Tok::Colon) | Some(Tok::Question)
        )
    }

    fn file(&mut self) -> Result<File, Errors> {
        let mut package = None;
        let mut imports = Vec::new();

        if self.at_clause("package") {
            self.bump();
            match self.bump() {
                Token {
                    tok: Tok::Ident(name),
                    ..
                } => package = Some(name),
                t => {
                    return Err(Errors::from_one(
                        Diagnostic::new("expected package name").at(t.pos),
                    ));
                }
            }
        }
        while self.at_clause("import") {
            let pos = self.bump().pos;
            let mut alias = None;
            if let Tok::Ident(a) = &self.cur().tok {
                alias = Some(a.clone());
                self.bump();
            }
            let path = match self.bump() {
                Token {
                    tok: Tok::Str(parts),
                    pos,
                    ..
                } => match parts.as_slice() {
                    [RawPart::Lit(s)] => s.clone(),
                    _ => {
                        return Err(Errors::from_one(
                            Diagnostic::new("import path must be a plain string").at(pos),
                        ));
                    }
                },
                t => {
                    return Err(Errors::from_one(
                        Diagnostic::new("expected import path string").at(t.pos),
                    ));
                }
            };
            imports.push(Import { path, alias, pos });
        }

        let decls = self.decls(&Tok::Eof)?;
        self.expect(Tok::Eof)?;
        Ok(File {
            filename: self.filename.to_string(),
            package,
            imports,
            decls,
        })
    }

    /// Decls parses declarations until `close` (not consumed). Fields are
    /// separated by commas or newlines.
    fn decls(&mut self, close: &Tok) -> Result<Vec<Decl>, Errors> {
        let mut out = Vec::new();
        loop {
            while self.eat(&Tok::Comma) {}
            if self.at(close) || self.at(&Tok::Eof) {
                return Ok(out);
            }
            if !out.is_empty() && !self.cur().nl_before {
                return Err(self.unexpected("expected ',' or newline between declarations"));
            }
            if self.at(&Tok::Ellipsis) {
                let pos = self.bump().pos;
                out.push(Decl::Ellipsis(pos));
                continue;
            }
            out.push(Decl::Field(self.field()?));
        }
    }

    fn field(&mut self) -> Result<Field, Errors> {
        let t = self.bump();
        let pos = t.pos.clone();
        let label = match t.tok {
            Tok::Ident(name) => Label {
                name,
                kind: LabelKind::Ident,
            },
            Tok::Def(name) => Label {
                name,
                kind: LabelKind::Definition,
            },
            Tok::Str(parts) => match parts.as_slice() {
                [RawPart::Lit(s)] => Label {
                    name: s.clone(),
                    kind: LabelKind::String,
                },
                _ => {
                    return Err(Errors::from_one(
                        Diagnostic::new("field label must not contain interpolation").at(pos),
                    ));
                }
            },
            tok => {
                return Err(Errors::from_one(
                    Diagnostic::new(format!("expected field label, found {}", tok.describe()))
                        .at(pos),
                ));
            }
        };
        let optional = self.eat(&Tok::Question);
        self.expect(Tok::Colon)?;
        // Label shorthand: `a: b: 1` declares a single-field struct.
        if self.at_label_colon() {
            let inner = self.field()?;
            let inner_pos = inner.pos.clone();
            return Ok(Field {
                label,
                optional,
                value: Expr::Struct(vec![Decl::Field(inner)], inner_pos),
                pos,
            });
        }
        let value = self.expr()?;
        Ok(Field {
            label,
            optional,
            value,
            pos,
        })
    }

    /// At_label_colon reports whether the upcoming tokens are a field label
    /// followed by `:` (or `?:`), distinguishing `a: b: 1` from `a: b`.
    fn at_label_colon(&self) -> bool {
        if !matches!(self.cur().tok, Tok::Ident(_) | Tok::Def(_) | Tok::Str(_)) {
            return false;
        }
        let peek = |n: usize| self.toks.get(self.i + n).map(|t| &t.tok);
        match peek(1) {
            Some(Tok::Colon) => true,
            Some(Tok::Question) => matches!(peek(2), Some(Tok::Colon)),
            _ => false,
        }
    }

    fn expr(&mut self) -> Result<Expr, Errors> {
        let mut lhs = self.unary()?;
        while self.at(&Tok::Amp) {
            let pos = self.bump().pos;
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs), pos);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, Errors> {
        if self.at(&Tok::Minus) {
            let pos = self.bump().pos;
            return match self.bump() {
                Token {
                    tok: Tok::Int(n), ..
                } => Ok(Expr::Int(-n, pos)),
                Token {
                    tok: Tok::Float(x), ..
                } => Ok(Expr::Float(-x, pos)),
                t => Err(Errors::from_one(
                    Diagnostic::new("expected number after '-'").at(t.pos),
                )),
            };
        }
        let mut e = self.primary()?;
        loop {
            if self.at(&Tok::Dot) {
                let pos = self.bump().pos;
                let sel = match self.bump() {
                    Token {
                        tok: Tok::Ident(name),
                        ..
                    } => name,
                    Token {
                        tok: Tok::Def(name),
                        ..
                    } => format!("#{name}"),
                    t => {
                        return Err(Errors::from_one(
                            Diagnostic::new("expected selector after '.'").at(t.pos),
                        ));
                    }
                };
                e = Expr::Select(Box::new(e), sel, pos);
            } else if self.at(&Tok::LParen) {
                let pos = self.bump().pos;
                let mut args = Vec::new();
                if !self.at(&Tok::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Tok::RParen)?;
                e = Expr::Call(Box::new(e), args, pos);
            } else {
                return Ok(e);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, Errors> {
        let t = self.bump();
        let pos = t.pos.clone();
        match t.tok {
            Tok::Int(n) => Ok(Expr::Int(n, pos)),
            Tok::Float(x) => Ok(Expr::Float(x, pos)),
            Tok::Str(parts) => {
                let mut out = Vec::new();
                for p in parts {
                    match p {
                        RawPart::Lit(s) => out.push(StrPart::Lit(s)),
                        RawPart::Interp(src, start) => {
                            out.push(StrPart::Interp(parse_expr(self.filename, &src, &start)?));
                        }
                    }
                }
                Ok(Expr::Str(out, pos))
            }
            Tok::Ident(name) => Ok(match name.as_str() {
                "null" => Expr::Null(pos),
                "true" => Expr::Bool(true, pos),
                "false" => Expr::Bool(false, pos),
                "string" => Expr::BasicType(BasicType::String, pos),
                "int" => Expr::BasicType(BasicType::Int, pos),
                "float" => Expr::BasicType(BasicType::Float, pos),
                "number" => Expr::BasicType(BasicType::Number, pos),
                "bool" => Expr::BasicType(BasicType::Bool, pos),
                "_" => Expr::Top(pos),
                _ => Expr::Ident(name, pos),
            }),
            Tok::Def(name) => Ok(Expr::Ident(format!("#{name}"), pos)),
            Tok::LBrace => {
                let decls = self.decls(&Tok::RBrace)?;
                self.expect(Tok::RBrace)?;
                Ok(Expr::Struct(decls, pos))
            }
            Tok::LBracket => {
                let mut elems = Vec::new();
                let mut open = None;
                loop {
                    while self.eat(&Tok::Comma) {}
                    if self.at(&Tok::RBracket) {
                        break;
                    }
                    if self.at(&Tok::Ellipsis) {
                        let epos = self.bump().pos;
                        if self.at(&Tok::RBracket) {
                            open = Some(Box::new(Expr::Top(epos)));
                        } else {
                            open = Some(Box::new(self.expr()?));
                        }
                        break;
                    }
                    elems.push(self.expr()?);
                    if !self.eat(&Tok::Comma) && !self.cur().nl_before {
                        break;
                    }
                }
                self.expect(Tok::RBracket)?;
                Ok(Expr::List(ListLit { elems, open }, pos))
            }
            Tok::LParen => {
                let e = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(e)
            }
            tok => Err(Errors::from_one(
                Diagnostic::new(format!("expected expression, found {}", tok.describe())).at(pos),
            )),
        }
    }
}
