//! Lexer for the configuration language subset.

use crate::diag::{Diagnostic, Errors, Pos};

/// RawPart is a piece of a string literal as seen by the lexer.
///
/// Interpolation bodies are kept as source text; the parser compiles them
/// with a nested parser so the lexer stays non-recursive.
#[derive(Clone, Debug, PartialEq)]
pub enum RawPart {
    /// Literal text with escapes already resolved.
    Lit(String),
    /// Source text of a `\(…)` interpolation and the position it starts at.
    Interp(String, Pos),
}

/// Tok is a lexical token.
#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Ident(String),
    /// Definition identifier, e.g. `#config`.
    Def(String),
    Str(Vec<RawPart>),
    Int(i64),
    Float(f64),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Comma,
    Dot,
    Amp,
    Question,
    Ellipsis,
    Minus,
    Eof,
}

impl Tok {
    /// Describe renders the token for error messages.
    pub fn describe(&self) -> String {
        use Tok::*;
        match self {
            Ident(s) => format!("identifier {s:?}"),
            Def(s) => format!("definition \"#{s}\""),
            Str(_) => "string literal".into(),
            Int(n) => format!("integer {n}"),
            Float(x) => format!("float {x}"),
            LBrace => "'{'".into(),
            RBrace => "'}'".into(),
            LBracket => "'['".into(),
            RBracket => "']'".into(),
            LParen => "'('".into(),
            RParen => "')'".into(),
            Colon => "':'".into(),
            Comma => "','".into(),
            Dot => "'.'".into(),
            Amp => "'&'".into(),
            Question => "'?'".into(),
            Ellipsis => "'...'".into(),
            Minus => "'-'".into(),
            Eof => "end of file".into(),
        }
    }
}

/// Token is a token plus its position and separator context.
#[derive(Clone, Debug)]
pub struct Token {
    pub tok: Tok,
    pub pos: Pos,
    /// True when at least one newline preceded this token. Newlines
    /// terminate declarations, the same way commas do.
    pub nl_before: bool,
}

/// Lex tokenizes `src`, attributing positions to `file`.
pub fn lex(file: &str, src: &str) -> Result<Vec<Token>, Errors> {
    Lexer::new(file, src).run()
}

struct Lexer<'a> {
    file: &'a str,
    chars: Vec<char>,
    i: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(file: &'a str, src: &'a str) -> Lexer<'a> {
        Lexer {
            file,
            chars: src.chars().collect(),
            i: 0,
            line: 1,
            col: 1,
        }
    }

    fn pos(&self) -> Pos {
        Pos {
            file: self.file.to_string(),
            line: self.line,
            col: self.col,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.i + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn err<S: ToString>(&self, msg: S) -> Errors {
        Errors::from_one(Diagnostic::new(msg.to_string()).at(self.pos()))
    }

    fn run(mut self) -> Result<Vec<Token>, Errors> {
        let mut out = Vec::new();
        let mut nl = false;
        loop {
            match self.peek() {
                Some(c) if c == ' ' || c == '\t' || c == '\r' => {
                    self.bump();
                }
                Some('\n') => {
                    nl = true;
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(_) => {
                    let pos = self.pos();
                    let tok = self.token()?;
                    out.push(Token {
                        tok,
                        pos,
                        nl_before: nl,
                    });
                    nl = false;
                }
                None => {
                    out.push(Token {
                        tok: Tok::Eof,
                        pos: self.pos(),
                        nl_before: nl,
                    });
                    return Ok(out);
                }
            }
        }
    }

    fn token(&mut self) -> Result<Tok, Errors> {
        let c = self.peek().expect("caller checked");
        match c {
            '{' => self.punct(Tok::LBrace),
            '}' => self.punct(Tok::RBrace),
            '[' => self.punct(Tok::LBracket),
            ']' => self.punct(Tok::RBracket),
            '(' => self.punct(Tok::LParen),
            ')' => self.punct(Tok::RParen),
            ':' => self.punct(Tok::Colon),
            ',' => self.punct(Tok::Comma),
            '&' => self.punct(Tok::Amp),
            '?' => self.punct(Tok::Question),
            '-' => self.punct(Tok::Minus),
            '.' => {
                if self.peek2() == Some('.') {
                    self.bump();
                    self.bump();
                    if self.bump() != Some('.') {
                        return Err(self.err("expected '...'"));
                    }
                    Ok(Tok::Ellipsis)
                } else {
                    self.punct(Tok::Dot)
                }
            }
            '"' => self.string(),
            '#' => {
                self.bump();
                let name = self.ident_tail();
                if name.is_empty() {
                    return Err(self.err("expected identifier after '#'"));
                }
                Ok(Tok::Def(name))
            }
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let name = self.ident_tail();
                Ok(Tok::Ident(name))
            }
            c => Err(self.err(format!("unexpected character {c:?}"))),
        }
    }

    fn punct(&mut self, t: Tok) -> Result<Tok, Errors> {
        self.bump();
        Ok(t)
    }

    fn ident_tail(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn number(&mut self) -> Result<Tok, Errors> {
        let mut s = String::new();
        let mut float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.bump();
            } else if c == '.' && !float && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
                float = true;
                s.push(c);
                self.bump();
            } else if (c == 'e' || c == 'E') && !s.is_empty() {
                float = true;
                s.push(c);
                self.bump();
                if let Some(sign) = self.peek() {
                    if sign == '+' || sign == '-' {
                        s.push(sign);
                        self.bump();
                    }
                }
            } else {
                break;
            }
        }
        if float {
            s.parse::<f64>()
                .map(Tok::Float)
                .map_err(|e| self.err(format!("bad float literal: {e}")))
        } else {
            s.parse::<i64>()
                .map(Tok::Int)
                .map_err(|e| self.err(format!("bad integer literal: {e}")))
        }
    }

    fn string(&mut self) -> Result<Tok, Errors> {
        self.bump(); // opening quote
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => return Err(self.err("unterminated string literal")),
            };
            match c {
                '"' => {
                    self.bump();
                    break;
                }
                '\n' => return Err(self.err("newline in string literal")),
                '\\' => {
                    self.bump();
                    match self.peek() {
                        Some('(') => {
                            // Interpolation: capture balanced parens as raw
                            // source for the parser.
                            self.bump();
                            if !lit.is_empty() {
                                parts.push(RawPart::Lit(std::mem::take(&mut lit)));
                            }
                            let start = self.pos();
                            let mut depth = 1usize;
                            let mut body = String::new();
                            loop {
                                match self.bump() {
                                    Some('(') => {
                                        depth += 1;
                                        body.push('(');
                                    }
                                    Some(')') => {
                                        depth -= 1;
                                        if depth == 0 {
                                            break;
                                        }
                                        body.push(')');
                                    }
                                    Some(c) => body.push(c),
                                    None => {
                                        return Err(self.err("unterminated interpolation"));
                                    }
                                }
                            }
                            parts.push(RawPart::Interp(body, start));
                        }
                        Some(esc) => {
                            self.bump();
                            lit.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '"' => '"',
                                '\\' => '\\',
                                '/' => '/',
                                'u' => {
                                    let mut hex = String::new();
                                    for _ in 0..4 {
                                        match self.bump() {
                                            Some(h) if h.is_ascii_hexdigit() => hex.push(h),
                                            _ => {
                                                return Err(self
                                                    .err("bad \\u escape in string literal"));
                                            }
                                        }
                                    }
                                    let n = u32::from_str_radix(&hex, 16)
                                        .expect("hex digits checked above");
                                    char::from_u32(n).ok_or_else(|| {
                                        self.err("bad \\u escape in string literal")
                                    })?
                                }
                                other => {
                                    return Err(
                                        self.err(format!("unknown escape '\\{other}'"))
                                    );
                                }
                            });
                        }
                        None => return Err(self.err("unterminated string literal")),
                    }
                }
                _ => {
                    lit.push(c);
                    self.bump();
                }
            }
        }
        if !lit.is_empty() || parts.is_empty() {
            parts.push(RawPart::Lit(lit));
        }
        Ok(Tok::Str(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        lex("test.cue", src)
            .unwrap()
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    #[test]
    fn punctuation_and_idents() {
        let toks = kinds("a: {b: 1}");
        assert_eq!(
            toks,
            vec![
                Tok::Ident("a".into()),
                Tok::Colon,
                Tok::LBrace,
                Tok::Ident("b".into()),
                Tok::Colon,
                Tok::Int(1),
                Tok::RBrace,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn definitions_and_ellipsis() {
        let toks = kinds("#config: {...}");
        assert_eq!(toks[0], Tok::Def("config".into()));
        assert!(toks.contains(&Tok::Ellipsis));
    }

    #[test]
    fn string_interpolation_is_raw() {
        let toks = kinds(r#""\(fqn):\(name)""#);
        match &toks[0] {
            Tok::Str(parts) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[0], RawPart::Interp(src, _) if src == "fqn"));
                assert!(matches!(&parts[1], RawPart::Lit(s) if s == ":"));
            }
            other => panic!("not a string: {other:?}"),
        }
    }

    #[test]
    fn newline_separators_are_tracked() {
        let toks = lex("test.cue", "a: 1\nb: 2").unwrap();
        let b = toks.iter().find(|t| t.tok == Tok::Ident("b".into())).unwrap();
        assert!(b.nl_before);
    }

    #[test]
    fn comments_are_skipped() {
        let toks = kinds("// hello\na: 1");
        assert_eq!(toks[0], Tok::Ident("a".into()));
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(lex("test.cue", "a: \"oops").is_err());
    }
}
