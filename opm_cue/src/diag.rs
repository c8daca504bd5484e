//! Diagnostics for the compiler and evaluator.
//!
//! Every failure carries an optional source position and the path of the
//! value it was produced at. [`Errors`] aggregates them for reporting:
//! duplicates are collapsed by `(position, path)` and the remainder is
//! rendered sorted by position, then path, then message.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path as FsPath;

/// Pos is a source position.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pos {
    /// File the position refers to, as given to the parser.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub col: u32,
}

impl Pos {
    /// Synthetic returns a position for generated syntax.
    pub fn synthetic<S: ToString>(file: S) -> Pos {
        Pos {
            file: file.to_string(),
            line: 0,
            col: 0,
        }
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Diagnostic is a single compiler or evaluator error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// Source position, if one is known.
    pub pos: Option<Pos>,
    /// Dotted path of the value the error was produced at. May be empty.
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// New creates a diagnostic with neither position nor path.
    pub fn new<S: ToString>(message: S) -> Diagnostic {
        Diagnostic {
            pos: None,
            path: String::new(),
            message: message.to_string(),
        }
    }

    /// At attaches a position.
    pub fn at(mut self, pos: Pos) -> Diagnostic {
        self.pos = Some(pos);
        self
    }

    /// In_path attaches a value path if none is set yet.
    pub fn in_path<S: AsRef<str>>(mut self, path: S) -> Diagnostic {
        if self.path.is_empty() {
            self.path = path.as_ref().to_string();
        }
        self
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if !self.path.is_empty() {
            write!(f, "{}: ", self.path)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(pos) = &self.pos {
            write!(f, ":\n    {pos}")?;
        }
        Ok(())
    }
}

/// Errors is an aggregated, deduplicated collection of diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Errors(Vec<Diagnostic>);

impl Errors {
    /// New creates an empty collection.
    pub fn new() -> Errors {
        Errors::default()
    }

    /// From_one wraps a single diagnostic.
    pub fn from_one(d: Diagnostic) -> Errors {
        Errors(vec![d])
    }

    /// Push adds a diagnostic.
    pub fn push(&mut self, d: Diagnostic) {
        self.0.push(d);
    }

    /// Extend merges another collection into this one.
    pub fn extend(&mut self, other: Errors) {
        self.0.extend(other.0);
    }

    /// Is_empty reports whether any diagnostics have been collected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Len reports the number of diagnostics after normalization.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iter yields the collected diagnostics in their current order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    /// Normalize collapses duplicates by `(position, path)` and sorts by
    /// position, then path, then message.
    pub fn normalize(&mut self) {
        self.0
            .sort_by(|a, b| (&a.pos, &a.path, &a.message).cmp(&(&b.pos, &b.path, &b.message)));
        self.0.dedup_by(|a, b| a.pos == b.pos && a.path == b.path);
    }

    /// Into_result returns `Ok(())` when empty, or the normalized collection.
    pub fn into_result(mut self) -> Result<(), Errors> {
        if self.is_empty() {
            Ok(())
        } else {
            self.normalize();
            Err(self)
        }
    }

    /// Format renders the collection with file paths shown relative to
    /// `base` where possible.
    pub fn format(&self, base: Option<&FsPath>) -> String {
        let mut out = String::new();
        let mut errs = self.clone();
        errs.normalize();
        for d in errs.iter() {
            if !out.is_empty() {
                out.push('\n');
            }
            if !d.path.is_empty() {
                out.push_str(&d.path);
                out.push_str(": ");
            }
            out.push_str(&d.message);
            if let Some(pos) = &d.pos {
                let file = base
                    .and_then(|b| FsPath::new(&pos.file).strip_prefix(b).ok())
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| pos.file.clone());
                out.push_str(&format!(":\n    {}:{}:{}", file, pos.line, pos.col));
            }
        }
        out
    }
}

impl Display for Errors {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.format(None))
    }
}

impl std::error::Error for Errors {}

impl From<Diagnostic> for Errors {
    fn from(d: Diagnostic) -> Errors {
        Errors::from_one(d)
    }
}

impl IntoIterator for Errors {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_and_sort() {
        let pos = Pos {
            file: "a.cue".into(),
            line: 3,
            col: 1,
        };
        let mut errs = Errors::new();
        errs.push(Diagnostic::new("second").at(pos.clone()).in_path("b"));
        errs.push(Diagnostic::new("first").at(pos.clone()).in_path("a"));
        errs.push(Diagnostic::new("duplicate").at(pos).in_path("a"));
        errs.normalize();
        assert_eq!(errs.len(), 2);
        let paths: Vec<_> = errs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, ["a", "b"]);
    }

    #[test]
    fn relative_paths() {
        let mut errs = Errors::new();
        errs.push(
            Diagnostic::new("boom").at(Pos {
                file: "/mod/root/x.cue".into(),
                line: 1,
                col: 2,
            }),
        );
        let out = errs.format(Some(FsPath::new("/mod/root")));
        assert!(out.contains("x.cue:1:2"), "{out}");
    }
}
