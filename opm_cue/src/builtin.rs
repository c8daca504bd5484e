//! Builtin packages available to `import`.

use uuid::Uuid;

use crate::diag::Diagnostic;
use crate::value::Val;

/// Package is a builtin package.
#[derive(Debug)]
pub struct Package {
    /// Import path and default local name.
    pub name: &'static str,
    /// Functions the package exports.
    pub funcs: &'static [Func],
}

/// Func is a builtin function.
#[derive(Debug)]
pub struct Func {
    /// Function name within its package.
    pub name: &'static str,
    /// Number of arguments.
    pub arity: usize,
    /// The implementation. Arguments are concrete values.
    pub call: fn(&[Val]) -> Result<Val, Diagnostic>,
}

/// Lookup resolves an import path to a builtin package.
pub fn lookup(path: &str) -> Option<&'static Package> {
    PACKAGES.iter().find(|p| p.name == path)
}

static PACKAGES: &[Package] = &[Package {
    name: "uuid",
    funcs: &[Func {
        name: "SHA1",
        arity: 2,
        call: uuid_sha1,
    }],
}];

/// Uuid_sha1 computes a name-based (version 5) UUID from a namespace UUID
/// string and a name.
fn uuid_sha1(args: &[Val]) -> Result<Val, Diagnostic> {
    let ns = args[0]
        .as_str()
        .ok_or_else(|| Diagnostic::new("uuid.SHA1: namespace must be a string"))?;
    let name = args[1]
        .as_str()
        .ok_or_else(|| Diagnostic::new("uuid.SHA1: name must be a string"))?;
    let ns = Uuid::parse_str(ns)
        .map_err(|e| Diagnostic::new(format!("uuid.SHA1: bad namespace UUID: {e}")))?;
    Ok(Val::Str(
        Uuid::new_v5(&ns, name.as_bytes()).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_is_stable() {
        let args = [
            Val::Str("6ba7b810-9dad-11d1-80b4-00c04fd430c8".into()), // DNS namespace
            Val::Str("opmodel.dev".into()),
        ];
        let got = uuid_sha1(&args).unwrap();
        assert_eq!(
            got.as_str().unwrap(),
            "c1cbe76d-5687-5a47-bfe6-83b081b15413",
        );
    }

    #[test]
    fn sha1_rejects_bad_namespace() {
        let args = [Val::Str("not-a-uuid".into()), Val::Str("x".into())];
        assert!(uuid_sha1(&args).is_err());
    }
}
