// src/functions/mod.rs
//! Built-in function registry and compile-time lifecycle.
//!
//! Each built-in has a registry entry (name + arity bounds), optional
//! compiled state produced once by `init` at optimize time, and an eval
//! arm in the evaluator. Compiled state is immutable after `init`;
//! teardown is structural (Drop).

use std::sync::Arc;

use crate::ast::{Expr, FuncCall};
use crate::host::{HostResolver, LookupTable, StatsBucket, Template};
use crate::primask::PriMask;
use crate::Diagnostic;

/// Returned by `field()` when the requested field index is out of range.
pub const FIELD_NOT_FOUND: &str = "***FIELD NOT FOUND***";

/// Returned by `lookup()` whose table failed to resolve at compile time.
pub const TABLE_NOT_FOUND: &str = "TABLE-NOT-FOUND";

/// Identifiers of the built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncId {
    Strlen,
    ToLower,
    Replace,
    Wrap,
    Random,
    Field,
    ReMatch,
    ReExtract,
    PriFilt,
    Lookup,
    DynInc,
    Cstr,
    Cnum,
    Getenv,
    ExecTemplate,
}

/// `(name, min_arity, max_arity, id)`
const REGISTRY: &[(&str, usize, usize, FuncId)] = &[
    ("strlen", 1, 1, FuncId::Strlen),
    ("tolower", 1, 1, FuncId::ToLower),
    ("replace", 3, 3, FuncId::Replace),
    ("wrap", 2, 3, FuncId::Wrap),
    ("random", 1, 1, FuncId::Random),
    ("field", 3, 3, FuncId::Field),
    ("re_match", 2, 2, FuncId::ReMatch),
    ("re_extract", 4, 5, FuncId::ReExtract),
    ("prifilt", 1, 1, FuncId::PriFilt),
    ("lookup", 2, 2, FuncId::Lookup),
    ("dyn_inc", 2, 2, FuncId::DynInc),
    ("cstr", 1, 1, FuncId::Cstr),
    ("cnum", 1, 1, FuncId::Cnum),
    ("getenv", 1, 1, FuncId::Getenv),
    ("exec_template", 1, 1, FuncId::ExecTemplate),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown function: {0}()")]
    Unknown(String),

    #[error("{name}() takes {min}..={max} arguments, got {got}")]
    Arity {
        name: String,
        min: usize,
        max: usize,
        got: usize,
    },
}

/// Resolve a function name and argument count against the registry.
/// External parsers call this before building a `FuncCall` node.
pub fn resolve(name: &str, nargs: usize) -> Result<FuncId, RegistryError> {
    let &(entry_name, min, max, id) = REGISTRY
        .iter()
        .find(|(n, _, _, _)| *n == name)
        .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
    if nargs < min || nargs > max {
        return Err(RegistryError::Arity {
            name: entry_name.to_string(),
            min,
            max,
            got: nargs,
        });
    }
    Ok(id)
}

/// Per-call state compiled once by `init` and read-only thereafter.
#[derive(Debug, Clone)]
pub enum CompiledState {
    /// `init` has not run yet.
    Pending,
    /// The built-in needs no compiled state.
    Stateless,
    /// A compile diagnostic disabled this call; eval returns its sentinel.
    Disabled,
    Mask(PriMask),
    Regex(regex::Regex),
    Table(Option<Arc<dyn LookupTable>>),
    Bucket(Option<Arc<dyn StatsBucket>>),
    Template(Option<Arc<dyn Template>>),
}

impl PartialEq for CompiledState {
    fn eq(&self, other: &Self) -> bool {
        use CompiledState::*;
        match (self, other) {
            (Pending, Pending) | (Stateless, Stateless) | (Disabled, Disabled) => true,
            (Mask(a), Mask(b)) => a == b,
            (Regex(a), Regex(b)) => a.as_str() == b.as_str(),
            (Table(a), Table(b)) => opt_arc_eq(a, b),
            (Bucket(a), Bucket(b)) => opt_arc_eq(a, b),
            (Template(a), Template(b)) => opt_arc_eq(a, b),
            _ => false,
        }
    }
}

fn opt_arc_eq<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Compile the per-call state for a function node. Called by the
/// optimizer after argument expressions have been optimized; idempotent
/// because already-initialized calls are left alone.
pub fn init(call: &mut FuncCall, resolver: &dyn HostResolver, diags: &mut Vec<Diagnostic>) {
    if call.state != CompiledState::Pending {
        return;
    }
    call.state = match call.id {
        FuncId::ReMatch | FuncId::ReExtract => match literal_arg(call, 1, "pattern", diags) {
            Some(pattern) => match regex::Regex::new(&pattern) {
                Ok(re) => CompiledState::Regex(re),
                Err(err) => {
                    diags.push(Diagnostic::new(format!(
                        "invalid regular expression '{pattern}': {err}"
                    )));
                    CompiledState::Disabled
                }
            },
            None => CompiledState::Disabled,
        },
        FuncId::PriFilt => match literal_arg(call, 0, "priority selector", diags) {
            Some(selector) => match PriMask::parse_selector(&selector) {
                Some(mask) => CompiledState::Mask(mask),
                None => {
                    diags.push(Diagnostic::new(format!(
                        "prifilt(): cannot parse selector '{selector}'"
                    )));
                    CompiledState::Mask(PriMask::never())
                }
            },
            None => CompiledState::Mask(PriMask::never()),
        },
        FuncId::Lookup => match literal_arg(call, 0, "table name", diags) {
            Some(name) => {
                let table = resolver.resolve_table(&name);
                if table.is_none() {
                    diags.push(Diagnostic::new(format!(
                        "lookup(): table '{name}' not found"
                    )));
                }
                CompiledState::Table(table)
            }
            None => CompiledState::Table(None),
        },
        FuncId::DynInc => match literal_arg(call, 0, "bucket name", diags) {
            Some(name) => {
                let bucket = resolver.resolve_bucket(&name);
                if bucket.is_none() {
                    diags.push(Diagnostic::new(format!(
                        "dyn_inc(): counter bucket '{name}' not found"
                    )));
                }
                CompiledState::Bucket(bucket)
            }
            None => CompiledState::Bucket(None),
        },
        FuncId::ExecTemplate => match literal_arg(call, 0, "template name", diags) {
            Some(name) => {
                let tpl = resolver.resolve_template(&name);
                if tpl.is_none() {
                    diags.push(Diagnostic::new(format!(
                        "exec_template(): template '{name}' not found"
                    )));
                }
                CompiledState::Template(tpl)
            }
            None => CompiledState::Template(None),
        },
        _ => CompiledState::Stateless,
    };
}

/// Fetch an argument that must be a compile-time string literal.
fn literal_arg(
    call: &FuncCall,
    idx: usize,
    what: &str,
    diags: &mut Vec<Diagnostic>,
) -> Option<String> {
    match call.args.get(idx) {
        Some(Expr::String(s)) => Some(s.clone()),
        _ => {
            diags.push(Diagnostic::new(format!(
                "{:?}: {what} argument must be a string literal",
                call.id
            )));
            None
        }
    }
}

// ---- pure string helpers used by the evaluator -----------------------

/// Literal (non-regex) substring replacement. Matches are consumed left
/// to right; the inserted replacement text is never re-scanned.
pub fn replace_literal(subject: &str, find: &str, replacement: &str) -> String {
    if find.is_empty() {
        return subject.to_string();
    }
    subject.replace(find, replacement)
}

/// Prefix and suffix `source` with `wrapper`, first escaping occurrences
/// of `wrapper` inside `source` when an escape text is given.
pub fn wrap_text(source: &str, wrapper: &str, escape: Option<&str>) -> String {
    let inner = match escape {
        Some(esc) if !wrapper.is_empty() => source.replace(wrapper, esc),
        _ => source.to_string(),
    };
    let mut out = String::with_capacity(inner.len() + 2 * wrapper.len());
    out.push_str(wrapper);
    out.push_str(&inner);
    out.push_str(wrapper);
    out
}

/// 1-based field extraction. `None` when the index exceeds the field
/// count (the evaluator substitutes the sentinel text).
pub fn extract_field<'a>(subject: &'a str, delimiter: &str, index: i64) -> Option<&'a str> {
    if index < 1 || delimiter.is_empty() {
        return None;
    }
    subject.split(delimiter).nth(index as usize - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullResolver;

    #[test]
    fn test_registry_resolution() {
        assert_eq!(resolve("strlen", 1), Ok(FuncId::Strlen));
        assert_eq!(resolve("wrap", 2), Ok(FuncId::Wrap));
        assert_eq!(resolve("wrap", 3), Ok(FuncId::Wrap));
        assert!(matches!(
            resolve("wrap", 4),
            Err(RegistryError::Arity { got: 4, .. })
        ));
        assert!(matches!(
            resolve("no_such_fn", 1),
            Err(RegistryError::Unknown(_))
        ));
    }

    #[test]
    fn test_init_compiles_regex_once() {
        let mut call = FuncCall::new(
            FuncId::ReMatch,
            vec![Expr::Var("msg".into()), Expr::String("[0-9]+".into())],
        );
        let mut diags = Vec::new();
        init(&mut call, &NullResolver, &mut diags);
        assert!(diags.is_empty());
        assert!(matches!(call.state, CompiledState::Regex(_)));

        // Re-running init must not touch an initialized call.
        let before = call.state.clone();
        init(&mut call, &NullResolver, &mut diags);
        assert_eq!(call.state, before);
    }

    #[test]
    fn test_init_rejects_non_literal_pattern() {
        let mut call = FuncCall::new(
            FuncId::ReMatch,
            vec![Expr::Var("msg".into()), Expr::Var("pat".into())],
        );
        let mut diags = Vec::new();
        init(&mut call, &NullResolver, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(call.state, CompiledState::Disabled);
    }

    #[test]
    fn test_init_bad_regex_disables_call() {
        let mut call = FuncCall::new(
            FuncId::ReMatch,
            vec![Expr::Var("msg".into()), Expr::String("([0-9".into())],
        );
        let mut diags = Vec::new();
        init(&mut call, &NullResolver, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(call.state, CompiledState::Disabled);
    }

    #[test]
    fn test_init_unresolved_table_keeps_call() {
        let mut call = FuncCall::new(
            FuncId::Lookup,
            vec![Expr::String("geo".into()), Expr::Var("ip".into())],
        );
        let mut diags = Vec::new();
        init(&mut call, &NullResolver, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(call.state, CompiledState::Table(None));
    }

    #[test]
    fn test_init_prifilt_selector() {
        let mut call = FuncCall::new(FuncId::PriFilt, vec![Expr::String("mail.err".into())]);
        let mut diags = Vec::new();
        init(&mut call, &NullResolver, &mut diags);
        match &call.state {
            CompiledState::Mask(mask) => assert!(mask.matches(2, 3)),
            other => panic!("unexpected state: {other:?}"),
        }

        let mut call = FuncCall::new(FuncId::PriFilt, vec![Expr::String("mail.bogus".into())]);
        init(&mut call, &NullResolver, &mut diags);
        assert_eq!(diags.len(), 1);
        assert_eq!(call.state, CompiledState::Mask(PriMask::never()));
    }

    #[test]
    fn test_replace_literal() {
        assert_eq!(replace_literal("a-b-c", "-", "+"), "a+b+c");
        assert_eq!(replace_literal("aaa", "aa", "a"), "aa");
        assert_eq!(replace_literal("x", "", "y"), "x");
        // Replacement text is not re-scanned.
        assert_eq!(replace_literal("ab", "ab", "abab"), "abab");
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("v", "\"", None), "\"v\"");
        assert_eq!(wrap_text("say \"hi\"", "\"", Some("'")), "\"say 'hi'\"");
        assert_eq!(wrap_text("x", "", None), "x");
    }

    #[test]
    fn test_extract_field() {
        assert_eq!(extract_field("a:b:c", ":", 2), Some("b"));
        assert_eq!(extract_field("a:b", ":", 5), None);
        assert_eq!(extract_field("a::c", "::", 2), Some("c"));
        assert_eq!(extract_field("abc", ":", 1), Some("abc"));
        assert_eq!(extract_field("abc", ":", 0), None);
    }
}
