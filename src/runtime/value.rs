// src/runtime/value.rs
//! Runtime value type and coercion rules.
//!
//! Every sub-expression evaluates to exactly one `Value`. Coercions that
//! allocate do so explicitly; borrowing coercions return `Cow::Borrowed`.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tagged runtime datum produced by expression evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer.
    Number(i64),
    /// Owned UTF-8 text.
    Text(String),
    /// JSON document (message subtree, foreach collections).
    Json(serde_json::Value),
    /// Ordered list of strings (array literals reaching value position).
    Array(Vec<String>),
}

impl Value {
    /// Coerce to a number. `None` means the coercion failed; callers must
    /// apply their own fallback (string compare, zero, ...).
    ///
    /// Text uses a strict all-or-nothing decimal parse: optional leading
    /// `-`, then digits only. Any trailing non-digit fails the whole
    /// conversion. Overflow saturates rather than wrapping.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            Value::Json(j) => Some(json_to_number(j)),
            Value::Array(a) => a.first().and_then(|s| parse_number(s)),
        }
    }

    /// Coerce to text. Always succeeds; Number and non-string Json render
    /// a fresh buffer, Text and Array borrow.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Number(n) => Cow::Owned(n.to_string()),
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            Value::Json(j) => json_to_text(j),
            // An array outside a comparison evaluates to its first element.
            Value::Array(a) => Cow::Borrowed(a.first().map(String::as_str).unwrap_or("")),
        }
    }

    /// Truthiness: numeric coercion != 0. Failed coercions are falsy.
    pub fn as_bool(&self) -> bool {
        self.as_number().is_some_and(|n| n != 0)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }
}

/// Strict integer parse: `-?[0-9]+` consuming the whole input.
/// Saturates on overflow so oversized literals still compare as extremes.
fn parse_number(s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    let (neg, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        let d = i64::from(b - b'0');
        n = n.saturating_mul(10).saturating_add(if neg { -d } else { d });
    }
    if n == i64::MAX || n == i64::MIN {
        log::debug!("numeric string '{s}' saturated during conversion");
    }
    Some(n)
}

fn json_to_number(j: &serde_json::Value) -> i64 {
    match j {
        serde_json::Value::Null => 0,
        serde_json::Value::Bool(b) => i64::from(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .unwrap_or_else(|| n.as_f64().map(|f| f as i64).unwrap_or(0)),
        serde_json::Value::String(s) => parse_number(s).unwrap_or(0),
        _ => 0,
    }
}

fn json_to_text(j: &serde_json::Value) -> Cow<'_, str> {
    match j {
        serde_json::Value::Null => Cow::Borrowed(""),
        serde_json::Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "\"{}\"", s),
            Value::Json(j) => write!(f, "{}", j),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, s) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\"", s)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}
