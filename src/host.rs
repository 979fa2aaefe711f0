// src/host.rs
//! Capabilities the engine consumes from its embedding daemon: the
//! per-message property store, lookup tables, statistics buckets,
//! templates and output actions.
//!
//! Table/bucket/template references are resolved once at compile time
//! and stored (immutably) in function-call compiled state. Anything a
//! built-in needs to mutate during evaluation must live behind its own
//! internal synchronization; the engine never hands out exclusive access.

use std::fmt;
use std::sync::Arc;

use ahash::HashMap;

use crate::runtime::value::Value;

/// Read/write view of the message currently being evaluated. One context
/// belongs to exactly one message; distinct messages may be evaluated
/// concurrently against the same compiled program.
pub trait MessageContext {
    /// Variable lookup. `None` for unknown properties; the evaluator
    /// substitutes an empty string.
    fn get_property(&self, name: &str) -> Option<Value>;

    /// `(facility, severity)` of the current message.
    fn get_facility_severity(&self) -> (u8, u8);

    /// Store a script variable. Without `force_reset`, an existing value
    /// wins and the assignment is dropped; `force_reset` always
    /// overwrites. This mirrors the set/reset statement split.
    fn set_property(&mut self, name: &str, value: Value, force_reset: bool);

    fn unset_property(&mut self, name: &str);
}

/// Output action the `Action` statement submits the message to.
pub trait MessageAction: Send + Sync + fmt::Debug {
    fn process(&self, ctx: &dyn MessageContext);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKeyType {
    Str,
    Uint,
}

pub enum LookupKey<'a> {
    Str(&'a str),
    Uint(u64),
}

/// Compile-time-resolved lookup table. Implementations must be safe to
/// read from many evaluator threads at once.
pub trait LookupTable: Send + Sync + fmt::Debug {
    fn key_type(&self) -> LookupKeyType;

    /// Per-call key lookup; `None` means "use the table's default".
    fn get(&self, key: LookupKey<'_>) -> Option<String>;

    /// Swap in fresh table contents. `stub_value`, when given, is served
    /// for every key while the reload is in progress.
    fn reload(&self, stub_value: Option<&str>);
}

/// Named counter bucket for `dyn_inc`.
pub trait StatsBucket: Send + Sync + fmt::Debug {
    /// Increment the counter behind `key`, returning the new value.
    fn increment(&self, key: &str) -> i64;
}

/// Compile-time-resolved message template.
pub trait Template: Send + Sync + fmt::Debug {
    fn render(&self, ctx: &dyn MessageContext) -> String;
}

/// Resolution interface consulted once per function call at compile time.
pub trait HostResolver {
    fn resolve_table(&self, name: &str) -> Option<Arc<dyn LookupTable>>;
    fn resolve_bucket(&self, name: &str) -> Option<Arc<dyn StatsBucket>>;
    fn resolve_template(&self, name: &str) -> Option<Arc<dyn Template>>;
}

/// Resolver that knows no tables, buckets or templates. Compilation
/// against it degrades the affected calls to their sentinels.
pub struct NullResolver;

impl HostResolver for NullResolver {
    fn resolve_table(&self, _name: &str) -> Option<Arc<dyn LookupTable>> {
        None
    }

    fn resolve_bucket(&self, _name: &str) -> Option<Arc<dyn StatsBucket>> {
        None
    }

    fn resolve_template(&self, _name: &str) -> Option<Arc<dyn Template>> {
        None
    }
}

/// In-memory message context for embedders and tests.
#[derive(Debug, Clone, Default)]
pub struct LogMessage {
    properties: HashMap<String, Value>,
    facility: u8,
    severity: u8,
}

impl LogMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pri(facility: u8, severity: u8) -> Self {
        LogMessage {
            properties: HashMap::default(),
            facility,
            severity,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

impl MessageContext for LogMessage {
    fn get_property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }

    fn get_facility_severity(&self) -> (u8, u8) {
        (self.facility, self.severity)
    }

    fn set_property(&mut self, name: &str, value: Value, force_reset: bool) {
        if !force_reset && self.properties.contains_key(name) {
            return;
        }
        self.properties.insert(name.to_string(), value);
    }

    fn unset_property(&mut self, name: &str) {
        self.properties.remove(name);
    }
}
