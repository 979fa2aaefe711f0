// src/compiler/mod.rs
//! Load-time compilation: optimization, call resolution and function
//! state construction. Entry point is [`crate::Program::compile`].

pub(crate) mod optimizer;

use thiserror::Error;

/// Fatal configuration errors. Everything recoverable is reported as a
/// [`crate::Diagnostic`] instead and the program still loads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// An always-true priority filter carries an else branch that could
    /// never run. Silently dropping it would hide a config bug.
    #[error("priority filter is always true but an else branch exists")]
    DeadElseBranch,
    /// Two rulesets share a name; call resolution would be ambiguous.
    #[error("duplicate ruleset name '{0}'")]
    DuplicateRuleset(String),
}
