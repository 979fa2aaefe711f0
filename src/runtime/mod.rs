// src/runtime/mod.rs
//! Per-message evaluation: values, expression evaluation and statement
//! interpretation.

pub mod eval;
pub mod value;

pub use eval::{eval, eval_bool, execute, ControlSignal, RulesetDirectory};
pub use value::Value;
