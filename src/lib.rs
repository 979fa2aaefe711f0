//! logscript: the filter/expression engine for a syslog-style message
//! pipeline.
//!
//! An external config parser builds [`Expr`]/[`Stmt`] trees and hands
//! them to [`Program::compile`], which runs the optimizer (constant
//! folding, priority-mask specialization, array sorting, call
//! resolution) and compiles per-call function state (regexes, selector
//! masks, lookup-table bindings). The compiled [`Program`] is immutable
//! and is shared read-only across worker threads, each of which drives
//! it against its own messages.
//!
//! # Example
//!
//! ```
//! use logscript::{
//!     num, text, var, ControlSignal, LogMessage, NullResolver, Program, Ruleset, Stmt, Value,
//! };
//!
//! let rules = vec![Ruleset {
//!     name: "main".into(),
//!     stmts: vec![Stmt::If {
//!         cond: var("msg").contains(text("error")),
//!         then_branch: vec![Stmt::Set {
//!             var: "flagged".into(),
//!             expr: num(1),
//!             force_reset: true,
//!         }],
//!         else_branch: vec![],
//!     }],
//! }];
//!
//! let (program, diags) = Program::compile(rules, &NullResolver).unwrap();
//! assert!(diags.is_empty());
//!
//! let mut msg = LogMessage::new().with_property("msg", "disk error on sda");
//! let entry = program.handle("main").unwrap();
//! assert_eq!(program.run(entry, &mut msg), ControlSignal::Continue);
//! assert_eq!(msg.property("flagged"), Some(&Value::Number(1)));
//! ```

pub mod ast;
pub mod compiler;
pub mod functions;
pub mod host;
pub mod primask;
pub mod runtime;

use std::fmt;

use ahash::HashMap;

pub use ast::{
    array, call, num, text, var, ArithOp, CompareOp, Expr, FuncCall, PropOp, RulesetHandle, Stmt,
};
pub use compiler::CompileError;
pub use functions::{FuncId, RegistryError, FIELD_NOT_FOUND, TABLE_NOT_FOUND};
pub use host::{
    HostResolver, LogMessage, LookupKey, LookupKeyType, LookupTable, MessageAction,
    MessageContext, NullResolver, StatsBucket, Template,
};
pub use primask::{MaskCombine, PriMask};
pub use runtime::{eval, eval_bool, execute, ControlSignal, RulesetDirectory, Value};

use compiler::optimizer::{self, OptimizeCtx};

/// Non-fatal condition reported during compilation. The affected
/// construct is degraded (never-matching mask, disabled function,
/// stripped call) and loading continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
}

impl Diagnostic {
    pub fn new(message: String) -> Self {
        Diagnostic { message }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A named statement list, the unit `call` targets.
#[derive(Debug, Clone)]
pub struct Ruleset {
    pub name: String,
    pub stmts: Vec<Stmt>,
}

/// A fully compiled rule program. Immutable after `compile`; wrap it in
/// an `Arc` to share across worker threads.
#[derive(Debug)]
pub struct Program {
    rulesets: Vec<Ruleset>,
    index: HashMap<String, RulesetHandle>,
}

// Hops to follow in `run` before assuming the call graph loops.
const MAX_CALL_DEPTH: usize = 64;

impl Program {
    /// Optimize and link a set of rulesets. The handle table is built
    /// up front so calls may reference rulesets defined later.
    ///
    /// Fatal config errors abort compilation; everything recoverable
    /// comes back as diagnostics next to a still-usable program.
    pub fn compile(
        rulesets: Vec<Ruleset>,
        resolver: &dyn HostResolver,
    ) -> Result<(Program, Vec<Diagnostic>), CompileError> {
        let mut index = HashMap::default();
        for (i, ruleset) in rulesets.iter().enumerate() {
            if index
                .insert(ruleset.name.clone(), RulesetHandle(i))
                .is_some()
            {
                return Err(CompileError::DuplicateRuleset(ruleset.name.clone()));
            }
        }

        let mut diags = Vec::new();
        let mut compiled = Vec::with_capacity(rulesets.len());
        for ruleset in rulesets {
            let mut cx = OptimizeCtx {
                resolver,
                rulesets: &index,
                diags: &mut diags,
            };
            let stmts = optimizer::optimize_stmts(ruleset.stmts, &mut cx)?;
            compiled.push(Ruleset {
                name: ruleset.name,
                stmts,
            });
        }
        Ok((
            Program {
                rulesets: compiled,
                index,
            },
            diags,
        ))
    }

    pub fn handle(&self, name: &str) -> Option<RulesetHandle> {
        self.index.get(name).copied()
    }

    pub fn ruleset(&self, handle: RulesetHandle) -> Option<&Ruleset> {
        self.rulesets.get(handle.0)
    }

    /// Run a single ruleset. A `CallRuleset` result hands the next hop
    /// back to the caller; use [`Program::run`] to have the chain
    /// followed automatically.
    pub fn execute(&self, handle: RulesetHandle, ctx: &mut dyn MessageContext) -> ControlSignal {
        match self.ruleset(handle) {
            Some(ruleset) => execute(&ruleset.stmts, ctx, self),
            None => ControlSignal::Continue,
        }
    }

    /// Run a ruleset and follow `call` transfers until the message is
    /// accepted or stopped. The hop cap guards against call cycles,
    /// which the optimizer cannot rule out for indirect calls.
    pub fn run(&self, entry: RulesetHandle, ctx: &mut dyn MessageContext) -> ControlSignal {
        let mut handle = entry;
        for _ in 0..MAX_CALL_DEPTH {
            match self.execute(handle, ctx) {
                ControlSignal::CallRuleset(next) => handle = next,
                signal => return signal,
            }
        }
        log::warn!("ruleset call chain exceeded {MAX_CALL_DEPTH} hops, stopping traversal");
        ControlSignal::Continue
    }
}

impl RulesetDirectory for Program {
    fn handle_for(&self, name: &str) -> Option<RulesetHandle> {
        self.handle(name)
    }
}
