// src/compiler/optimizer.rs
//! AST rewrite pass run once at config load.
//!
//! Works bottom-up: children are rewritten before their parent, so a
//! parent rule always sees fully-optimized operands. Every rewrite
//! preserves the observable evaluation semantics, with one deliberate
//! exception: a numeric comparison against the severity or facility
//! pseudo-variable is specialized into a priority-mask test, which is
//! why those comparisons reject out-of-range literals at load time
//! instead of silently never matching.

use ahash::HashMap;

use crate::ast::{CompareOp, Expr, FuncCall, RulesetHandle, Stmt};
use crate::functions;
use crate::host::HostResolver;
use crate::primask::{self, MaskCombine, PriMask, NUM_FACILITIES};
use crate::runtime::eval::arith;
use crate::runtime::value::Value;
use crate::Diagnostic;

use super::CompileError;

/// Shared state for one optimization run over a program.
pub(crate) struct OptimizeCtx<'a> {
    pub resolver: &'a dyn HostResolver,
    /// Ruleset name -> handle, built before any body is optimized so
    /// forward references resolve.
    pub rulesets: &'a HashMap<String, RulesetHandle>,
    pub diags: &'a mut Vec<Diagnostic>,
}

/// Rewrite an expression tree. Takes and returns by value; the caller
/// replaces its node with the result.
pub(crate) fn optimize_expr(expr: Expr, cx: &mut OptimizeCtx<'_>) -> Expr {
    match expr {
        Expr::Number(_) | Expr::String(_) | Expr::Array(_) | Expr::Var(_) => expr,
        Expr::Arith { op, left, right } => {
            let left = optimize_expr(*left, cx);
            let right = optimize_expr(*right, cx);
            if let (Some(l), Some(r)) = (literal_number(&left), literal_number(&right)) {
                // Folding uses the exact runtime semantics, including
                // division by zero yielding 0.
                Expr::Number(arith(op, l, r))
            } else {
                Expr::Arith {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        }
        Expr::Concat(left, right) => {
            let left = optimize_expr(*left, cx);
            let right = optimize_expr(*right, cx);
            match (literal_text(&left), literal_text(&right)) {
                (Some(l), Some(r)) => Expr::String(l + &r),
                _ => Expr::Concat(Box::new(left), Box::new(right)),
            }
        }
        Expr::Neg(inner) => {
            let inner = optimize_expr(*inner, cx);
            match literal_number(&inner) {
                Some(n) => Expr::Number(n.wrapping_neg()),
                None => Expr::Neg(Box::new(inner)),
            }
        }
        Expr::Not(inner) => {
            let inner = optimize_expr(*inner, cx);
            // NOT over a priority filter flips the mask instead of
            // surviving as a runtime negation.
            if let Some(mask) = inner.prifilt_mask() {
                let mut mask = *mask;
                mask.invert();
                return Expr::Call(FuncCall::prifilt(mask));
            }
            match literal_bool(&inner) {
                Some(b) => Expr::Number(i64::from(!b)),
                None => Expr::Not(Box::new(inner)),
            }
        }
        Expr::And(left, right) => {
            let left = optimize_expr(*left, cx);
            let right = optimize_expr(*right, cx);
            fuse_masks(left, right, MaskCombine::And)
        }
        Expr::Or(left, right) => {
            let left = optimize_expr(*left, cx);
            let right = optimize_expr(*right, cx);
            fuse_masks(left, right, MaskCombine::Or)
        }
        Expr::Compare { op, left, right } => {
            let left = optimize_expr(*left, cx);
            let right = optimize_expr(*right, cx);
            optimize_compare(op, left, right, cx)
        }
        Expr::Call(mut call) => {
            call.args = call
                .args
                .into_iter()
                .map(|a| optimize_expr(a, cx))
                .collect();
            functions::init(&mut call, cx.resolver, cx.diags);
            Expr::Call(call)
        }
    }
}

fn fuse_masks(left: Expr, right: Expr, op: MaskCombine) -> Expr {
    if let (Some(l), Some(r)) = (left.prifilt_mask(), right.prifilt_mask()) {
        let mut mask = *l;
        mask.combine(r, op);
        return Expr::Call(FuncCall::prifilt(mask));
    }
    match op {
        MaskCombine::And => Expr::And(Box::new(left), Box::new(right)),
        MaskCombine::Or => Expr::Or(Box::new(left), Box::new(right)),
    }
}

fn optimize_compare(op: CompareOp, mut left: Expr, mut right: Expr, cx: &mut OptimizeCtx<'_>) -> Expr {
    // Pseudo-variable compares become mask tests.
    if let Some(specialized) = specialize_pri_compare(op, &left, &right, cx) {
        return specialized;
    }

    // Array literals belong on the right. EQ and NE are symmetric so
    // the operands can simply swap; for the other operators an
    // array-on-the-left has no defined meaning and stays put.
    if matches!(left, Expr::Array(_)) && !matches!(right, Expr::Array(_)) {
        if matches!(op, CompareOp::Eq | CompareOp::Ne) {
            std::mem::swap(&mut left, &mut right);
        } else {
            cx.diags.push(Diagnostic::new(format!(
                "array literal on the left of a {op:?} comparison is not supported"
            )));
        }
    }
    if let Expr::Array(items) = &mut right {
        if matches!(left, Expr::Array(_)) {
            cx.diags.push(Diagnostic::new(
                "comparing two array literals is not supported".to_string(),
            ));
        }
        // Membership tests binary-search the items at runtime.
        if matches!(op, CompareOp::Eq | CompareOp::Ne) {
            items.sort_unstable();
        }
    }
    Expr::Compare {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Try to rewrite `syslogseverity`/`syslogfacility` comparisons against
/// a literal into a compiled priority mask.
fn specialize_pri_compare(
    op: CompareOp,
    left: &Expr,
    right: &Expr,
    cx: &mut OptimizeCtx<'_>,
) -> Option<Expr> {
    if !op.is_ordering() {
        return None;
    }
    let Expr::Var(name) = left else {
        return None;
    };
    let mut mask = PriMask::never();
    match name.as_str() {
        "syslogseverity" => {
            let code = literal_number(right)?;
            if !(0..=7).contains(&code) {
                cx.diags.push(Diagnostic::new(format!(
                    "severity {code} is out of range 0..=7, filter can never match"
                )));
            } else {
                mask.set_severity(code as u8, op);
            }
        }
        "syslogseverity-text" => {
            let text = literal_text(right)?;
            match primask::severity_from_name(&text) {
                Some(code) => mask.set_severity(code, op),
                None => cx.diags.push(Diagnostic::new(format!(
                    "unknown severity name '{text}', filter can never match"
                ))),
            }
        }
        "syslogfacility" => {
            let code = literal_number(right)?;
            if !(0..NUM_FACILITIES as i64).contains(&code) {
                cx.diags.push(Diagnostic::new(format!(
                    "facility {code} is out of range 0..{NUM_FACILITIES}, filter can never match"
                )));
            } else {
                mask.set_facility(code as u8, op);
            }
        }
        "syslogfacility-text" => {
            let text = literal_text(right)?;
            match primask::facility_from_name(&text) {
                Some(code) => mask.set_facility(code, op),
                None => cx.diags.push(Diagnostic::new(format!(
                    "unknown facility name '{text}', filter can never match"
                ))),
            }
        }
        _ => return None,
    }
    Some(Expr::Call(FuncCall::prifilt(mask)))
}

fn literal_number(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Number(n) => Some(*n),
        _ => None,
    }
}

fn literal_text(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Number(n) => Some(n.to_string()),
        Expr::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn literal_bool(expr: &Expr) -> Option<bool> {
    match expr {
        Expr::Number(n) => Some(*n != 0),
        Expr::String(s) => Some(Value::Text(s.clone()).as_bool()),
        _ => None,
    }
}

/// Rewrite a statement list: strips no-ops, collapses mask-only `if`s
/// into priority filters, splices always-true filters, and resolves
/// calls and lookup-table references.
pub(crate) fn optimize_stmts(
    stmts: Vec<Stmt>,
    cx: &mut OptimizeCtx<'_>,
) -> Result<Vec<Stmt>, CompileError> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        match optimize_stmt(stmt, cx)? {
            Stmt::Nop => {}
            Stmt::PriFilter {
                mask,
                then_branch,
                else_branch,
            } if mask.is_always() => {
                // A filter that matches everything is pure overhead, so
                // its body is spliced into the surrounding list. An else
                // branch under it can never run; that is a config bug,
                // not something to silently drop.
                if !else_branch.is_empty() {
                    return Err(CompileError::DeadElseBranch);
                }
                out.extend(then_branch);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn optimize_stmt(stmt: Stmt, cx: &mut OptimizeCtx<'_>) -> Result<Stmt, CompileError> {
    Ok(match stmt {
        Stmt::Nop | Stmt::Stop | Stmt::Unset { .. } => stmt,
        Stmt::Call { target, .. } => match cx.rulesets.get(&target) {
            Some(handle) => Stmt::Call {
                target,
                resolved: Some(*handle),
            },
            None => {
                cx.diags.push(Diagnostic::new(format!(
                    "call to undefined ruleset '{target}' removed"
                )));
                Stmt::Nop
            }
        },
        Stmt::CallIndirect(expr) => Stmt::CallIndirect(optimize_expr(expr, cx)),
        Stmt::Action(_) => stmt,
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = optimize_expr(cond, cx);
            let then_branch = optimize_stmts(then_branch, cx)?;
            let else_branch = optimize_stmts(else_branch, cx)?;
            // A condition that collapsed to a mask runs as a direct
            // priority test, skipping expression evaluation entirely.
            if let Some(mask) = cond.prifilt_mask() {
                Stmt::PriFilter {
                    mask: *mask,
                    then_branch,
                    else_branch,
                }
            } else {
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
        }
        Stmt::Foreach {
            var,
            collection,
            body,
        } => Stmt::Foreach {
            var,
            collection: optimize_expr(collection, cx),
            body: optimize_stmts(body, cx)?,
        },
        Stmt::Set {
            var,
            expr,
            force_reset,
        } => Stmt::Set {
            var,
            expr: optimize_expr(expr, cx),
            force_reset,
        },
        Stmt::PriFilter {
            mask,
            then_branch,
            else_branch,
        } => Stmt::PriFilter {
            mask,
            then_branch: optimize_stmts(then_branch, cx)?,
            else_branch: optimize_stmts(else_branch, cx)?,
        },
        Stmt::PropFilter {
            prop,
            op,
            negated,
            value,
            compiled,
            then_branch,
        } => {
            let compiled = match (op, compiled) {
                (crate::ast::PropOp::Regex, None) => match regex::Regex::new(&value) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        cx.diags.push(Diagnostic::new(format!(
                            "property filter regex '{value}' failed to compile: {e}"
                        )));
                        None
                    }
                },
                (_, compiled) => compiled,
            };
            Stmt::PropFilter {
                prop,
                op,
                negated,
                value,
                compiled,
                then_branch: optimize_stmts(then_branch, cx)?,
            }
        }
        Stmt::ReloadLookupTable {
            table, stub_value, ..
        } => {
            let resolved = cx.resolver.resolve_table(&table);
            if resolved.is_none() {
                cx.diags.push(Diagnostic::new(format!(
                    "reload references unknown lookup table '{table}'"
                )));
            }
            Stmt::ReloadLookupTable {
                table,
                stub_value,
                resolved,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{array, num, text, var, FuncCall};
    use crate::host::NullResolver;

    fn run_expr(e: Expr) -> (Expr, Vec<Diagnostic>) {
        let rulesets = HashMap::default();
        let mut diags = Vec::new();
        let mut cx = OptimizeCtx {
            resolver: &NullResolver,
            rulesets: &rulesets,
            diags: &mut diags,
        };
        (optimize_expr(e, &mut cx), diags)
    }

    fn run_stmts(s: Vec<Stmt>) -> Result<(Vec<Stmt>, Vec<Diagnostic>), CompileError> {
        let mut rulesets = HashMap::default();
        rulesets.insert("known".to_string(), RulesetHandle(1));
        let mut diags = Vec::new();
        let mut cx = OptimizeCtx {
            resolver: &NullResolver,
            rulesets: &rulesets,
            diags: &mut diags,
        };
        let out = optimize_stmts(s, &mut cx)?;
        Ok((out, diags))
    }

    #[test]
    fn test_constant_folding() {
        let (e, _) = run_expr(num(2).add(num(3)).add(num(4)));
        assert_eq!(e, Expr::Number(9));
        let (e, _) = run_expr(Expr::Arith {
            op: crate::ast::ArithOp::Div,
            left: Box::new(num(9)),
            right: Box::new(num(0)),
        });
        assert_eq!(e, Expr::Number(0));
        let (e, _) = run_expr(text("a").concat(text("b")));
        assert_eq!(e, Expr::String("ab".into()));
        let (e, _) = run_expr(num(1).negate());
        assert_eq!(e, Expr::Number(0));
    }

    #[test]
    fn test_non_literal_survives() {
        let (e, _) = run_expr(var("x").add(num(1)));
        assert!(matches!(e, Expr::Arith { .. }));
    }

    #[test]
    fn test_array_swap_and_sort() {
        let (e, _) = run_expr(array(["zz", "aa", "mm"]).eq(var("tag")));
        match e {
            Expr::Compare { op, left, right } => {
                assert_eq!(op, CompareOp::Eq);
                assert_eq!(*left, Expr::Var("tag".into()));
                assert_eq!(*right, Expr::Array(vec!["aa".into(), "mm".into(), "zz".into()]));
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_contains_array_not_sorted() {
        let (e, _) = run_expr(var("msg").contains(array(["zz", "aa"])));
        match e {
            Expr::Compare { right, .. } => {
                assert_eq!(*right, Expr::Array(vec!["zz".into(), "aa".into()]));
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_severity_compare_becomes_mask() {
        let (e, diags) = run_expr(var("syslogseverity").le(num(3)));
        let mask = e.prifilt_mask().expect("expected a mask call");
        assert!(mask.matches(0, 3));
        assert!(!mask.matches(0, 4));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_severity_text_compare_becomes_mask() {
        let (e, _) = run_expr(var("syslogseverity-text").eq(text("err")));
        let mask = e.prifilt_mask().expect("expected a mask call");
        assert!(mask.matches(5, 3));
        assert!(!mask.matches(5, 6));
    }

    #[test]
    fn test_out_of_range_severity_diagnosed() {
        let (e, diags) = run_expr(var("syslogseverity").eq(num(99)));
        let mask = e.prifilt_mask().expect("expected a mask call");
        assert!(!mask.matches(0, 0));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_facility_compare_becomes_mask() {
        let (e, _) = run_expr(var("syslogfacility").eq(num(2)));
        let mask = e.prifilt_mask().expect("expected a mask call");
        assert!(mask.matches(2, 6));
        assert!(!mask.matches(3, 6));
    }

    #[test]
    fn test_not_inverts_mask() {
        let (e, _) = run_expr(var("syslogseverity").eq(num(3)).negate());
        let mask = e.prifilt_mask().expect("expected a mask call");
        assert!(!mask.matches(0, 3));
        assert!(mask.matches(0, 4));
    }

    #[test]
    fn test_and_or_fuse_masks() {
        let sev = var("syslogseverity").le(num(3));
        let fac = var("syslogfacility").eq(num(2));
        let (e, _) = run_expr(sev.clone().and(fac.clone()));
        let mask = e.prifilt_mask().expect("expected a fused mask");
        assert!(mask.matches(2, 3));
        assert!(!mask.matches(3, 3));
        assert!(!mask.matches(2, 4));

        let (e, _) = run_expr(sev.or(fac));
        let mask = e.prifilt_mask().expect("expected a fused mask");
        assert!(mask.matches(3, 3));
        assert!(mask.matches(2, 7));
    }

    #[test]
    fn test_mixed_and_stays_runtime() {
        let (e, _) = run_expr(var("syslogseverity").le(num(3)).and(var("msg").contains(text("x"))));
        assert!(matches!(e, Expr::And(_, _)));
    }

    #[test]
    fn test_prifilt_call_compiles_selector() {
        let call = Expr::Call(FuncCall::new(
            crate::functions::FuncId::PriFilt,
            vec![text("mail.err")],
        ));
        let (e, diags) = run_expr(call);
        let mask = e.prifilt_mask().expect("selector should compile to a mask");
        assert!(mask.matches(2, 3));
        assert!(!mask.matches(2, 4));
        assert!(!mask.matches(3, 3));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_if_collapses_to_prifilter() {
        let stmts = vec![Stmt::If {
            cond: var("syslogseverity").le(num(3)),
            then_branch: vec![Stmt::Stop],
            else_branch: vec![],
        }];
        let (out, _) = run_stmts(stmts).unwrap();
        assert!(matches!(out[0], Stmt::PriFilter { .. }));
    }

    #[test]
    fn test_always_true_filter_spliced() {
        let stmts = vec![Stmt::PriFilter {
            mask: PriMask::always(),
            then_branch: vec![Stmt::Stop],
            else_branch: vec![],
        }];
        let (out, _) = run_stmts(stmts).unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Stmt::Stop));
    }

    #[test]
    fn test_always_true_filter_with_else_is_fatal() {
        let stmts = vec![Stmt::PriFilter {
            mask: PriMask::always(),
            then_branch: vec![],
            else_branch: vec![Stmt::Stop],
        }];
        assert!(matches!(run_stmts(stmts), Err(CompileError::DeadElseBranch)));
    }

    #[test]
    fn test_call_resolution() {
        let stmts = vec![
            Stmt::Call {
                target: "known".into(),
                resolved: None,
            },
            Stmt::Call {
                target: "ghost".into(),
                resolved: None,
            },
        ];
        let (out, diags) = run_stmts(stmts).unwrap();
        // The unresolved call degrades to a stripped no-op.
        assert_eq!(out.len(), 1);
        assert!(matches!(
            out[0],
            Stmt::Call {
                resolved: Some(RulesetHandle(1)),
                ..
            }
        ));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_propfilter_regex_compiled() {
        let stmts = vec![Stmt::PropFilter {
            prop: "msg".into(),
            op: crate::ast::PropOp::Regex,
            negated: false,
            value: "ab+c".into(),
            compiled: None,
            then_branch: vec![],
        }];
        let (out, diags) = run_stmts(stmts).unwrap();
        match &out[0] {
            Stmt::PropFilter { compiled, .. } => assert!(compiled.is_some()),
            other => panic!("unexpected statement: {other:?}"),
        }
        assert!(diags.is_empty());
    }

    #[test]
    fn test_propfilter_bad_regex_diagnosed() {
        let stmts = vec![Stmt::PropFilter {
            prop: "msg".into(),
            op: crate::ast::PropOp::Regex,
            negated: false,
            value: "(".into(),
            compiled: None,
            then_branch: vec![],
        }];
        let (out, diags) = run_stmts(stmts).unwrap();
        match &out[0] {
            Stmt::PropFilter { compiled, .. } => assert!(compiled.is_none()),
            other => panic!("unexpected statement: {other:?}"),
        }
        assert_eq!(diags.len(), 1);
    }
}
