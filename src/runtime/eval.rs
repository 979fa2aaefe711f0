// src/runtime/eval.rs
//! Expression evaluator and statement interpreter.
//!
//! This is the HOT PATH: it runs once per message per worker thread
//! against a shared, read-only compiled AST. No AST or compiled-state
//! mutation happens here; all per-call scratch is stack- or heap-local
//! to the call.

use rand::Rng;

use crate::ast::{ArithOp, CompareOp, Expr, FuncCall, RulesetHandle, Stmt};
use crate::ast::PropOp;
use crate::functions::{CompiledState, FuncId, FIELD_NOT_FOUND, TABLE_NOT_FOUND};
use crate::host::{LookupKey, LookupKeyType, MessageContext};
use crate::primask::{facility_name, severity_name};
use crate::runtime::value::Value;

/// Outcome of walking a statement list, consumed by the external
/// execution driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// List ran to completion; keep processing the message.
    Continue,
    /// A `stop` statement fired; drop the message.
    Stop,
    /// A resolved `call` was reached; the driver runs the target ruleset.
    CallRuleset(RulesetHandle),
}

/// Name-to-handle resolution for indirect calls, implemented by the
/// compiled program. `()` resolves nothing.
pub trait RulesetDirectory {
    fn handle_for(&self, name: &str) -> Option<RulesetHandle>;
}

impl RulesetDirectory for () {
    fn handle_for(&self, _name: &str) -> Option<RulesetHandle> {
        None
    }
}

/// Evaluate an expression against the current message.
pub fn eval(expr: &Expr, ctx: &dyn MessageContext) -> Value {
    match expr {
        Expr::Number(n) => Value::Number(*n),
        // Literals embedded in the AST are borrowed; clone before the
        // value escapes the expression.
        Expr::String(s) => Value::Text(s.clone()),
        Expr::Array(items) => Value::Array(items.clone()),
        Expr::Var(name) => eval_var(name, ctx),
        Expr::Arith { op, left, right } => {
            let l = eval(left, ctx).as_number().unwrap_or(0);
            let r = eval(right, ctx).as_number().unwrap_or(0);
            Value::Number(arith(*op, l, r))
        }
        Expr::Concat(left, right) => {
            let l = eval(left, ctx);
            let r = eval(right, ctx);
            let mut out = l.as_text().into_owned();
            out.push_str(&r.as_text());
            Value::Text(out)
        }
        Expr::Neg(inner) => Value::Number(eval(inner, ctx).as_number().unwrap_or(0).wrapping_neg()),
        Expr::Not(inner) => Value::Number(i64::from(!eval(inner, ctx).as_bool())),
        Expr::And(left, right) => {
            // Short-circuit: the right side runs only when needed, because
            // side-effecting built-ins (dyn_inc) rely on it.
            let v = eval(left, ctx).as_bool() && eval(right, ctx).as_bool();
            Value::Number(i64::from(v))
        }
        Expr::Or(left, right) => {
            let v = eval(left, ctx).as_bool() || eval(right, ctx).as_bool();
            Value::Number(i64::from(v))
        }
        Expr::Compare { op, left, right } => eval_compare(*op, left, right, ctx),
        Expr::Call(call) => eval_call(call, ctx),
    }
}

/// Evaluate, then coerce to truthiness.
pub fn eval_bool(expr: &Expr, ctx: &dyn MessageContext) -> bool {
    eval(expr, ctx).as_bool()
}

/// Evaluate to a JSON collection for `foreach`; non-collection results
/// yield `None`.
pub fn eval_collection(expr: &Expr, ctx: &dyn MessageContext) -> Option<serde_json::Value> {
    match eval(expr, ctx) {
        Value::Json(j @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => Some(j),
        _ => None,
    }
}

fn eval_var(name: &str, ctx: &dyn MessageContext) -> Value {
    // The priority pseudo-variables come from the message header, not
    // the property store.
    match name {
        "syslogseverity" => {
            let (_, sev) = ctx.get_facility_severity();
            Value::Number(i64::from(sev))
        }
        "syslogfacility" => {
            let (fac, _) = ctx.get_facility_severity();
            Value::Number(i64::from(fac))
        }
        "syslogseverity-text" => {
            let (_, sev) = ctx.get_facility_severity();
            Value::Text(severity_name(sev).to_string())
        }
        "syslogfacility-text" => {
            let (fac, _) = ctx.get_facility_severity();
            Value::Text(facility_name(fac).to_string())
        }
        _ => ctx
            .get_property(name)
            .unwrap_or_else(|| Value::Text(String::new())),
    }
}

#[inline]
pub(crate) fn arith(op: ArithOp, l: i64, r: i64) -> i64 {
    match op {
        ArithOp::Add => l.wrapping_add(r),
        ArithOp::Sub => l.wrapping_sub(r),
        ArithOp::Mul => l.wrapping_mul(r),
        // Division/modulo by zero yields 0 by policy, not an error.
        ArithOp::Div => {
            if r == 0 {
                0
            } else {
                l.wrapping_div(r)
            }
        }
        ArithOp::Mod => {
            if r == 0 {
                0
            } else {
                l.wrapping_rem(r)
            }
        }
    }
}

// ---- comparison ------------------------------------------------------

/// Reduce a value to Number or Text so comparison dispatch has only two
/// shapes to consider. Json numbers/bools become numbers, everything
/// else becomes its text form.
fn primitive(v: Value) -> Value {
    match v {
        Value::Json(j) => match j {
            serde_json::Value::Number(_) | serde_json::Value::Bool(_) | serde_json::Value::Null => {
                Value::Number(Value::Json(j).as_number().unwrap_or(0))
            }
            other => Value::Text(Value::Json(other).as_text().into_owned()),
        },
        Value::Array(a) => Value::Text(a.into_iter().next().unwrap_or_default()),
        other => other,
    }
}

fn eval_compare(op: CompareOp, left: &Expr, right: &Expr, ctx: &dyn MessageContext) -> Value {
    // Array literals are only supported on the right-hand side; the
    // optimizer guarantees the swap and the EQ/NE sort.
    if let Expr::Array(items) = right {
        let lval = eval(left, ctx);
        let ltext = lval.as_text();
        return Value::Number(i64::from(array_compare(op, &ltext, items)));
    }

    let l = primitive(eval(left, ctx));
    let r = primitive(eval(right, ctx));

    let result = match op {
        CompareOp::Contains => l.as_text().contains(r.as_text().as_ref()),
        CompareOp::ContainsI => l
            .as_text()
            .to_lowercase()
            .contains(&r.as_text().to_lowercase()),
        CompareOp::StartsWith => l.as_text().starts_with(r.as_text().as_ref()),
        CompareOp::StartsWithI => l
            .as_text()
            .to_lowercase()
            .starts_with(&r.as_text().to_lowercase()),
        _ => ordered_compare(op, &l, &r),
    };
    Value::Number(i64::from(result))
}

/// Comparison dispatch driven by the left operand's runtime type.
///
/// When one side is a number and the other a string, the string side is
/// given a chance to parse as a number; if it cannot, the numeric side
/// is rendered to text and a byte-wise string compare decides. Which
/// side gets the parse attempt depends on which side is the string --
/// that asymmetry is part of the language.
fn ordered_compare(op: CompareOp, l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(ln), Value::Number(rn)) => num_cmp(op, *ln, *rn),
        (Value::Text(ls), Value::Text(rs)) => str_cmp(op, ls, rs),
        (Value::Text(ls), Value::Number(rn)) => match text_number(ls) {
            Some(ln) => num_cmp(op, ln, *rn),
            None => str_cmp(op, ls, &rn.to_string()),
        },
        (Value::Number(ln), Value::Text(rs)) => match text_number(rs) {
            Some(rn) => num_cmp(op, *ln, rn),
            None => str_cmp(op, &ln.to_string(), rs),
        },
        // primitive() leaves only Number and Text.
        _ => false,
    }
}

fn text_number(s: &str) -> Option<i64> {
    Value::Text(s.to_string()).as_number()
}

#[inline]
fn num_cmp(op: CompareOp, a: i64, b: i64) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        _ => false,
    }
}

#[inline]
fn str_cmp(op: CompareOp, a: &str, b: &str) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        _ => false,
    }
}

fn array_compare(op: CompareOp, subject: &str, items: &[String]) -> bool {
    match op {
        // EQ/NE arrays are pre-sorted by the optimizer.
        CompareOp::Eq => items.binary_search_by(|i| i.as_str().cmp(subject)).is_ok(),
        CompareOp::Ne => items.binary_search_by(|i| i.as_str().cmp(subject)).is_err(),
        CompareOp::Contains => items.iter().any(|i| subject.contains(i.as_str())),
        CompareOp::ContainsI => {
            let subject = subject.to_lowercase();
            items.iter().any(|i| subject.contains(&i.to_lowercase()))
        }
        CompareOp::StartsWith => items.iter().any(|i| subject.starts_with(i.as_str())),
        CompareOp::StartsWithI => {
            let subject = subject.to_lowercase();
            items.iter().any(|i| subject.starts_with(&i.to_lowercase()))
        }
        // Ordered operators have no array semantics; the array degrades
        // to its first element.
        _ => str_cmp(op, subject, items.first().map(String::as_str).unwrap_or("")),
    }
}

// ---- function calls --------------------------------------------------

fn eval_call(call: &FuncCall, ctx: &dyn MessageContext) -> Value {
    match call.id {
        FuncId::Strlen => Value::Number(arg_text(call, 0, ctx).len() as i64),
        FuncId::ToLower => Value::Text(arg_text(call, 0, ctx).to_lowercase()),
        FuncId::Cstr => Value::Text(arg_text(call, 0, ctx)),
        FuncId::Cnum => Value::Number(arg_num(call, 0, ctx)),
        FuncId::Getenv => {
            Value::Text(std::env::var(arg_text(call, 0, ctx)).unwrap_or_default())
        }
        FuncId::Replace => {
            let subject = arg_text(call, 0, ctx);
            let find = arg_text(call, 1, ctx);
            let repl = arg_text(call, 2, ctx);
            Value::Text(crate::functions::replace_literal(&subject, &find, &repl))
        }
        FuncId::Wrap => {
            let source = arg_text(call, 0, ctx);
            let wrapper = arg_text(call, 1, ctx);
            let escape = call.args.get(2).map(|e| eval(e, ctx).as_text().into_owned());
            Value::Text(crate::functions::wrap_text(
                &source,
                &wrapper,
                escape.as_deref(),
            ))
        }
        FuncId::Random => {
            let max = arg_num(call, 0, ctx);
            if max <= 0 {
                log::warn!("random(): bound {max} is not positive, returning 0");
                Value::Number(0)
            } else {
                Value::Number(rand::thread_rng().gen_range(0..max))
            }
        }
        FuncId::Field => {
            let subject = arg_text(call, 0, ctx);
            let delim = match call.args.get(1).map(|e| eval(e, ctx)) {
                // A numeric delimiter is a character code.
                Some(Value::Number(code)) => match u32::try_from(code).ok().and_then(char::from_u32)
                {
                    Some(c) => c.to_string(),
                    None => {
                        log::warn!("field(): invalid delimiter character code {code}");
                        return Value::Text(FIELD_NOT_FOUND.to_string());
                    }
                },
                Some(v) => v.as_text().into_owned(),
                None => String::new(),
            };
            let index = arg_num(call, 2, ctx);
            match crate::functions::extract_field(&subject, &delim, index) {
                Some(f) => Value::Text(f.to_string()),
                None => Value::Text(FIELD_NOT_FOUND.to_string()),
            }
        }
        FuncId::ReMatch => match &call.state {
            CompiledState::Regex(re) => {
                Value::Number(i64::from(re.is_match(&arg_text(call, 0, ctx))))
            }
            _ => Value::Number(0),
        },
        FuncId::ReExtract => {
            let found = match &call.state {
                CompiledState::Regex(re) => {
                    let subject = arg_text(call, 0, ctx);
                    let match_idx = arg_num(call, 2, ctx).max(0) as usize;
                    let submatch_idx = arg_num(call, 3, ctx).max(0) as usize;
                    re.captures_iter(&subject)
                        .nth(match_idx)
                        .and_then(|caps| caps.get(submatch_idx).map(|m| m.as_str().to_string()))
                }
                _ => None,
            };
            match found {
                Some(text) => Value::Text(text),
                // The default argument is evaluated lazily, only when
                // no match was found.
                None => match call.args.get(4) {
                    Some(default) => Value::Text(eval(default, ctx).as_text().into_owned()),
                    None => Value::Text(String::new()),
                },
            }
        }
        FuncId::PriFilt => match &call.state {
            CompiledState::Mask(mask) => {
                let (fac, sev) = ctx.get_facility_severity();
                Value::Number(i64::from(mask.matches(fac, sev)))
            }
            _ => Value::Number(0),
        },
        FuncId::Lookup => match &call.state {
            CompiledState::Table(Some(table)) => {
                let result = match table.key_type() {
                    LookupKeyType::Str => {
                        let key = arg_text(call, 1, ctx);
                        table.get(LookupKey::Str(&key))
                    }
                    LookupKeyType::Uint => {
                        let key = arg_num(call, 1, ctx).max(0) as u64;
                        table.get(LookupKey::Uint(key))
                    }
                };
                Value::Text(result.unwrap_or_default())
            }
            _ => Value::Text(TABLE_NOT_FOUND.to_string()),
        },
        FuncId::DynInc => match &call.state {
            CompiledState::Bucket(Some(bucket)) => {
                let key = arg_text(call, 1, ctx);
                Value::Number(bucket.increment(&key))
            }
            _ => Value::Number(-1),
        },
        FuncId::ExecTemplate => match &call.state {
            CompiledState::Template(Some(tpl)) => Value::Text(tpl.render(ctx)),
            _ => Value::Text(String::new()),
        },
    }
}

fn arg_text(call: &FuncCall, idx: usize, ctx: &dyn MessageContext) -> String {
    call.args
        .get(idx)
        .map(|e| eval(e, ctx).as_text().into_owned())
        .unwrap_or_default()
}

fn arg_num(call: &FuncCall, idx: usize, ctx: &dyn MessageContext) -> i64 {
    call.args
        .get(idx)
        .and_then(|e| eval(e, ctx).as_number())
        .unwrap_or(0)
}

// ---- statement interpretation ----------------------------------------

/// Walk a statement list. Returns as soon as a `stop` fires or a
/// resolved `call` hands control to another ruleset; the external driver
/// acts on the returned signal.
pub fn execute(
    stmts: &[Stmt],
    ctx: &mut dyn MessageContext,
    rulesets: &dyn RulesetDirectory,
) -> ControlSignal {
    for stmt in stmts {
        match stmt {
            Stmt::Nop => {}
            Stmt::Stop => return ControlSignal::Stop,
            Stmt::Call { target, resolved } => match resolved {
                Some(handle) => return ControlSignal::CallRuleset(*handle),
                None => log::warn!("call to unresolved ruleset '{target}' skipped"),
            },
            Stmt::CallIndirect(expr) => {
                let name = eval(expr, &*ctx).as_text().into_owned();
                match rulesets.handle_for(&name) {
                    Some(handle) => return ControlSignal::CallRuleset(handle),
                    None => log::warn!("indirect call: ruleset '{name}' does not exist"),
                }
            }
            Stmt::Action(action) => action.process(&*ctx),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let branch = if eval_bool(cond, &*ctx) {
                    then_branch
                } else {
                    else_branch
                };
                let signal = execute(branch, ctx, rulesets);
                if signal != ControlSignal::Continue {
                    return signal;
                }
            }
            Stmt::Foreach {
                var,
                collection,
                body,
            } => match eval_collection(collection, &*ctx) {
                Some(json) => {
                    let items: Vec<serde_json::Value> = match json {
                        serde_json::Value::Array(items) => items,
                        serde_json::Value::Object(map) => map
                            .into_iter()
                            .map(|(k, v)| serde_json::json!({ "key": k, "value": v }))
                            .collect(),
                        _ => Vec::new(),
                    };
                    for item in items {
                        ctx.set_property(var, Value::Json(item), true);
                        let signal = execute(body, ctx, rulesets);
                        if signal != ControlSignal::Continue {
                            return signal;
                        }
                    }
                }
                None => log::warn!("foreach: expression is not a collection, loop skipped"),
            },
            Stmt::Set {
                var,
                expr,
                force_reset,
            } => {
                let value = eval(expr, &*ctx);
                ctx.set_property(var, value, *force_reset);
            }
            Stmt::Unset { var } => ctx.unset_property(var),
            Stmt::PriFilter {
                mask,
                then_branch,
                else_branch,
            } => {
                let (fac, sev) = ctx.get_facility_severity();
                let branch = if mask.matches(fac, sev) {
                    then_branch
                } else {
                    else_branch
                };
                let signal = execute(branch, ctx, rulesets);
                if signal != ControlSignal::Continue {
                    return signal;
                }
            }
            Stmt::PropFilter {
                prop,
                op,
                negated,
                value,
                compiled,
                then_branch,
            } => {
                let pv = eval_var(prop, &*ctx);
                let ptext = pv.as_text();
                let mut hit = match op {
                    PropOp::Contains => ptext.contains(value.as_str()),
                    PropOp::IsEqual => ptext.as_ref() == value.as_str(),
                    PropOp::StartsWith => ptext.starts_with(value.as_str()),
                    // A filter whose regex failed to compile never fires.
                    PropOp::Regex => compiled.as_ref().is_some_and(|re| re.is_match(&ptext)),
                };
                if *negated {
                    hit = !hit;
                }
                if hit {
                    let signal = execute(then_branch, ctx, rulesets);
                    if signal != ControlSignal::Continue {
                        return signal;
                    }
                }
            }
            Stmt::ReloadLookupTable {
                table,
                stub_value,
                resolved,
            } => match resolved {
                Some(t) => t.reload(stub_value.as_deref()),
                None => log::warn!("cannot reload unknown lookup table '{table}'"),
            },
        }
    }
    ControlSignal::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{array, num, text, var};
    use crate::host::LogMessage;

    fn msg() -> LogMessage {
        LogMessage::new()
    }

    #[test]
    fn test_literals() {
        let m = msg();
        assert_eq!(eval(&num(42), &m), Value::Number(42));
        assert_eq!(eval(&text("hi"), &m), Value::Text("hi".into()));
    }

    #[test]
    fn test_variable_lookup_and_default() {
        let m = msg().with_property("msg", "hello");
        assert_eq!(eval(&var("msg"), &m), Value::Text("hello".into()));
        assert_eq!(eval(&var("nope"), &m), Value::Text(String::new()));
    }

    #[test]
    fn test_priority_pseudo_variables() {
        let m = LogMessage::with_pri(2, 3);
        assert_eq!(eval(&var("syslogseverity"), &m), Value::Number(3));
        assert_eq!(eval(&var("syslogfacility"), &m), Value::Number(2));
        assert_eq!(
            eval(&var("syslogseverity-text"), &m),
            Value::Text("err".into())
        );
        assert_eq!(
            eval(&var("syslogfacility-text"), &m),
            Value::Text("mail".into())
        );
    }

    #[test]
    fn test_arithmetic_and_division_by_zero() {
        let m = msg();
        assert_eq!(eval(&num(10).add(num(5)), &m), Value::Number(15));
        let div0 = Expr::Arith {
            op: ArithOp::Div,
            left: Box::new(num(7)),
            right: Box::new(num(0)),
        };
        assert_eq!(eval(&div0, &m), Value::Number(0));
        let mod0 = Expr::Arith {
            op: ArithOp::Mod,
            left: Box::new(num(7)),
            right: Box::new(num(0)),
        };
        assert_eq!(eval(&mod0, &m), Value::Number(0));
    }

    #[test]
    fn test_concat() {
        let m = msg().with_property("host", "web1");
        let e = text("host=").concat(var("host"));
        assert_eq!(eval(&e, &m), Value::Text("host=web1".into()));
        let e = num(4).concat(text("04"));
        assert_eq!(eval(&e, &m), Value::Text("404".into()));
    }

    #[test]
    fn test_short_circuit_and_or() {
        // The right side references an unset variable whose strict parse
        // fails; short-circuiting means it is never consulted.
        let m = msg().with_property("a", 0i64);
        let e = var("a").eq(num(1)).and(var("missing").eq(num(1)));
        assert_eq!(eval(&e, &m), Value::Number(0));
        let e = var("a").eq(num(0)).or(var("missing").eq(num(1)));
        assert_eq!(eval(&e, &m), Value::Number(1));
    }

    #[test]
    fn test_string_comparison() {
        let m = msg().with_property("s", "apple");
        assert_eq!(eval(&var("s").eq(text("apple")), &m), Value::Number(1));
        assert_eq!(eval(&var("s").lt(text("banana")), &m), Value::Number(1));
        assert_eq!(eval(&var("s").gt(text("banana")), &m), Value::Number(0));
    }

    #[test]
    fn test_numeric_string_cross_compare() {
        let m = msg().with_property("n", "42");
        // Text "42" parses, so the comparison is numeric.
        assert_eq!(eval(&var("n").eq(num(42)), &m), Value::Number(1));
        assert_eq!(eval(&var("n").gt(num(9)), &m), Value::Number(1));
    }

    #[test]
    fn test_number_vs_unparseable_text_falls_back_to_string() {
        let m = msg().with_property("n", 42i64);
        // "42x" cannot parse; the number side is rendered to text and a
        // byte-wise string compare decides: "42" < "42x".
        assert_eq!(eval(&var("n").lt(text("42x")), &m), Value::Number(1));
        assert_eq!(eval(&var("n").eq(text("42x")), &m), Value::Number(0));
    }

    #[test]
    fn test_contains_and_startswith() {
        let m = msg().with_property("msg", "Connection REFUSED by peer");
        assert_eq!(
            eval(&var("msg").contains(text("REFUSED")), &m),
            Value::Number(1)
        );
        assert_eq!(
            eval(&var("msg").compare(CompareOp::ContainsI, text("refused")), &m),
            Value::Number(1)
        );
        assert_eq!(
            eval(&var("msg").startswith(text("Connection")), &m),
            Value::Number(1)
        );
        assert_eq!(
            eval(&var("msg").compare(CompareOp::StartsWithI, text("CONNECTION")), &m),
            Value::Number(1)
        );
    }

    #[test]
    fn test_array_membership_sorted() {
        let m = msg().with_property("tag", "cron");
        // Sorted as the optimizer leaves it.
        let e = var("tag").eq(array(["auth", "cron", "mail"]));
        assert_eq!(eval(&e, &m), Value::Number(1));
        let e = var("tag").ne(array(["auth", "mail"]));
        assert_eq!(eval(&e, &m), Value::Number(1));
    }

    #[test]
    fn test_array_contains_linear() {
        let m = msg().with_property("msg", "fatal disk error on sda");
        let e = var("msg").contains(array(["oom", "disk error"]));
        assert_eq!(eval(&e, &m), Value::Number(1));
        let e = var("msg").startswith(array(["warn", "fatal"]));
        assert_eq!(eval(&e, &m), Value::Number(1));
    }

    #[test]
    fn test_not_and_neg() {
        let m = msg();
        assert_eq!(eval(&num(0).negate(), &m), Value::Number(1));
        assert_eq!(eval(&num(3).negate(), &m), Value::Number(0));
        assert_eq!(eval(&Expr::Neg(Box::new(num(5))), &m), Value::Number(-5));
    }

    #[test]
    fn test_eval_collection() {
        let m = msg()
            .with_property("list", serde_json::json!([1, 2]))
            .with_property("scalar", 7i64);
        assert!(eval_collection(&var("list"), &m).is_some());
        assert!(eval_collection(&var("scalar"), &m).is_none());
        assert!(eval_collection(&num(1), &m).is_none());
    }

    #[test]
    fn test_execute_if_and_set() {
        let mut m = msg().with_property("sev", 2i64);
        let stmts = vec![Stmt::If {
            cond: var("sev").le(num(3)),
            then_branch: vec![Stmt::Set {
                var: "alerted".into(),
                expr: num(1),
                force_reset: true,
            }],
            else_branch: vec![],
        }];
        assert_eq!(execute(&stmts, &mut m, &()), ControlSignal::Continue);
        assert_eq!(m.property("alerted"), Some(&Value::Number(1)));
    }

    #[test]
    fn test_execute_stop_propagates_from_branch() {
        let mut m = msg();
        let stmts = vec![
            Stmt::If {
                cond: num(1),
                then_branch: vec![Stmt::Stop],
                else_branch: vec![],
            },
            Stmt::Set {
                var: "after".into(),
                expr: num(1),
                force_reset: true,
            },
        ];
        assert_eq!(execute(&stmts, &mut m, &()), ControlSignal::Stop);
        assert_eq!(m.property("after"), None);
    }

    #[test]
    fn test_execute_foreach_array() {
        let mut m = msg().with_property("items", serde_json::json!(["a", "b", "c"]));
        let stmts = vec![Stmt::Foreach {
            var: "item".into(),
            collection: var("items"),
            body: vec![Stmt::Set {
                var: "count".into(),
                expr: var("count").add(num(1)),
                force_reset: true,
            }],
        }];
        execute(&stmts, &mut m, &());
        assert_eq!(m.property("count"), Some(&Value::Number(3)));
        // Loop variable holds the last element.
        assert_eq!(
            m.property("item"),
            Some(&Value::Json(serde_json::json!("c")))
        );
    }

    #[test]
    fn test_execute_foreach_object_and_stop() {
        let mut m = msg().with_property("obj", serde_json::json!({"a": 1, "b": 2}));
        let stmts = vec![Stmt::Foreach {
            var: "pair".into(),
            collection: var("obj"),
            body: vec![Stmt::Stop],
        }];
        assert_eq!(execute(&stmts, &mut m, &()), ControlSignal::Stop);
    }

    #[test]
    fn test_execute_prifilter_branches() {
        let mut m = LogMessage::with_pri(2, 3);
        let mut mask = crate::primask::PriMask::never();
        mask.set_severity(3, CompareOp::Eq);
        let stmts = vec![Stmt::PriFilter {
            mask,
            then_branch: vec![Stmt::Set {
                var: "hit".into(),
                expr: num(1),
                force_reset: true,
            }],
            else_branch: vec![Stmt::Set {
                var: "hit".into(),
                expr: num(0),
                force_reset: true,
            }],
        }];
        execute(&stmts, &mut m, &());
        assert_eq!(m.property("hit"), Some(&Value::Number(1)));
    }

    #[test]
    fn test_execute_propfilter() {
        let mut m = msg().with_property("programname", "sshd");
        let stmts = vec![Stmt::PropFilter {
            prop: "programname".into(),
            op: PropOp::IsEqual,
            negated: false,
            value: "sshd".into(),
            compiled: None,
            then_branch: vec![Stmt::Set {
                var: "ssh".into(),
                expr: num(1),
                force_reset: true,
            }],
        }];
        execute(&stmts, &mut m, &());
        assert_eq!(m.property("ssh"), Some(&Value::Number(1)));
    }

    #[test]
    fn test_execute_propfilter_negated() {
        let mut m = msg().with_property("programname", "cron");
        let stmts = vec![Stmt::PropFilter {
            prop: "programname".into(),
            op: PropOp::StartsWith,
            negated: true,
            value: "ssh".into(),
            compiled: None,
            then_branch: vec![Stmt::Set {
                var: "other".into(),
                expr: num(1),
                force_reset: true,
            }],
        }];
        execute(&stmts, &mut m, &());
        assert_eq!(m.property("other"), Some(&Value::Number(1)));
    }

    #[test]
    fn test_execute_call_returns_handle() {
        let mut m = msg();
        let stmts = vec![Stmt::Call {
            target: "forward".into(),
            resolved: Some(RulesetHandle(3)),
        }];
        assert_eq!(
            execute(&stmts, &mut m, &()),
            ControlSignal::CallRuleset(RulesetHandle(3))
        );
    }

    #[test]
    fn test_execute_unresolved_indirect_call_continues() {
        let mut m = msg();
        let stmts = vec![
            Stmt::CallIndirect(text("ghost")),
            Stmt::Set {
                var: "after".into(),
                expr: num(1),
                force_reset: true,
            },
        ];
        assert_eq!(execute(&stmts, &mut m, &()), ControlSignal::Continue);
        assert_eq!(m.property("after"), Some(&Value::Number(1)));
    }
}
