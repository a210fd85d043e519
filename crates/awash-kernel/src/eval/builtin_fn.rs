//! Builtin callables.
//!
//! The full builtin library is out of scope for the runtime; what lives
//! here is the minimal set the evaluator itself leans on — value
//! output, failure and flow control, small arithmetic, `cd` — plus the
//! seed values of the builtin namespace (`$true`, `$ok`, `$pid`,
//! `$pwd`). Everything else is an opaque callable as far as the
//! evaluator is concerned.

use std::sync::Arc;

use futures::future::BoxFuture;

use super::callable::{BuiltinFn, Opts};
use super::exc::Exception;
use super::exitus::{Exitus, FlowKind};
use super::frame::Frame;
use super::pwd::{chdir, AddDirer, PwdVar};
use super::value::{Value, FN_SUFFIX};
use super::vartypes::{ro_var, Ns};
use super::EvalResult;

/// Build the builtin namespace: functions under `name~` plus the seed
/// values.
pub fn make_builtin_ns(store: Arc<dyn AddDirer>) -> Ns {
    let ns = Ns::new();
    for b in builtin_fns() {
        ns.set(
            format!("{}{}", b.name, FN_SUFFIX),
            ro_var(Value::Fn(super::value::FnValue::Builtin(Arc::new(b)))),
        );
    }
    ns.set("true", ro_var(Value::Bool(true)));
    ns.set("false", ro_var(Value::Bool(false)));
    ns.set("ok", ro_var(Value::Exitus(Exitus::Ok)));
    ns.set("pid", ro_var(Value::str(std::process::id().to_string())));
    ns.set("pwd", Arc::new(PwdVar::new(store)));
    ns
}

fn builtin_fns() -> Vec<BuiltinFn> {
    vec![
        BuiltinFn::new("nop", nop),
        BuiltinFn::new("put", put),
        BuiltinFn::new("print", print),
        BuiltinFn::new("echo", echo),
        BuiltinFn::new("fail", fail),
        BuiltinFn::new("return", flow_return),
        BuiltinFn::new("break", flow_break),
        BuiltinFn::new("continue", flow_continue),
        BuiltinFn::new("+", add),
        BuiltinFn::new("-", sub),
        BuiltinFn::new("*", mul),
        BuiltinFn::new("/", div),
        BuiltinFn::new("==", eq),
        BuiltinFn::new("all", all),
        BuiltinFn::new("count", count),
        BuiltinFn::new("bool", to_bool),
        BuiltinFn::new("cd", cd),
    ]
}

/// The placeholder bound by `fn` before the closure is built; never
/// meant to be called.
pub fn nop_builtin() -> Arc<BuiltinFn> {
    Arc::new(BuiltinFn::new("nop", nop))
}

fn nop(_fm: &mut Frame, _args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move { Ok(()) })
}

fn put(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        for v in args {
            fm.output(v).await;
        }
        Ok(())
    })
}

fn print(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let line = join_args(&args);
        fm.output_bytes(line.as_bytes())
    })
}

fn echo(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let mut line = join_args(&args);
        line.push('\n');
        fm.output_bytes(line.as_bytes())
    })
}

fn fail(_fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move { Err(Exception::fail(join_args(&args))) })
}

fn flow_return(_fm: &mut Frame, _args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move { Err(Exception::flow(FlowKind::Return)) })
}

fn flow_break(_fm: &mut Frame, _args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move { Err(Exception::flow(FlowKind::Break)) })
}

fn flow_continue(
    _fm: &mut Frame,
    _args: Vec<Value>,
    _opts: Opts,
) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move { Err(Exception::flow(FlowKind::Continue)) })
}

fn add(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let nums = to_numbers(&args)?;
        fm.output(Value::Str(format_num(nums.iter().sum()))).await;
        Ok(())
    })
}

fn sub(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let nums = to_numbers(&args)?;
        let result = match nums.split_first() {
            None => 0.0,
            Some((first, rest)) => rest.iter().fold(*first, |acc, n| acc - n),
        };
        fm.output(Value::Str(format_num(result))).await;
        Ok(())
    })
}

fn mul(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let nums = to_numbers(&args)?;
        fm.output(Value::Str(format_num(nums.iter().product())))
            .await;
        Ok(())
    })
}

fn div(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let nums = to_numbers(&args)?;
        let result = match nums.split_first() {
            None => 1.0,
            Some((first, rest)) => rest.iter().fold(*first, |acc, n| acc / n),
        };
        fm.output(Value::Str(format_num(result))).await;
        Ok(())
    })
}

fn eq(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let equal = args.windows(2).all(|w| w[0] == w[1]);
        fm.output(Value::Bool(equal)).await;
        Ok(())
    })
}

/// Pass every value from the input channel through to the output.
fn all(fm: &mut Frame, _args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        while let Some(v) = fm.input().await {
            fm.output(v).await;
        }
        Ok(())
    })
}

fn count(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let [arg] = args.as_slice() else {
            return Err(Exception::fail(format!(
                "count needs exactly one argument, got {}",
                args.len()
            )));
        };
        let n = match arg {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.len(),
            Value::Map(entries) => entries.len(),
            other => {
                return Err(Exception::fail(format!("cannot count {}", other.kind())))
            }
        };
        fm.output(Value::str(n.to_string())).await;
        Ok(())
    })
}

fn to_bool(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let [arg] = args.as_slice() else {
            return Err(Exception::fail(format!(
                "bool needs exactly one argument, got {}",
                args.len()
            )));
        };
        fm.output(Value::Bool(arg.to_bool())).await;
        Ok(())
    })
}

fn cd(fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> BoxFuture<'_, EvalResult<()>> {
    Box::pin(async move {
        let target = match args.as_slice() {
            [] => std::env::var("HOME")
                .map_err(|_| Exception::fail("cd: no HOME set"))?,
            [Value::Str(path)] => path.clone(),
            [other] => {
                return Err(Exception::fail(format!(
                    "cd argument must be a string, got {}",
                    other.kind()
                )))
            }
            more => {
                return Err(Exception::fail(format!(
                    "cd takes at most one argument, got {}",
                    more.len()
                )))
            }
        };
        chdir(&target, &fm.ev.store)
    })
}

fn join_args(args: &[Value]) -> String {
    args.iter()
        .map(Value::to_arg_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_numbers(args: &[Value]) -> EvalResult<Vec<f64>> {
    args.iter()
        .map(|v| match v {
            Value::Str(s) => s
                .parse::<f64>()
                .map_err(|_| Exception::fail(format!("wrong type of argument: {s}"))),
            other => Err(Exception::fail(format!(
                "wrong type of argument: {}",
                other.kind()
            ))),
        })
        .collect()
}

fn format_num(n: f64) -> String {
    format!("{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_parse_and_format() {
        assert_eq!(
            to_numbers(&[Value::str("1"), Value::str("2.5")]).unwrap(),
            vec![1.0, 2.5]
        );
        assert!(to_numbers(&[Value::str("x")]).is_err());
        assert!(to_numbers(&[Value::Bool(true)]).is_err());
        assert_eq!(format_num(16.0), "16");
        assert_eq!(format_num(0.5), "0.5");
    }

    #[test]
    fn join_uses_arg_strings() {
        assert_eq!(
            join_args(&[Value::str("a"), Value::Bool(true)]),
            "a $true"
        );
    }

    #[test]
    fn builtin_ns_has_functions_and_values() {
        let ns = make_builtin_ns(Arc::new(super::super::pwd::NullStore));
        assert!(ns.has("put~"));
        assert!(ns.has("fail~"));
        assert!(ns.has("+~"));
        assert!(ns.has("true"));
        assert!(ns.has("ok"));
        assert!(ns.has("pid"));
        assert!(ns.has("pwd"));
    }
}
