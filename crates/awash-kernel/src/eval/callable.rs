//! The call protocol: builtins and user closures.
//!
//! Anything invocable implements `Callable`: it receives a frame forked
//! for the call, positional arguments, and options. Output goes to the
//! frame's ports; the return value only signals success or an exception.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::exc::{Cause, Exception};
use super::frame::{Frame, SrcMeta};
use super::op::ValuesOp;
use super::value::Value;
use super::vartypes::{ptr_var, Ns, UpView};
use super::EvalResult;

/// Options passed to a call (`&name=value` pairs).
pub type Opts = HashMap<String, Value>;

/// Something that can be invoked with a frame, arguments and options.
#[async_trait]
pub trait Callable: Send + Sync {
    /// A short label for diagnostics.
    fn label(&self) -> String;

    async fn call(&self, fm: &mut Frame, args: Vec<Value>, opts: Opts) -> EvalResult<()>;
}

/// The implementation signature of a builtin function.
pub type BuiltinImpl =
    for<'a> fn(&'a mut Frame, Vec<Value>, Opts) -> BoxFuture<'a, EvalResult<()>>;

/// A named builtin function.
pub struct BuiltinFn {
    pub name: &'static str,
    pub func: BuiltinImpl,
}

impl BuiltinFn {
    pub fn new(name: &'static str, func: BuiltinImpl) -> BuiltinFn {
        BuiltinFn { name, func }
    }
}

#[async_trait]
impl Callable for BuiltinFn {
    fn label(&self) -> String {
        format!("builtin {}", self.name)
    }

    async fn call(&self, fm: &mut Frame, args: Vec<Value>, opts: Opts) -> EvalResult<()> {
        (self.func)(fm, args, opts).await
    }
}

impl std::fmt::Debug for BuiltinFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinFn({})", self.name)
    }
}

/// A user-defined closure: parameters, a compiled body, and the
/// captured outer scope.
pub struct Closure {
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Arc<ValuesOp>,
    /// The defining frame's local + up, combined into one view. Layers
    /// alias live namespaces, so definitions added after the closure
    /// was built are still visible inside it.
    pub captured: UpView,
    pub src: SrcMeta,
    /// Set by `fn`: a Return from the body becomes a clean exit.
    pub catch_return: bool,
}

#[async_trait]
impl Callable for Closure {
    fn label(&self) -> String {
        "closure".to_string()
    }

    async fn call(&self, fm: &mut Frame, args: Vec<Value>, _opts: Opts) -> EvalResult<()> {
        let local = Ns::new();
        match &self.rest {
            None => {
                if args.len() != self.params.len() {
                    return Err(Exception::fail(format!(
                        "need {} arguments, got {}",
                        self.params.len(),
                        args.len()
                    )));
                }
            }
            Some(_) => {
                if args.len() < self.params.len() {
                    return Err(Exception::fail(format!(
                        "need at least {} arguments, got {}",
                        self.params.len(),
                        args.len()
                    )));
                }
            }
        }
        let mut args = args;
        let tail = args.split_off(self.params.len());
        for (name, value) in self.params.iter().zip(args) {
            local.set(name.clone(), ptr_var(value));
        }
        if let Some(rest) = &self.rest {
            local.set(rest.clone(), ptr_var(Value::list(tail)));
        }

        let mut body_frame = Frame {
            ev: fm.ev.clone(),
            src: self.src.clone(),
            context: "function".to_string(),
            local,
            up: self.captured.clone(),
            ports: fm.ports.iter().map(super::port::Port::fork).collect(),
            traceback: fm.traceback.clone(),
        };
        match self.body.exec(&mut body_frame).await {
            Ok(_) => Ok(()),
            Err(e) if self.catch_return && e.cause == Cause::Return => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.params)
            .field("rest", &self.rest)
            .field("catch_return", &self.catch_return)
            .finish()
    }
}
