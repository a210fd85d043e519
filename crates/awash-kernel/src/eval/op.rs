//! Compiled operations and their execution.
//!
//! The compiler lowers the syntax tree into this operation tree; every
//! operation carries the `[begin, end)` byte range of the node it came
//! from. Execution is a recursive walk returning `Result<Vec<Value>,
//! Exception>` — the tagged-result protocol that stands in for
//! unwinding. Recursion goes through `BoxFuture`, the same shape the
//! rest of the async stack uses.

use std::fs::File;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::builtin_special::SpecialOp;
use super::callable::{Closure, Opts};
use super::exc::Exception;
use super::exitus::Exitus;
use super::external;
use super::frame::Frame;
use super::port::{Chan, Port, PortFile, CHAN_BUF};
use super::value::{FnValue, Value};
use super::vartypes::{ptr_var, VarRef};
use super::EvalResult;

/// An operation yielding a list of values.
#[derive(Clone, Debug)]
pub struct ValuesOp {
    pub begin: usize,
    pub end: usize,
    pub kind: ValuesKind,
}

#[derive(Clone, Debug)]
pub enum ValuesKind {
    /// A chunk: pipelines in sequence; yields the last pipeline's
    /// values.
    Chunk(Vec<ValuesOp>),
    /// Forms connected by `|`; stages run as parallel tasks.
    Pipeline(Vec<Arc<ValuesOp>>),
    Form(Arc<FormOp>),
    /// Adjacent indexings concatenated into one word.
    Compound(Vec<ValuesOp>),
    /// A primary with an index chain.
    Indexing {
        head: Box<ValuesOp>,
        indices: Vec<ValuesOp>,
    },
    /// A compiled constant (barewords, quoted strings).
    Literal(Value),
    Variable {
        explode: bool,
        ns: String,
        name: String,
    },
    List(Vec<ValuesOp>),
    Map(Vec<(ValuesOp, ValuesOp)>),
    Lambda(Arc<LambdaOp>),
    /// `(pipeline)` — output capture.
    Capture(Box<ValuesOp>),
}

/// One command form.
#[derive(Clone, Debug)]
pub enum FormOp {
    Ordinary {
        head: HeadOp,
        args: Vec<ValuesOp>,
        opts: Vec<(String, ValuesOp)>,
    },
    Assignment {
        lvalues: Vec<LValue>,
        rhs: Vec<ValuesOp>,
    },
    Special(SpecialOp),
}

/// How the head of an ordinary form is found.
#[derive(Clone, Debug)]
pub enum HeadOp {
    /// A bareword head: resolve `name~` as a function, fall back to an
    /// external command of that name.
    Bare(String),
    /// An expression head: must evaluate to one callable or one string
    /// naming an external command.
    Expr(Box<ValuesOp>),
}

/// An assignment target.
#[derive(Clone, Debug)]
pub struct LValue {
    pub rest: bool,
    pub ns: String,
    pub name: String,
    pub begin: usize,
    pub end: usize,
}

/// A compiled lambda: parameters plus a compiled body. The closure is
/// built at execution time, capturing the defining frame's scope.
#[derive(Clone, Debug)]
pub struct LambdaOp {
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Arc<ValuesOp>,
    pub begin: usize,
    pub end: usize,
}

impl LambdaOp {
    /// Build the closure value in the given frame.
    pub fn make_closure(&self, fm: &Frame, catch_return: bool) -> Closure {
        Closure {
            params: self.params.clone(),
            rest: self.rest.clone(),
            body: self.body.clone(),
            captured: super::vartypes::UpView::capture(&fm.local, &fm.up),
            src: fm.src.clone(),
            catch_return,
        }
    }
}

enum Callee {
    Fn(FnValue),
    External(String),
}

impl ValuesOp {
    pub fn exec<'a>(&'a self, fm: &'a mut Frame) -> BoxFuture<'a, EvalResult<Vec<Value>>> {
        Box::pin(async move {
            match &self.kind {
                ValuesKind::Chunk(pipelines) => {
                    let mut last = Vec::new();
                    for op in pipelines {
                        last = op.exec(fm).await?;
                    }
                    Ok(last)
                }
                ValuesKind::Pipeline(forms) => self.exec_pipeline(forms, fm).await,
                ValuesKind::Form(form) => form.exec(self.begin, self.end, fm).await,
                ValuesKind::Compound(parts) => self.exec_compound(parts, fm).await,
                ValuesKind::Indexing { head, indices } => {
                    let mut values = head.exec(fm).await?;
                    for idx_op in indices {
                        let idx = idx_op.exec_single(fm, "index").await?;
                        let mut indexed = Vec::with_capacity(values.len());
                        for v in &values {
                            let item = v
                                .index(&idx)
                                .map_err(|e| fm.position(e, idx_op.begin, idx_op.end))?;
                            indexed.push(item);
                        }
                        values = indexed;
                    }
                    Ok(values)
                }
                ValuesKind::Literal(v) => Ok(vec![v.clone()]),
                ValuesKind::Variable { explode, ns, name } => {
                    let var = fm.resolve_var(ns, name).ok_or_else(|| {
                        fm.errorf(
                            self.begin,
                            self.end,
                            format!("variable ${} not found", qualified(ns, name)),
                        )
                    })?;
                    let value = var
                        .get()
                        .map_err(|e| fm.position(e, self.begin, self.end))?;
                    if *explode {
                        value
                            .iterate()
                            .map_err(|e| fm.position(e, self.begin, self.end))
                    } else {
                        Ok(vec![value])
                    }
                }
                ValuesKind::List(elems) => {
                    let mut items = Vec::new();
                    for op in elems {
                        items.extend(op.exec(fm).await?);
                    }
                    Ok(vec![Value::list(items)])
                }
                ValuesKind::Map(pairs) => {
                    let mut entries = std::collections::HashMap::new();
                    for (key_op, value_op) in pairs {
                        let key = key_op.exec_single(fm, "map key").await?;
                        let key = key.as_str().map(str::to_owned).ok_or_else(|| {
                            fm.errorf(
                                key_op.begin,
                                key_op.end,
                                format!("map key must be a string, got {}", key.kind()),
                            )
                        })?;
                        let value = value_op.exec_single(fm, "map value").await?;
                        entries.insert(key, value);
                    }
                    Ok(vec![Value::map(entries)])
                }
                ValuesKind::Lambda(lambda) => Ok(vec![Value::Fn(FnValue::Closure(Arc::new(
                    lambda.make_closure(fm, false),
                )))]),
                ValuesKind::Capture(inner) => self.exec_capture(inner, fm).await,
            }
        })
    }

    /// Execute and require exactly one value.
    pub async fn exec_single(&self, fm: &mut Frame, what: &str) -> EvalResult<Value> {
        let mut values = self.exec(fm).await?;
        if values.len() != 1 {
            return Err(fm.errorf(
                self.begin,
                self.end,
                format!("expect exactly one value for {what}, got {}", values.len()),
            ));
        }
        Ok(values.remove(0))
    }

    /// Execute and require the single value to be callable.
    pub async fn exec_lambda(&self, fm: &mut Frame) -> EvalResult<FnValue> {
        match self.exec_single(fm, "body").await? {
            Value::Fn(f) => Ok(f),
            other => Err(fm.errorf(
                self.begin,
                self.end,
                format!("must be a lambda, got {}", other.kind()),
            )),
        }
    }

    async fn exec_pipeline(
        &self,
        forms: &[Arc<ValuesOp>],
        fm: &mut Frame,
    ) -> EvalResult<Vec<Value>> {
        match forms.len() {
            0 => Ok(Vec::new()),
            // A single form runs inline in the current frame; this is
            // the path that lets top-level definitions land in the
            // top-level namespace.
            1 => forms[0].exec(fm).await,
            _ => {
                let mut frames: Vec<Frame> = (0..forms.len())
                    .map(|i| fm.fork(&format!("pipeline stage {i}")))
                    .collect();
                for i in 0..forms.len() - 1 {
                    let (reader, writer) = std::io::pipe()
                        .map_err(|e| fm.errorf(self.begin, self.end, format!("pipe: {e}")))?;
                    let chan = Chan::bounded(CHAN_BUF);
                    frames[i].set_port(
                        1,
                        Port {
                            file: PortFile::handle(File::from(OwnedFd::from(writer))),
                            chan: chan.clone(),
                            owns_file: true,
                            owns_chan: true,
                        },
                    );
                    frames[i + 1].set_port(
                        0,
                        Port {
                            file: PortFile::handle(File::from(OwnedFd::from(reader))),
                            chan,
                            owns_file: true,
                            owns_chan: false,
                        },
                    );
                }
                let mut handles = Vec::with_capacity(forms.len());
                for (op, mut frame) in forms.iter().cloned().zip(frames) {
                    handles.push(tokio::spawn(async move {
                        let result = op.exec(&mut frame).await;
                        frame.close_ports();
                        result
                    }));
                }
                let mut values = Vec::new();
                let mut first_err: Option<Exception> = None;
                for handle in handles {
                    let stage = match handle.await {
                        Ok(r) => r,
                        Err(e) => Err(fm.errorf(
                            self.begin,
                            self.end,
                            format!("pipeline stage panicked: {e}"),
                        )),
                    };
                    match stage {
                        Ok(vs) => values.extend(vs),
                        Err(e) => {
                            first_err = Some(match first_err.take() {
                                None => e,
                                Some(first) => first.with_inner(e),
                            });
                        }
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(values),
                }
            }
        }
    }

    async fn exec_compound(
        &self,
        parts: &[ValuesOp],
        fm: &mut Frame,
    ) -> EvalResult<Vec<Value>> {
        if parts.len() == 1 {
            return parts[0].exec(fm).await;
        }
        // Multiple adjacent parts concatenate stringwise, cartesian
        // over multi-valued parts.
        let mut words = vec![String::new()];
        for part in parts {
            let values = part.exec(fm).await?;
            let mut next = Vec::with_capacity(words.len() * values.len().max(1));
            for w in &words {
                for v in &values {
                    next.push(format!("{w}{}", v.to_arg_string()));
                }
            }
            words = next;
        }
        Ok(words.into_iter().map(Value::Str).collect())
    }

    async fn exec_capture(&self, inner: &ValuesOp, fm: &mut Frame) -> EvalResult<Vec<Value>> {
        let (reader, writer) = std::io::pipe()
            .map_err(|e| fm.errorf(self.begin, self.end, format!("pipe: {e}")))?;
        let chan = Chan::bounded(CHAN_BUF);

        let mut frame = fm.fork("capture");
        frame.set_port(
            1,
            Port {
                file: PortFile::handle(File::from(OwnedFd::from(writer))),
                chan: chan.clone(),
                owns_file: true,
                owns_chan: true,
            },
        );

        let drain = chan.clone();
        let collector = tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(v) = drain.recv().await {
                collected.push(v);
            }
            collected
        });
        let byte_reader = tokio::task::spawn_blocking(move || {
            let mut reader = File::from(OwnedFd::from(reader));
            let mut buf = String::new();
            let _ = reader.read_to_string(&mut buf);
            buf.lines().map(str::to_owned).collect::<Vec<String>>()
        });

        let result = inner.exec(&mut frame).await;
        frame.close_ports();

        let lines = byte_reader.await.unwrap_or_default();
        let chan_values = collector.await.unwrap_or_default();
        result?;

        let mut values: Vec<Value> = lines.into_iter().map(Value::Str).collect();
        values.extend(chan_values);
        Ok(values)
    }
}

impl FormOp {
    pub async fn exec(&self, begin: usize, end: usize, fm: &mut Frame) -> EvalResult<Vec<Value>> {
        match self {
            FormOp::Ordinary { head, args, opts } => {
                let callee = head.resolve(begin, end, fm).await?;
                let mut arg_values = Vec::new();
                for op in args {
                    arg_values.extend(op.exec(fm).await?);
                }
                let mut opt_values = Opts::new();
                for (name, op) in opts {
                    let v = op.exec_single(fm, "option value").await?;
                    opt_values.insert(name.clone(), v);
                }
                let exitus = match callee {
                    Callee::Fn(f) => {
                        fm.pcall(&f, arg_values, opt_values, begin, end).await?;
                        Exitus::Ok
                    }
                    Callee::External(name) => {
                        external::exec_external(fm, &name, arg_values, begin, end).await?
                    }
                };
                Ok(vec![Value::Exitus(exitus)])
            }
            FormOp::Assignment { lvalues, rhs } => {
                let mut values = Vec::new();
                for op in rhs {
                    values.extend(op.exec(fm).await?);
                }
                assign(fm, lvalues, values, begin, end)?;
                Ok(vec![Value::Exitus(Exitus::Ok)])
            }
            FormOp::Special(special) => {
                special.exec(begin, end, fm).await?;
                Ok(vec![Value::Exitus(Exitus::Ok)])
            }
        }
    }
}

impl HeadOp {
    async fn resolve(&self, begin: usize, end: usize, fm: &mut Frame) -> EvalResult<Callee> {
        match self {
            HeadOp::Bare(name) => {
                let (ns, base) = match super::frame::parse_variable(name) {
                    (false, ns, base) => (ns, base),
                    (true, ..) => ("", name.as_str()),
                };
                let fn_name = format!("{base}{}", super::value::FN_SUFFIX);
                match fm.resolve_var(ns, &fn_name) {
                    Some(var) => match var.get().map_err(|e| fm.position(e, begin, end))? {
                        Value::Fn(f) => Ok(Callee::Fn(f)),
                        other => Err(fm.errorf(
                            begin,
                            end,
                            format!("head of command must be callable, got {}", other.kind()),
                        )),
                    },
                    None => Ok(Callee::External(name.clone())),
                }
            }
            HeadOp::Expr(op) => match op.exec_single(fm, "command head").await? {
                Value::Fn(f) => Ok(Callee::Fn(f)),
                Value::Str(s) => Ok(Callee::External(s)),
                other => Err(fm.errorf(
                    op.begin,
                    op.end,
                    format!(
                        "head of command must be callable or string, got {}",
                        other.kind()
                    ),
                )),
            },
        }
    }
}

/// Resolve an assignment target, creating a fresh local variable when
/// the name does not resolve yet.
pub fn lvalue_var(fm: &mut Frame, lv: &LValue) -> EvalResult<VarRef> {
    if let Some(var) = fm.resolve_var(&lv.ns, &lv.name) {
        return Ok(var);
    }
    if lv.ns.is_empty() || lv.ns == "local" {
        let var = ptr_var(Value::str(""));
        fm.local.set(lv.name.clone(), var.clone());
        return Ok(var);
    }
    Err(fm.errorf(
        lv.begin,
        lv.end,
        format!("cannot create variable ${}:{}", lv.ns, lv.name),
    ))
}

fn assign(
    fm: &mut Frame,
    lvalues: &[LValue],
    values: Vec<Value>,
    begin: usize,
    end: usize,
) -> EvalResult<()> {
    let rest_pos = lvalues.iter().position(|l| l.rest);
    match rest_pos {
        None if values.len() != lvalues.len() => {
            return Err(fm.errorf(
                begin,
                end,
                format!(
                    "assignment arity mismatch: {} targets, {} values",
                    lvalues.len(),
                    values.len()
                ),
            ));
        }
        Some(_) if values.len() < lvalues.len() - 1 => {
            return Err(fm.errorf(
                begin,
                end,
                format!(
                    "assignment arity mismatch: at least {} values needed, got {}",
                    lvalues.len() - 1,
                    values.len()
                ),
            ));
        }
        _ => {}
    }

    let mut values = values;
    match rest_pos {
        None => {
            for (lv, value) in lvalues.iter().zip(values) {
                let var = lvalue_var(fm, lv)?;
                var.set(value)
                    .map_err(|e| fm.position(e, lv.begin, lv.end))?;
            }
        }
        Some(r) => {
            let after = lvalues.len() - r - 1;
            let tail: Vec<Value> = values.split_off(values.len() - after);
            let rest: Vec<Value> = values.split_off(r);
            for (lv, value) in lvalues[..r].iter().zip(values) {
                let var = lvalue_var(fm, lv)?;
                var.set(value)
                    .map_err(|e| fm.position(e, lv.begin, lv.end))?;
            }
            let rest_lv = &lvalues[r];
            let var = lvalue_var(fm, rest_lv)?;
            var.set(Value::list(rest))
                .map_err(|e| fm.position(e, rest_lv.begin, rest_lv.end))?;
            for (lv, value) in lvalues[r + 1..].iter().zip(tail) {
                let var = lvalue_var(fm, lv)?;
                var.set(value)
                    .map_err(|e| fm.position(e, lv.begin, lv.end))?;
            }
        }
    }
    Ok(())
}

fn qualified(ns: &str, name: &str) -> String {
    if ns.is_empty() {
        name.to_string()
    } else {
        format!("{ns}:{name}")
    }
}
