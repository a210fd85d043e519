//! Builtin special forms.
//!
//! Special forms behave mostly like ordinary commands — they are valid
//! commands syntactically and can take part in pipelines — but they
//! govern the evaluation of their own arguments and can affect the
//! compilation phase, whereas ordinary commands only affect the
//! evaluation phase.
//!
//! For instance, `and` evaluates its arguments from left to right and
//! stops as soon as a false-ish value is produced: `and $false (fail
//! haha)` raises no exception. As another instance, `del` removes a
//! variable, affecting the compiler's scope descriptors.
//!
//! Flow-control structures are special forms too, with lambdas serving
//! as code blocks.

use std::sync::Arc;

use crate::ast;
use crate::parser;

use super::callable::Opts;
use super::compiler::{compile, Compiler};
use super::exitus::FlowKind;
use super::frame::{parse_variable, Frame, SrcKind, SrcMeta};
use super::op::{lvalue_var, LValue, LambdaOp, ValuesOp};
use super::port::Port;
use super::value::{all_true, FnValue, Value, NS_SUFFIX};
use super::vartypes::{del_element, ptr_var, Ns};
use super::EvalResult;

const DEL_ARG_MSG: &str = "arguments to del must be variables or variable elements";

/// The set of special form names, for head dispatch.
pub fn is_special(name: &str) -> bool {
    matches!(
        name,
        "del" | "fn" | "use" | "and" | "or" | "if" | "while" | "for" | "try"
    )
}

/// A compiled special form.
#[derive(Clone, Debug)]
pub enum SpecialOp {
    Del(Vec<DelOp>),
    Fn {
        var_name: String,
        lambda: Arc<LambdaOp>,
    },
    Use {
        mod_name: String,
        mod_path: String,
    },
    And(Vec<ValuesOp>),
    Or(Vec<ValuesOp>),
    If {
        conds: Vec<ValuesOp>,
        bodies: Vec<ValuesOp>,
        else_body: Option<ValuesOp>,
    },
    While {
        cond: ValuesOp,
        body: ValuesOp,
    },
    For {
        lvalue: LValue,
        iter: ValuesOp,
        body: ValuesOp,
        else_body: Option<ValuesOp>,
    },
    Try {
        body: ValuesOp,
        except_var: Option<LValue>,
        except: Option<ValuesOp>,
        else_body: Option<ValuesOp>,
        finally: Option<ValuesOp>,
    },
}

/// One deletion performed by `del`.
#[derive(Clone, Debug)]
pub enum DelOp {
    Local {
        name: String,
    },
    Env {
        name: String,
    },
    Element {
        ns: String,
        name: String,
        head_begin: usize,
        head_end: usize,
        indices: Vec<ValuesOp>,
    },
}

/// Compile one special form. `name` is known to satisfy `is_special`.
pub(crate) fn compile_special(
    cp: &mut Compiler,
    name: &str,
    form: &ast::Form,
    args: &[ast::Compound],
) -> SpecialOp {
    match name {
        "del" => compile_del(cp, args),
        "fn" => compile_fn(cp, form, args),
        "use" => compile_use(cp, form, args),
        "and" => SpecialOp::And(args.iter().map(|c| cp.compound(c)).collect()),
        "or" => SpecialOp::Or(args.iter().map(|c| cp.compound(c)).collect()),
        "if" => compile_if(cp, form, args),
        "while" => compile_while(cp, form, args),
        "for" => compile_for(cp, form, args),
        "try" => compile_try(cp, form, args),
        _ => unreachable!("not a special form: {name}"),
    }
}

// ── compilation ──────────────────────────────────────────────────────

/// DelForm = 'del' { VariablePrimary }
fn compile_del(cp: &mut Compiler, args: &[ast::Compound]) -> SpecialOp {
    let mut ops = Vec::new();
    for cn in args {
        if cn.indexings.len() != 1 {
            cp.errorf(cn.begin, cn.end, DEL_ARG_MSG);
            continue;
        }
        let ix = &cn.indexings[0];
        let word = match &ix.head.kind {
            ast::PrimaryKind::Bareword(w) => w.clone(),
            ast::PrimaryKind::Variable(_) => {
                cp.errorf(cn.begin, cn.end, "arguments to del must drop $");
                continue;
            }
            _ => {
                cp.errorf(cn.begin, cn.end, DEL_ARG_MSG);
                continue;
            }
        };
        let (explode, ns, name) = parse_variable(&word);
        if explode {
            cp.errorf(cn.begin, cn.end, "arguments to del may not have a leading @");
            continue;
        }
        if ix.indices.is_empty() {
            match ns {
                "" | "local" => {
                    if !cp.this_scope_has(name) {
                        cp.errorf(
                            cn.begin,
                            cn.end,
                            format!("no variable ${name} in local scope"),
                        );
                        continue;
                    }
                    cp.this_scope_del(name);
                    ops.push(DelOp::Local {
                        name: name.to_string(),
                    });
                }
                "E" => ops.push(DelOp::Env {
                    name: name.to_string(),
                }),
                _ => {
                    cp.errorf(
                        cn.begin,
                        cn.end,
                        "only variables in local: or E: can be deleted",
                    );
                    continue;
                }
            }
        } else {
            if !cp.register_get(ns, name, ix.head.begin, ix.head.end) {
                continue;
            }
            let indices = ix.indices.iter().map(|c| cp.compound(c)).collect();
            ops.push(DelOp::Element {
                ns: ns.to_string(),
                name: name.to_string(),
                head_begin: ix.head.begin,
                head_end: ix.head.end,
                indices,
            });
        }
    }
    SpecialOp::Del(ops)
}

/// FnForm = 'fn' StringPrimary LambdaPrimary
///
/// `fn f { body }` is shorthand for binding `f~` to the lambda, with
/// the body wrapped so that a `return` becomes a clean exit.
fn compile_fn(cp: &mut Compiler, form: &ast::Form, args: &[ast::Compound]) -> SpecialOp {
    let mut walker = ArgsWalker::new(form, args);
    let name = walker.next_must_string(cp, "function name");
    let lambda = walker.next_must_lambda_raw(cp);
    walker.must_end(cp);

    let var_name = cp.declare_fn(&name);
    let lambda = lambda.unwrap_or_else(|| {
        // Compilation failed; a vacuous lambda keeps the op well-formed
        // while the collected diagnostics surface.
        Arc::new(LambdaOp {
            params: Vec::new(),
            rest: None,
            body: Arc::new(ValuesOp {
                begin: form.begin,
                end: form.end,
                kind: super::op::ValuesKind::Chunk(Vec::new()),
            }),
            begin: form.begin,
            end: form.end,
        })
    });
    SpecialOp::Fn { var_name, lambda }
}

/// UseForm = 'use' StringPrimary
fn compile_use(cp: &mut Compiler, form: &ast::Form, args: &[ast::Compound]) -> SpecialOp {
    if args.is_empty() {
        cp.errorf(form.end, form.end, "lack module name");
        return SpecialOp::Use {
            mod_name: String::new(),
            mod_path: String::new(),
        };
    }
    if args.len() >= 2 {
        cp.errorf(
            args[1].begin,
            args[args.len() - 1].end,
            "superfluous argument(s)",
        );
    }
    let spec = match args[0].as_literal() {
        Some(s) => s.to_string(),
        None => {
            cp.errorf(args[0].begin, args[0].end, "should be a literal string");
            String::new()
        }
    };

    // For modspec "a/b/c:d", the module name is "c:d" and the module
    // path is "a/b/c/d".
    let mod_name = spec.rsplit('/').next().unwrap_or("").to_string();
    let mod_path = spec.replace(':', "/");
    cp.declare_ns(&mod_name);

    SpecialOp::Use { mod_name, mod_path }
}

fn compile_if(cp: &mut Compiler, form: &ast::Form, args: &[ast::Compound]) -> SpecialOp {
    let mut walker = ArgsWalker::new(form, args);
    let mut conds = Vec::new();
    let mut bodies = Vec::new();
    loop {
        conds.push(walker.next_compound(cp, "condition"));
        bodies.push(walker.next_must_lambda(cp));
        if !walker.next_is("elif") {
            break;
        }
    }
    let else_body = walker.next_must_lambda_if_after(cp, "else");
    walker.must_end(cp);
    SpecialOp::If {
        conds,
        bodies,
        else_body,
    }
}

fn compile_while(cp: &mut Compiler, form: &ast::Form, args: &[ast::Compound]) -> SpecialOp {
    let mut walker = ArgsWalker::new(form, args);
    let cond = walker.next_compound(cp, "condition");
    let body = walker.next_must_lambda(cp);
    walker.must_end(cp);
    SpecialOp::While { cond, body }
}

fn compile_for(cp: &mut Compiler, form: &ast::Form, args: &[ast::Compound]) -> SpecialOp {
    let mut walker = ArgsWalker::new(form, args);
    let var_node = walker.next(cp, "iteration variable");
    let iter = walker.next_compound(cp, "value being iterated");
    let body = walker.next_must_lambda(cp);
    let else_body = walker.next_must_lambda_if_after(cp, "else");
    walker.must_end(cp);

    let lvalue = match var_node.and_then(|c| cp.lvalue(c)) {
        Some(lv) if lv.rest => {
            cp.errorf(lv.begin, lv.end, "rest not allowed");
            placeholder_lvalue(form)
        }
        Some(lv) => lv,
        None => placeholder_lvalue(form),
    };
    SpecialOp::For {
        lvalue,
        iter,
        body,
        else_body,
    }
}

fn compile_try(cp: &mut Compiler, form: &ast::Form, args: &[ast::Compound]) -> SpecialOp {
    let mut walker = ArgsWalker::new(form, args);
    let body = walker.next_must_lambda(cp);
    let mut except_var = None;
    let mut except = None;
    if walker.next_is("except") {
        // An optional bareword between `except` and the handler binds
        // the exception value.
        if let Some(peeked) = walker.peek() {
            if peeked.as_bareword().is_some() && !peeked.is_lambda() {
                let var_node = walker.next(cp, "exception variable");
                except_var = var_node.and_then(|c| cp.lvalue(c));
                if let Some(lv) = &except_var {
                    if lv.rest {
                        cp.errorf(lv.begin, lv.end, "may not use @rest in except variable");
                        except_var = None;
                    }
                }
            }
        }
        except = Some(walker.next_must_lambda(cp));
    }
    let else_body = walker.next_must_lambda_if_after(cp, "else");
    let finally = walker.next_must_lambda_if_after(cp, "finally");
    walker.must_end(cp);
    SpecialOp::Try {
        body,
        except_var,
        except,
        else_body,
        finally,
    }
}

fn placeholder_lvalue(form: &ast::Form) -> LValue {
    LValue {
        rest: false,
        ns: String::new(),
        name: "_".to_string(),
        begin: form.begin,
        end: form.end,
    }
}

/// A cursor over a special form's arguments, mirroring the shape of the
/// form grammars above. The compiler is passed per call so that form
/// compilers can interleave walker steps with other compiler work.
struct ArgsWalker<'a> {
    form: &'a ast::Form,
    args: &'a [ast::Compound],
    idx: usize,
}

impl<'a> ArgsWalker<'a> {
    fn new(form: &'a ast::Form, args: &'a [ast::Compound]) -> Self {
        ArgsWalker { form, args, idx: 0 }
    }

    fn peek(&self) -> Option<&'a ast::Compound> {
        self.args.get(self.idx)
    }

    fn next(&mut self, cp: &mut Compiler, what: &str) -> Option<&'a ast::Compound> {
        match self.args.get(self.idx) {
            Some(c) => {
                self.idx += 1;
                Some(c)
            }
            None => {
                cp.errorf(self.form.end, self.form.end, format!("missing {what}"));
                None
            }
        }
    }

    /// The next argument as a compiled compound op.
    fn next_compound(&mut self, cp: &mut Compiler, what: &str) -> ValuesOp {
        match self.next(cp, what) {
            Some(c) => cp.compound(c),
            None => self.empty_op(),
        }
    }

    /// The next argument must be a literal string.
    fn next_must_string(&mut self, cp: &mut Compiler, what: &str) -> String {
        match self.next(cp, what) {
            Some(c) => match c.as_literal() {
                Some(s) => s.to_string(),
                None => {
                    cp.errorf(c.begin, c.end, "must be a literal string");
                    String::new()
                }
            },
            None => String::new(),
        }
    }

    /// The next argument must be a lambda; yields the compiled
    /// lambda-valued op.
    fn next_must_lambda(&mut self, cp: &mut Compiler) -> ValuesOp {
        match self.next(cp, "lambda") {
            Some(c) if c.is_lambda() => cp.compound(c),
            Some(c) => {
                cp.errorf(c.begin, c.end, "must be a lambda");
                self.empty_op()
            }
            None => self.empty_op(),
        }
    }

    /// Like `next_must_lambda`, but yields the raw `LambdaOp` (used by
    /// `fn`, which wraps the closure).
    fn next_must_lambda_raw(&mut self, cp: &mut Compiler) -> Option<Arc<LambdaOp>> {
        match self.next(cp, "lambda") {
            Some(c) if c.is_lambda() => {
                let primary = &c.indexings[0].head;
                cp.lambda(primary).map(Arc::new)
            }
            Some(c) => {
                cp.errorf(c.begin, c.end, "must be a lambda");
                None
            }
            None => None,
        }
    }

    /// Consume the next argument if it is the given bareword keyword.
    fn next_is(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(c) if c.as_bareword() == Some(keyword) => {
                self.idx += 1;
                true
            }
            _ => false,
        }
    }

    /// `keyword lambda`, or nothing.
    fn next_must_lambda_if_after(&mut self, cp: &mut Compiler, keyword: &str) -> Option<ValuesOp> {
        if self.next_is(keyword) {
            Some(self.next_must_lambda(cp))
        } else {
            None
        }
    }

    fn must_end(&mut self, cp: &mut Compiler) {
        if self.idx < self.args.len() {
            let begin = self.args[self.idx].begin;
            let end = self.args[self.args.len() - 1].end;
            cp.errorf(begin, end, "superfluous argument(s)");
        }
    }

    fn empty_op(&self) -> ValuesOp {
        ValuesOp {
            begin: self.form.begin,
            end: self.form.end,
            kind: super::op::ValuesKind::Chunk(Vec::new()),
        }
    }
}

// ── execution ────────────────────────────────────────────────────────

impl SpecialOp {
    pub async fn exec(&self, begin: usize, end: usize, fm: &mut Frame) -> EvalResult<()> {
        match self {
            SpecialOp::Del(ops) => exec_del(ops, fm).await,
            SpecialOp::Fn { var_name, lambda } => exec_fn(var_name, lambda, begin, end, fm),
            SpecialOp::Use { mod_name, mod_path } => {
                exec_use(mod_name, mod_path, begin, end, fm).await
            }
            SpecialOp::And(args) => exec_and_or(args, true, false, fm).await,
            SpecialOp::Or(args) => exec_and_or(args, false, true, fm).await,
            SpecialOp::If {
                conds,
                bodies,
                else_body,
            } => exec_if(conds, bodies, else_body.as_ref(), fm).await,
            SpecialOp::While { cond, body } => exec_while(cond, body, fm).await,
            SpecialOp::For {
                lvalue,
                iter,
                body,
                else_body,
            } => exec_for(lvalue, iter, body, else_body.as_ref(), fm).await,
            SpecialOp::Try {
                body,
                except_var,
                except,
                else_body,
                finally,
            } => {
                exec_try(
                    body,
                    except_var.as_ref(),
                    except.as_ref(),
                    else_body.as_ref(),
                    finally.as_ref(),
                    fm,
                )
                .await
            }
        }
    }
}

async fn exec_del(ops: &[DelOp], fm: &mut Frame) -> EvalResult<()> {
    for op in ops {
        match op {
            DelOp::Local { name } => {
                fm.local.del(name);
            }
            DelOp::Env { name } => {
                std::env::remove_var(name);
            }
            DelOp::Element {
                ns,
                name,
                head_begin,
                head_end,
                indices,
            } => {
                let mut index_values = Vec::with_capacity(indices.len());
                for index_op in indices {
                    let mut vs = index_op.exec(fm).await?;
                    if vs.len() != 1 {
                        return Err(fm.errorf(
                            index_op.begin,
                            index_op.end,
                            "index must evaluate to a single value in argument to del",
                        ));
                    }
                    index_values.push(vs.remove(0));
                }
                let var = fm.resolve_var(ns, name).ok_or_else(|| {
                    fm.errorf(*head_begin, *head_end, format!("no variable ${name}"))
                })?;
                if let Err(e) = del_element(&var, &index_values) {
                    let (b, e_end) = if e.level == 0 {
                        (*head_begin, *head_end)
                    } else {
                        let op = &indices[e.level - 1];
                        (op.begin, op.end)
                    };
                    return Err(fm.errorf(b, e_end, e.msg));
                }
            }
        }
    }
    Ok(())
}

fn exec_fn(
    var_name: &str,
    lambda: &Arc<LambdaOp>,
    begin: usize,
    end: usize,
    fm: &mut Frame,
) -> EvalResult<()> {
    // Bind the name to a placeholder first so the lambda body can
    // capture it and call itself recursively; the placeholder is never
    // actually invoked.
    let cell = ptr_var(Value::Fn(FnValue::Builtin(
        super::builtin_fn::nop_builtin(),
    )));
    fm.local.set(var_name.to_string(), cell.clone());
    let closure = lambda.make_closure(fm, true);
    cell.set(Value::Fn(FnValue::Closure(Arc::new(closure))))
        .map_err(|e| fm.position(e, begin, end))
}

async fn exec_and_or(
    args: &[ValuesOp],
    init: bool,
    stop_at: bool,
    fm: &mut Frame,
) -> EvalResult<()> {
    let mut last = Value::Bool(init);
    for op in args {
        let values = op.exec(fm).await?;
        for v in values {
            if v.to_bool() == stop_at {
                fm.output(v).await;
                return Ok(());
            }
            last = v;
        }
    }
    fm.output(last).await;
    Ok(())
}

async fn exec_if(
    conds: &[ValuesOp],
    bodies: &[ValuesOp],
    else_body: Option<&ValuesOp>,
    fm: &mut Frame,
) -> EvalResult<()> {
    for (cond, body) in conds.iter().zip(bodies) {
        let mut cond_frame = fm.fork("if cond");
        if all_true(&cond.exec(&mut cond_frame).await?) {
            let f = body.exec_lambda(fm).await?;
            let mut body_frame = fm.fork("if body");
            return body_frame
                .pcall(&f, Vec::new(), Opts::new(), body.begin, body.end)
                .await;
        }
    }
    if let Some(else_op) = else_body {
        let f = else_op.exec_lambda(fm).await?;
        let mut else_frame = fm.fork("if else");
        return else_frame
            .pcall(&f, Vec::new(), Opts::new(), else_op.begin, else_op.end)
            .await;
    }
    Ok(())
}

async fn exec_while(cond: &ValuesOp, body: &ValuesOp, fm: &mut Frame) -> EvalResult<()> {
    let body_fn = body.exec_lambda(fm).await?;
    loop {
        let mut cond_frame = fm.fork("while cond");
        if !all_true(&cond.exec(&mut cond_frame).await?) {
            break;
        }
        let mut body_frame = fm.fork("while");
        match body_frame
            .pcall(&body_fn, Vec::new(), Opts::new(), body.begin, body.end)
            .await
        {
            Ok(()) => {}
            Err(e) => match e.flow_kind() {
                Some(FlowKind::Continue) => continue,
                Some(FlowKind::Break) => break,
                _ => return Err(e),
            },
        }
    }
    Ok(())
}

async fn exec_for(
    lvalue: &LValue,
    iter: &ValuesOp,
    body: &ValuesOp,
    else_body: Option<&ValuesOp>,
    fm: &mut Frame,
) -> EvalResult<()> {
    let var = lvalue_var(fm, lvalue)?;
    let iterable = iter.exec_single(fm, "value being iterated").await?;
    let items = iterable
        .iterate()
        .map_err(|e| fm.position(e, iter.begin, iter.end))?;
    let body_fn = body.exec_lambda(fm).await?;
    let else_fn = match else_body {
        Some(op) => Some(op.exec_lambda(fm).await?),
        None => None,
    };

    let mut iterated = false;
    for item in items {
        iterated = true;
        var.set(item)
            .map_err(|e| fm.position(e, lvalue.begin, lvalue.end))?;
        let mut body_frame = fm.fork("for");
        match body_frame
            .pcall(&body_fn, Vec::new(), Opts::new(), body.begin, body.end)
            .await
        {
            Ok(()) => {}
            Err(e) => match e.flow_kind() {
                Some(FlowKind::Continue) => continue,
                Some(FlowKind::Break) => break,
                _ => return Err(e),
            },
        }
    }

    if !iterated {
        if let Some(f) = else_fn {
            let mut else_frame = fm.fork("for else");
            return else_frame
                .pcall(&f, Vec::new(), Opts::new(), body.begin, body.end)
                .await;
        }
    }
    Ok(())
}

async fn exec_try(
    body: &ValuesOp,
    except_var: Option<&LValue>,
    except: Option<&ValuesOp>,
    else_body: Option<&ValuesOp>,
    finally: Option<&ValuesOp>,
    fm: &mut Frame,
) -> EvalResult<()> {
    let body_fn = body.exec_lambda(fm).await?;
    let except_fn = match except {
        Some(op) => Some(op.exec_lambda(fm).await?),
        None => None,
    };
    let else_fn = match else_body {
        Some(op) => Some(op.exec_lambda(fm).await?),
        None => None,
    };
    let finally_fn = match finally {
        Some(op) => Some(op.exec_lambda(fm).await?),
        None => None,
    };
    let bound_var = match except_var {
        Some(lv) => Some(lvalue_var(fm, lv)?),
        None => None,
    };

    let mut pending = {
        let mut body_frame = fm.fork("try body");
        body_frame
            .pcall(&body_fn, Vec::new(), Opts::new(), body.begin, body.end)
            .await
            .err()
    };

    if let Some(e) = pending.take() {
        match &except_fn {
            Some(handler) => {
                if let Some(var) = &bound_var {
                    var.set(Value::Exitus(e.to_exitus()))
                        .map_err(|se| fm.position(se, body.begin, body.end))?;
                }
                let mut except_frame = fm.fork("try except");
                pending = except_frame
                    .pcall(handler, Vec::new(), Opts::new(), body.begin, body.end)
                    .await
                    .err();
            }
            None => pending = Some(e),
        }
    } else if let Some(else_fn) = &else_fn {
        let mut else_frame = fm.fork("try else");
        pending = else_frame
            .pcall(else_fn, Vec::new(), Opts::new(), body.begin, body.end)
            .await
            .err();
    }

    if let Some(finally_fn) = &finally_fn {
        let mut finally_frame = fm.fork("try finally");
        if let Err(fe) = finally_frame
            .pcall(finally_fn, Vec::new(), Opts::new(), body.begin, body.end)
            .await
        {
            return Err(match pending {
                Some(prior) => fe.with_inner(prior),
                None => fe,
            });
        }
    }

    match pending {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ── module loading ───────────────────────────────────────────────────

async fn exec_use(
    mod_name: &str,
    mod_path: &str,
    begin: usize,
    end: usize,
    fm: &mut Frame,
) -> EvalResult<()> {
    let resolved = if mod_path.starts_with("./") || mod_path.starts_with("../") {
        if fm.src.kind != SrcKind::Module {
            return Err(fm.errorf(begin, end, "Relative use not from module"));
        }
        // Resolve against the importing module's directory.
        let dir = match fm.src.name.rfind('/') {
            Some(i) => &fm.src.name[..i],
            None => "",
        };
        clean_path(&format!("{dir}/{mod_path}"))
    } else {
        clean_path(mod_path)
    };
    if resolved.starts_with("../") || resolved == ".." {
        return Err(fm.errorf(begin, end, "Module outside library directory"));
    }

    let module = load_module(fm, &resolved, begin, end).await?;
    fm.local
        .set(format!("{mod_name}{NS_SUFFIX}"), ptr_var(Value::Ns(module)));
    Ok(())
}

async fn load_module(fm: &Frame, name: &str, begin: usize, end: usize) -> EvalResult<Ns> {
    if let Some(ns) = fm.ev.module(name) {
        // Module already loaded.
        return Ok(ns);
    }

    let lib_dir = fm
        .ev
        .lib_dir
        .as_ref()
        .ok_or_else(|| fm.errorf(begin, end, "no library directory"))?;

    let path = lib_dir.join(format!("{name}.elv"));
    let (source_display, code) = if path.exists() {
        let code = super::read_file_utf8(&path)
            .map_err(|e| fm.errorf(begin, end, e.to_string()))?;
        (path.display().to_string(), code)
    } else if let Some(code) = fm.ev.bundled.get(name) {
        ("<bundled module>".to_string(), code.clone())
    } else {
        return Err(fm.errorf(
            begin,
            end,
            format!("cannot load {name}: {} does not exist", path.display()),
        ));
    };
    tracing::debug!(module = name, source = %source_display, "loading module");

    let chunk = parser::parse(name, &code).map_err(|e| fm.errorf(begin, end, e.to_string()))?;
    let text: Arc<str> = Arc::from(code.as_str());
    let op = compile(
        name,
        &text,
        std::collections::HashSet::new(),
        fm.ev.builtin_names(),
        &chunk,
    )
    .map_err(|e| fm.errorf(begin, end, e.to_string()))?;

    let module_ns = Ns::new();
    let meta = SrcMeta {
        name: name.to_string(),
        text,
        kind: SrcKind::Module,
    };
    let mut module_frame = Frame {
        ev: fm.ev.clone(),
        src: meta,
        context: "module".to_string(),
        local: module_ns.clone(),
        up: super::vartypes::UpView::new(),
        ports: fm.ports.iter().map(Port::fork).collect(),
        traceback: {
            let mut tb = fm.traceback.clone();
            tb.push(fm.entry(begin, end));
            tb
        },
    };

    // Publish the namespace before executing the body so that mutual
    // and self imports see a partial but present namespace instead of
    // recursing forever.
    fm.ev.insert_module(name, module_ns.clone());
    match op.exec(&mut module_frame).await {
        Ok(_) => Ok(module_ns),
        Err(e) => {
            fm.ev.remove_module(name);
            Err(e)
        }
    }
}

/// Lexically clean a slash-separated path: resolve `.` and `..`
/// segments without touching the filesystem.
pub(crate) fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().map(|p| *p != "..").unwrap_or(false) {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_names() {
        for name in ["del", "fn", "use", "and", "or", "if", "while", "for", "try"] {
            assert!(is_special(name));
        }
        assert!(!is_special("put"));
        assert!(!is_special("elif"));
    }

    #[test]
    fn clean_path_resolves_dots() {
        assert_eq!(clean_path("a/b/../c"), "a/c");
        assert_eq!(clean_path("./a/./b"), "a/b");
        assert_eq!(clean_path("a/b/c/../../d"), "a/d");
        assert_eq!(clean_path("../x"), "../x");
        assert_eq!(clean_path("a/../../x"), "../x");
        assert_eq!(clean_path("a/.."), ".");
    }
}
