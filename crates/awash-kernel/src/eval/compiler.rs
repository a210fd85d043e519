//! The compiler: lowers the syntax tree to operations.
//!
//! This is the static half of the two-stage pipeline. While walking the
//! tree it keeps a stack of scope descriptors (the names declared so
//! far in each scope), records variable gets and sets, and rejects
//! malformed special-form usage — all before any side effect runs.
//! Diagnostics are collected and reported together.

use std::collections::HashSet;
use std::sync::Arc;

use crate::ast;
use crate::ast::PrimaryKind;

use super::builtin_special::{compile_special, is_special};
use super::exc::{CompileError, CompileErrorList};
use super::frame::parse_variable;
use super::op::{FormOp, HeadOp, LValue, LambdaOp, ValuesKind, ValuesOp};
use super::value::{Value, FN_SUFFIX, NS_SUFFIX};

/// Compile a chunk against the given outer scope (the global namespace
/// names) and the builtin names.
pub fn compile(
    name: &str,
    text: &Arc<str>,
    scope: HashSet<String>,
    builtin: HashSet<String>,
    chunk: &ast::Chunk,
) -> Result<ValuesOp, CompileErrorList> {
    let mut cp = Compiler {
        scopes: vec![scope],
        builtin,
        errors: Vec::new(),
    };
    let op = cp.chunk(chunk);
    if cp.errors.is_empty() {
        Ok(op)
    } else {
        Err(CompileErrorList {
            name: name.to_string(),
            text: text.clone(),
            errors: cp.errors,
        })
    }
}

pub(crate) struct Compiler {
    /// Scope descriptors, outermost first; the last is the scope being
    /// compiled.
    scopes: Vec<HashSet<String>>,
    builtin: HashSet<String>,
    pub(crate) errors: Vec<CompileError>,
}

impl Compiler {
    pub(crate) fn errorf(&mut self, begin: usize, end: usize, msg: impl Into<String>) {
        self.errors.push(CompileError::new(msg, begin, end.max(begin)));
    }

    fn this_scope(&mut self) -> &mut HashSet<String> {
        self.scopes.last_mut().expect("compiler scope stack is never empty")
    }

    pub(crate) fn this_scope_has(&self, name: &str) -> bool {
        self.scopes.last().map(|s| s.contains(name)).unwrap_or(false)
    }

    pub(crate) fn this_scope_del(&mut self, name: &str) {
        self.this_scope().remove(name);
    }

    /// Record a variable set: declare the name in the current scope.
    pub(crate) fn register_set(&mut self, ns: &str, name: &str) {
        if ns.is_empty() || ns == "local" {
            self.this_scope().insert(name.to_string());
        }
    }

    /// Record a variable get. Returns false (after recording a
    /// diagnostic) when the name resolves to nothing: no
    /// namespace-qualified match, no enclosing scope, no builtin.
    pub(crate) fn register_get(
        &mut self,
        ns: &str,
        name: &str,
        begin: usize,
        end: usize,
    ) -> bool {
        let found = match ns {
            "E" => true,
            "local" => self.this_scope_has(name),
            "up" => self.scopes[..self.scopes.len() - 1]
                .iter()
                .any(|s| s.contains(name)),
            "builtin" => self.builtin.contains(name),
            "" => {
                self.scopes.iter().any(|s| s.contains(name)) || self.builtin.contains(name)
            }
            tag => {
                let key = format!("{tag}{NS_SUFFIX}");
                self.scopes.iter().any(|s| s.contains(&key)) || self.builtin.contains(&key)
            }
        };
        if !found {
            let display = if ns.is_empty() {
                name.to_string()
            } else {
                format!("{ns}:{name}")
            };
            self.errorf(begin, end, format!("variable ${display} not found"));
        }
        found
    }

    fn chunk(&mut self, chunk: &ast::Chunk) -> ValuesOp {
        let pipelines = chunk.pipelines.iter().map(|p| self.pipeline(p)).collect();
        ValuesOp {
            begin: chunk.begin,
            end: chunk.end,
            kind: ValuesKind::Chunk(pipelines),
        }
    }

    fn pipeline(&mut self, pipeline: &ast::Pipeline) -> ValuesOp {
        let forms = pipeline
            .forms
            .iter()
            .map(|f| Arc::new(self.form(f)))
            .collect();
        ValuesOp {
            begin: pipeline.begin,
            end: pipeline.end,
            kind: ValuesKind::Pipeline(forms),
        }
    }

    fn form(&mut self, form: &ast::Form) -> ValuesOp {
        let kind = match &form.body {
            ast::FormBody::Assignment { lvalues, rhs } => {
                let targets = self.lvalues(lvalues);
                let rhs = rhs.iter().map(|c| self.compound(c)).collect();
                ValuesKind::Form(Arc::new(FormOp::Assignment {
                    lvalues: targets,
                    rhs,
                }))
            }
            ast::FormBody::Plain { head, args, opts } => {
                if let Some(name) = head.as_bareword() {
                    if is_special(name) {
                        if !opts.is_empty() {
                            let o = &opts[0];
                            self.errorf(o.begin, o.end, format!("{name} takes no options"));
                        }
                        let special = compile_special(self, name, form, args);
                        return ValuesOp {
                            begin: form.begin,
                            end: form.end,
                            kind: ValuesKind::Form(Arc::new(FormOp::Special(special))),
                        };
                    }
                }
                let head_op = match head.as_bareword() {
                    Some(name) => HeadOp::Bare(name.to_string()),
                    None => HeadOp::Expr(Box::new(self.compound(head))),
                };
                let args = args.iter().map(|c| self.compound(c)).collect();
                let opts = opts
                    .iter()
                    .map(|o| (o.name.clone(), self.compound(&o.value)))
                    .collect();
                ValuesKind::Form(Arc::new(FormOp::Ordinary {
                    head: head_op,
                    args,
                    opts,
                }))
            }
        };
        ValuesOp {
            begin: form.begin,
            end: form.end,
            kind,
        }
    }

    pub(crate) fn compound(&mut self, compound: &ast::Compound) -> ValuesOp {
        let parts: Vec<ValuesOp> = compound
            .indexings
            .iter()
            .map(|ix| self.indexing(ix))
            .collect();
        if parts.len() == 1 {
            let mut only = parts;
            return only.remove(0);
        }
        ValuesOp {
            begin: compound.begin,
            end: compound.end,
            kind: ValuesKind::Compound(parts),
        }
    }

    fn indexing(&mut self, indexing: &ast::Indexing) -> ValuesOp {
        let head = self.primary(&indexing.head);
        if indexing.indices.is_empty() {
            return head;
        }
        let indices = indexing
            .indices
            .iter()
            .map(|c| self.compound(c))
            .collect();
        ValuesOp {
            begin: indexing.begin,
            end: indexing.end,
            kind: ValuesKind::Indexing {
                head: Box::new(head),
                indices,
            },
        }
    }

    fn primary(&mut self, primary: &ast::Primary) -> ValuesOp {
        let kind = match &primary.kind {
            PrimaryKind::Bareword(s)
            | PrimaryKind::SingleQuoted(s)
            | PrimaryKind::DoubleQuoted(s) => ValuesKind::Literal(Value::str(s.clone())),
            PrimaryKind::Variable(raw) => {
                let (explode, ns, name) = parse_variable(raw);
                self.register_get(ns, name, primary.begin, primary.end);
                ValuesKind::Variable {
                    explode,
                    ns: ns.to_string(),
                    name: name.to_string(),
                }
            }
            PrimaryKind::Capture(pipeline) => {
                let inner = self.pipeline(pipeline);
                ValuesKind::Capture(Box::new(inner))
            }
            PrimaryKind::List(elems) => {
                ValuesKind::List(elems.iter().map(|c| self.compound(c)).collect())
            }
            PrimaryKind::Map(pairs) => ValuesKind::Map(
                pairs
                    .iter()
                    .map(|(k, v)| (self.compound(k), self.compound(v)))
                    .collect(),
            ),
            PrimaryKind::Lambda { .. } => match self.lambda(primary) {
                Some(lambda) => ValuesKind::Lambda(Arc::new(lambda)),
                None => ValuesKind::Literal(Value::str("")),
            },
        };
        ValuesOp {
            begin: primary.begin,
            end: primary.end,
            kind,
        }
    }

    /// Compile a lambda primary: parameters open a fresh scope for the
    /// body.
    pub(crate) fn lambda(&mut self, primary: &ast::Primary) -> Option<LambdaOp> {
        let PrimaryKind::Lambda { params, body, .. } = &primary.kind else {
            self.errorf(primary.begin, primary.end, "must be a lambda");
            return None;
        };
        let mut names = Vec::new();
        let mut rest = None;
        for param in params {
            let Some(word) = param.as_bareword() else {
                self.errorf(param.begin, param.end, "parameter must be a bareword");
                continue;
            };
            match word.strip_prefix('@') {
                Some(r) => {
                    if rest.is_some() {
                        self.errorf(param.begin, param.end, "only one @rest parameter allowed");
                    } else {
                        rest = Some(r.to_string());
                    }
                }
                None => {
                    if rest.is_some() {
                        self.errorf(
                            param.begin,
                            param.end,
                            "@rest must be the last parameter",
                        );
                    }
                    names.push(word.to_string());
                }
            }
        }
        let mut scope: HashSet<String> = names.iter().cloned().collect();
        if let Some(r) = &rest {
            scope.insert(r.clone());
        }
        self.scopes.push(scope);
        let body_op = self.chunk(body);
        self.scopes.pop();
        Some(LambdaOp {
            params: names,
            rest,
            body: Arc::new(body_op),
            begin: primary.begin,
            end: primary.end,
        })
    }

    fn lvalues(&mut self, compounds: &[ast::Compound]) -> Vec<LValue> {
        let mut out = Vec::new();
        let mut seen_rest = false;
        for c in compounds {
            if let Some(lv) = self.lvalue(c) {
                if lv.rest {
                    if seen_rest {
                        self.errorf(c.begin, c.end, "only one @rest target allowed");
                        continue;
                    }
                    seen_rest = true;
                }
                out.push(lv);
            }
        }
        out
    }

    /// Compile one assignment target: a plain bareword variable,
    /// optionally `@`-prefixed as the rest target.
    pub(crate) fn lvalue(&mut self, compound: &ast::Compound) -> Option<LValue> {
        if compound.indexings.len() != 1 || !compound.indexings[0].indices.is_empty() {
            self.errorf(
                compound.begin,
                compound.end,
                "assignment target must be a plain variable",
            );
            return None;
        }
        let Some(word) = compound.as_bareword() else {
            self.errorf(
                compound.begin,
                compound.end,
                "assignment target must be a bareword",
            );
            return None;
        };
        let (rest, ns, name) = parse_variable(word);
        if name.is_empty() {
            self.errorf(compound.begin, compound.end, "empty variable name");
            return None;
        }
        if rest && !ns.is_empty() {
            self.errorf(
                compound.begin,
                compound.end,
                "@rest target cannot be namespaced",
            );
            return None;
        }
        match ns {
            "" | "local" | "E" => {}
            "up" => {}
            other => {
                let key = format!("{other}{NS_SUFFIX}");
                if !self.scopes.iter().any(|s| s.contains(&key)) {
                    self.errorf(
                        compound.begin,
                        compound.end,
                        format!("cannot assign in unknown namespace {other}:"),
                    );
                    return None;
                }
            }
        }
        self.register_set(ns, name);
        Some(LValue {
            rest,
            ns: ns.to_string(),
            name: name.to_string(),
            begin: compound.begin,
            end: compound.end,
        })
    }

    /// Declare a function name (used by `fn`).
    pub(crate) fn declare_fn(&mut self, name: &str) -> String {
        let var_name = format!("{name}{FN_SUFFIX}");
        self.this_scope().insert(var_name.clone());
        var_name
    }

    /// Declare a namespace name (used by `use`).
    pub(crate) fn declare_ns(&mut self, name: &str) -> String {
        let var_name = format!("{name}{NS_SUFFIX}");
        self.this_scope().insert(var_name.clone());
        var_name
    }
}
