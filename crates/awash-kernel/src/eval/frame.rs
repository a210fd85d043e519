//! The execution frame: one evaluation's context.
//!
//! A frame owns a reference to the shared evaluator, source metadata
//! for diagnostics, the local and up namespaces, and the port list.
//! After creation it is structurally immutable except for `local`,
//! which forms like `fn` and `del` mutate.
//!
//! Forking produces a copy with the ports forked (ownership flags
//! cleared), the local binding map copied, and a new context label.
//! Value mutation still flows through the shared variable cells, but a
//! fork adding or deleting bindings never touches its parent.

use std::sync::Arc;

use super::callable::{Callable, Opts};
use super::exc::{Exception, TracebackEntry};
use super::port::{close_ports, Port};
use super::value::{FnValue, Value, NS_SUFFIX};
use super::vartypes::{EnvVar, Ns, UpView, VarRef};
use super::{Evaler, EvalResult};

/// Where a piece of source came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SrcKind {
    /// A top-level chunk handed to the evaluator.
    Top,
    /// A file evaluated as a script.
    File,
    /// A module body loaded by `use`.
    Module,
    /// An interactive line.
    Interactive,
}

/// Source metadata carried for diagnostics. For modules, `name` is the
/// resolved module path (relative `use` resolves against it).
#[derive(Clone, Debug)]
pub struct SrcMeta {
    pub name: String,
    pub text: Arc<str>,
    pub kind: SrcKind,
}

/// One evaluation's execution context.
#[derive(Clone)]
pub struct Frame {
    pub ev: Arc<Evaler>,
    pub src: SrcMeta,
    /// Diagnostic context label ("top", "if cond", "while", ...).
    pub context: String,
    pub local: Ns,
    pub up: UpView,
    pub ports: Vec<Port>,
    /// Lineage for traceback composition, outermost first.
    pub traceback: Vec<TracebackEntry>,
}

impl Frame {
    /// A copy with forked ports, a copied local binding map, and a new
    /// context label.
    pub fn fork(&self, context: &str) -> Frame {
        Frame {
            ev: self.ev.clone(),
            src: self.src.clone(),
            context: context.to_string(),
            local: self.local.fork_copy(),
            up: self.up.clone(),
            ports: self.ports.iter().map(Port::fork).collect(),
            traceback: self.traceback.clone(),
        }
    }

    /// `ports[i]`, treating the list as if it had an infinite nil tail.
    pub fn port(&self, i: usize) -> Option<&Port> {
        self.ports.get(i)
    }

    /// Grow the port list to at least `n` entries, padding with nil
    /// ports.
    pub fn grow_ports(&mut self, n: usize) {
        while self.ports.len() < n {
            self.ports.push(Port::nil());
        }
    }

    pub fn set_port(&mut self, i: usize, port: Port) {
        self.grow_ports(i + 1);
        self.ports[i] = port;
    }

    /// Send a value on the output channel (port 1). Sending to a
    /// missing or closed port silently drops the value.
    pub async fn output(&self, v: Value) {
        if let Some(port) = self.port(1) {
            port.chan.send(v).await;
        }
    }

    /// Receive the next value from the input channel (port 0); None at
    /// end-of-stream or when the port is missing.
    pub async fn input(&self) -> Option<Value> {
        match self.port(0) {
            Some(port) => port.chan.recv().await,
            None => None,
        }
    }

    /// Write bytes to the output byte stream (port 1).
    pub fn output_bytes(&self, bytes: &[u8]) -> EvalResult<()> {
        match self.port(1) {
            Some(port) => port
                .file
                .write_all(bytes)
                .map_err(|e| Exception::fail(format!("write: {e}"))),
            None => Ok(()),
        }
    }

    pub fn close_ports(&self) {
        close_ports(&self.ports);
    }

    /// A traceback entry pointing at `[begin, end)` in this frame's
    /// source.
    pub fn entry(&self, begin: usize, end: usize) -> TracebackEntry {
        TracebackEntry {
            name: self.src.name.clone(),
            context: self.context.clone(),
            text: self.src.text.clone(),
            begin,
            end,
        }
    }

    /// Build a positioned exception: the failing range first, then the
    /// recorded lineage, so the chain reads inside-out.
    pub fn errorf(&self, begin: usize, end: usize, msg: impl Into<String>) -> Exception {
        self.position(Exception::fail(msg), begin, end)
    }

    /// Attach this frame's position to an exception that does not have
    /// one yet.
    pub fn position(&self, mut e: Exception, begin: usize, end: usize) -> Exception {
        e.traceback.push(self.entry(begin, end));
        for entry in self.traceback.iter().rev() {
            e.traceback.push(entry.clone());
        }
        e
    }

    /// Invoke a callable. This is a traceback boundary: an exception
    /// from the call gains the call-site range before propagating.
    pub async fn pcall(
        &mut self,
        f: &FnValue,
        args: Vec<Value>,
        opts: Opts,
        begin: usize,
        end: usize,
    ) -> EvalResult<()> {
        let result = match f {
            FnValue::Builtin(b) => {
                let mut frame = self.fork(&b.label());
                frame.traceback.push(self.entry(begin, end));
                b.call(&mut frame, args, opts).await
            }
            FnValue::Closure(c) => {
                let mut frame = self.fork(&c.label());
                frame.traceback.push(self.entry(begin, end));
                c.call(&mut frame, args, opts).await
            }
        };
        result.map_err(|e| {
            if e.traceback.is_empty() {
                self.position(e, begin, end)
            } else {
                e
            }
        })
    }

    /// Resolve a variable under a namespace tag. `local`, `up`, `E` and
    /// `builtin` are reserved; any other tag names a namespace bound in
    /// scope (`use m` binds `m:`). The empty tag searches local, then
    /// up, then builtin.
    pub fn resolve_var(&self, ns: &str, name: &str) -> Option<VarRef> {
        match ns {
            "E" => Some(Arc::new(EnvVar::new(name))),
            "local" => self.local.get(name),
            "up" => self.up.get(name),
            "builtin" => self.ev.builtin().get(name),
            "" => self
                .local
                .get(name)
                .or_else(|| self.up.get(name))
                .or_else(|| self.ev.builtin().get(name)),
            tag => {
                let ns_var = self.resolve_var("", &format!("{tag}{NS_SUFFIX}"))?;
                match ns_var.get().ok()? {
                    Value::Ns(module) => module.get(name),
                    _ => None,
                }
            }
        }
    }
}

/// Split a raw variable name into (explode, namespace tag, name).
///
/// `@x` → exploded; `a:b:x` → tag `a:b`, name `x`. A trailing colon
/// stays part of the name, so `$m:` refers to the namespace variable
/// itself.
pub fn parse_variable(raw: &str) -> (bool, &str, &str) {
    let (explode, rest) = match raw.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    match rest[..rest.len().saturating_sub(1)].rfind(':') {
        Some(i) => (explode, &rest[..i], &rest[i + 1..]),
        None => (explode, "", rest),
    }
}
