//! The evaluator runtime.
//!
//! This module is the heart of awash: it takes a parsed chunk and
//! executes it under a dynamically-typed, pipeline-oriented value
//! model. Evaluation is two-staged — the compiler performs static
//! scope analysis and lowers the tree to operations before any side
//! effect runs — and I/O flows through dual-stream ports (byte files
//! paired with typed value channels).
//!
//! Layering, leaves first: values (`value`, `exitus`) → variables
//! (`vartypes`, `pwd`) → ports (`port`) → exceptions (`exc`) → frames
//! (`frame`) → operations (`op`, `compiler`) → special forms
//! (`builtin_special`) → the `Evaler` in this file.

mod builtin_fn;
mod builtin_special;
mod callable;
mod compiler;
mod exc;
mod exitus;
mod external;
mod frame;
mod op;
mod port;
mod pwd;
mod value;
mod vartypes;

pub use builtin_special::{is_special, DelOp, SpecialOp};
pub use callable::{BuiltinFn, Callable, Closure, Opts};
pub use compiler::compile;
pub use exc::{
    Cause, CompileError, CompileErrorList, EvalError, EvalResult, Exception, TracebackEntry,
};
pub use exitus::{has_failure, status_line, Exitus, FlowKind};
pub use frame::{parse_variable, Frame, SrcKind, SrcMeta};
pub use op::{FormOp, HeadOp, LValue, LambdaOp, ValuesKind, ValuesOp};
pub use port::{close_ports, Chan, Port, PortFile, Sentinels, StdStream, CHAN_BUF};
pub use pwd::{AddDirer, NullStore, PwdVar};
pub use value::{all_true, FnValue, Value, FN_SUFFIX, NS_SUFFIX};
pub use vartypes::{ptr_var, ro_var, EnvVar, Ns, PtrVar, UpView, Var, VarRef};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::ast;
use crate::parser;

/// The marker printed before each value on the top-level output
/// channel.
pub const OUT_CHAN_LEADER: &str = "▶ ";

/// Shared runtime context for all frames: the global namespace, the
/// module cache, search paths, the library directory and the port
/// sentinels.
///
/// Construct it inside an async runtime — the sentinels spawn the
/// blackhole drain task.
pub struct Evaler {
    global: Ns,
    builtin: Ns,
    modules: RwLock<HashMap<String, Ns>>,
    /// Executable search paths, from `PATH` (default `/bin`).
    pub search_paths: Vec<PathBuf>,
    /// Where `use` finds module sources.
    pub lib_dir: Option<PathBuf>,
    /// Bundled module sources, name → text.
    pub bundled: HashMap<String, String>,
    /// The directory-history sink consulted on `pwd` writes.
    pub store: Arc<dyn AddDirer>,
    pub sentinels: Sentinels,
}

impl Evaler {
    pub fn new(store: Arc<dyn AddDirer>, lib_dir: Option<PathBuf>) -> Evaler {
        let search_paths = match std::env::var_os("PATH") {
            Some(ref path) if !path.is_empty() => std::env::split_paths(path).collect(),
            _ => vec![PathBuf::from("/bin")],
        };
        Evaler {
            global: Ns::new(),
            builtin: builtin_fn::make_builtin_ns(store.clone()),
            modules: RwLock::new(HashMap::new()),
            search_paths,
            lib_dir,
            bundled: HashMap::new(),
            store,
            sentinels: port::init_sentinels(),
        }
    }

    /// Add a bundled module (builder style).
    pub fn with_bundled(mut self, name: impl Into<String>, source: impl Into<String>) -> Evaler {
        self.bundled.insert(name.into(), source.into());
        self
    }

    /// Borrow the global namespace.
    pub fn global(&self) -> &Ns {
        &self.global
    }

    /// Borrow the builtin namespace.
    pub fn builtin(&self) -> &Ns {
        &self.builtin
    }

    /// Look up a cached module by resolved path.
    pub fn module(&self, name: &str) -> Option<Ns> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub(crate) fn insert_module(&self, name: &str, ns: Ns) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), ns);
    }

    pub(crate) fn remove_module(&self, name: &str) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub(crate) fn builtin_names(&self) -> HashSet<String> {
        self.builtin.names().into_iter().collect()
    }

    fn global_names(&self) -> HashSet<String> {
        self.global.names().into_iter().collect()
    }

    /// Compile and execute a parsed chunk at top level. The stdout
    /// channel is consumed by a printer task that renders each value
    /// behind the `▶ ` marker.
    pub async fn eval_tree(
        self: &Arc<Self>,
        name: &str,
        text: &str,
        chunk: &ast::Chunk,
    ) -> Result<Vec<Value>, EvalError> {
        self.eval_chunk(name, text, chunk, SrcKind::Top, None).await
    }

    /// Like `eval_tree`, but with port 1 replaced — the seam tests and
    /// embedders use to capture the output channel.
    pub async fn eval_tree_with_out(
        self: &Arc<Self>,
        name: &str,
        text: &str,
        chunk: &ast::Chunk,
        out: Port,
    ) -> Result<Vec<Value>, EvalError> {
        self.eval_chunk(name, text, chunk, SrcKind::Top, Some(out))
            .await
    }

    /// Parse and evaluate a source string.
    pub async fn eval_text(
        self: &Arc<Self>,
        name: &str,
        src: &str,
        kind: SrcKind,
    ) -> Result<Vec<Value>, EvalError> {
        let chunk = parser::parse(name, src)?;
        self.eval_chunk(name, src, &chunk, kind, None).await
    }

    /// Read a file as UTF-8, parse it, and evaluate it with the file
    /// path as the chunk name.
    pub async fn eval_source(self: &Arc<Self>, path: &Path) -> Result<Vec<Value>, EvalError> {
        let src = read_file_utf8(path)?;
        let name = path.display().to_string();
        let chunk = parser::parse(&name, &src)?;
        self.eval_chunk(&name, &src, &chunk, SrcKind::File, None)
            .await
    }

    async fn eval_chunk(
        self: &Arc<Self>,
        name: &str,
        text: &str,
        chunk: &ast::Chunk,
        kind: SrcKind,
        out: Option<Port>,
    ) -> Result<Vec<Value>, EvalError> {
        let text: Arc<str> = Arc::from(text);
        let op = compiler::compile(
            name,
            &text,
            self.global_names(),
            self.builtin_names(),
            chunk,
        )?;

        let (out_port, printer) = match out {
            Some(port) => (port, None),
            None => {
                let chan = Chan::bounded(CHAN_BUF);
                let drain = chan.clone();
                let printer = tokio::spawn(async move {
                    while let Some(v) = drain.recv().await {
                        println!("{OUT_CHAN_LEADER}{}", v.repr());
                    }
                });
                (
                    Port {
                        file: PortFile::Inherit(StdStream::Out),
                        chan,
                        owns_file: false,
                        owns_chan: true,
                    },
                    Some(printer),
                )
            }
        };

        let mut frame = Frame {
            ev: self.clone(),
            src: SrcMeta {
                name: name.to_string(),
                text,
                kind,
            },
            context: "top".to_string(),
            local: self.global.clone(),
            up: UpView::new(),
            ports: vec![
                Port {
                    file: PortFile::Inherit(StdStream::In),
                    chan: self.sentinels.closed_chan.clone(),
                    owns_file: false,
                    owns_chan: false,
                },
                out_port,
                Port {
                    file: PortFile::Inherit(StdStream::Err),
                    chan: self.sentinels.blackhole_chan.clone(),
                    owns_file: false,
                    owns_chan: false,
                },
            ],
            traceback: Vec::new(),
        };

        let result = op.exec(&mut frame).await;
        frame.close_ports();
        if let Some(printer) = printer {
            let _ = printer.await;
        }

        match result {
            Ok(values) => Ok(values),
            Err(e) => Err(EvalError::Exception(escape_flow(e))),
        }
    }
}

/// A flow-control cause reaching the top level is a plain runtime
/// error: "unexpected return" and friends.
fn escape_flow(e: Exception) -> Exception {
    match e.flow_kind() {
        Some(kind) => Exception {
            cause: Cause::Fail(format!("unexpected {}", kind.keyword())),
            traceback: e.traceback,
            inner: e.inner,
        },
        None => e,
    }
}

/// Read a file, rejecting invalid UTF-8 with an error naming the path.
pub fn read_file_utf8(path: &Path) -> Result<String, EvalError> {
    let bytes = std::fs::read(path).map_err(|e| EvalError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|_| EvalError::Io {
        path: path.display().to_string(),
        message: "source is not valid UTF-8".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evaler_has_builtin_and_empty_global() {
        let ev = Evaler::new(Arc::new(NullStore), None);
        assert!(ev.builtin().has("put~"));
        assert!(ev.global().is_empty());
        assert!(!ev.search_paths.is_empty());
    }

    #[tokio::test]
    async fn bundled_builder() {
        let ev = Evaler::new(Arc::new(NullStore), None).with_bundled("m", "x = 1");
        assert_eq!(ev.bundled.get("m").map(String::as_str), Some("x = 1"));
    }

    #[test]
    fn escape_flow_rewrites_flow_causes() {
        let e = escape_flow(Exception::flow(FlowKind::Return));
        assert_eq!(e.to_string(), "unexpected return");
        let e = escape_flow(Exception::fail("boom"));
        assert_eq!(e.to_string(), "boom");
    }
}
