//! Exceptions, compile diagnostics, and the public error type.
//!
//! One runtime error shape, `Exception`, carries a cause, a traceback of
//! source ranges (innermost first), and optionally a chained inner
//! exception from a re-throw. Compile diagnostics use the same annotated
//! rendering but never travel through the exception mechanism.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::exitus::{Exitus, FlowKind};

/// Why an exception was raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cause {
    #[error("{0}")]
    Fail(String),
    #[error("return")]
    Return,
    #[error("break")]
    Break,
    #[error("continue")]
    Continue,
}

/// One frame of a traceback: where in which source, under which context
/// label.
#[derive(Debug, Clone)]
pub struct TracebackEntry {
    pub name: String,
    pub context: String,
    pub text: Arc<str>,
    pub begin: usize,
    pub end: usize,
}

/// A runtime exception.
#[derive(Debug, Clone)]
pub struct Exception {
    pub cause: Cause,
    /// Innermost entry first; the chain reads inside-out.
    pub traceback: Vec<TracebackEntry>,
    /// A chained exception from a re-throw (e.g. a later pipeline stage
    /// that also failed).
    pub inner: Option<Box<Exception>>,
}

impl Exception {
    pub fn fail(msg: impl Into<String>) -> Exception {
        Exception {
            cause: Cause::Fail(msg.into()),
            traceback: Vec::new(),
            inner: None,
        }
    }

    pub fn flow(kind: FlowKind) -> Exception {
        let cause = match kind {
            FlowKind::Return => Cause::Return,
            FlowKind::Break => Cause::Break,
            FlowKind::Continue => Cause::Continue,
        };
        Exception {
            cause,
            traceback: Vec::new(),
            inner: None,
        }
    }

    /// The flow kind, if this exception is control flow rather than an
    /// error.
    pub fn flow_kind(&self) -> Option<FlowKind> {
        match self.cause {
            Cause::Return => Some(FlowKind::Return),
            Cause::Break => Some(FlowKind::Break),
            Cause::Continue => Some(FlowKind::Continue),
            Cause::Fail(_) => None,
        }
    }

    /// Chain another exception under this one.
    pub fn with_inner(mut self, inner: Exception) -> Exception {
        match &mut self.inner {
            Some(existing) => {
                let chained = existing.as_ref().clone().with_inner(inner);
                self.inner = Some(Box::new(chained));
            }
            None => self.inner = Some(Box::new(inner)),
        }
        self
    }

    /// The exitus value this exception presents as (the except-clause
    /// binding, the `Status:` line).
    pub fn to_exitus(&self) -> Exitus {
        match &self.cause {
            Cause::Fail(msg) => Exitus::Failure(msg.clone()),
            Cause::Return => Exitus::Flow(FlowKind::Return),
            Cause::Break => Exitus::Flow(FlowKind::Break),
            Cause::Continue => Exitus::Flow(FlowKind::Continue),
        }
    }

    /// Full diagnostic rendering: the cause, then each traceback entry
    /// with an annotated source excerpt.
    pub fn show(&self) -> String {
        let mut out = format!("Exception: {}", self.cause);
        for entry in &self.traceback {
            out.push('\n');
            out.push_str(&format!("  {} ({}):\n", entry.name, entry.context));
            out.push_str(&indent(&excerpt(&entry.text, entry.begin, entry.end), 4));
        }
        if let Some(inner) = &self.inner {
            out.push_str("\nAlso: ");
            out.push_str(&inner.show());
        }
        out
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for Exception {}

/// Result alias used throughout the evaluator.
pub type EvalResult<T> = Result<T, Exception>;

/// A static diagnostic with a source range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{msg}")]
pub struct CompileError {
    pub msg: String,
    pub begin: usize,
    pub end: usize,
}

impl CompileError {
    pub fn new(msg: impl Into<String>, begin: usize, end: usize) -> CompileError {
        CompileError {
            msg: msg.into(),
            begin,
            end,
        }
    }
}

/// All diagnostics from one compile (or parse) pass, reported together.
#[derive(Debug, Clone)]
pub struct CompileErrorList {
    pub name: String,
    pub text: Arc<str>,
    pub errors: Vec<CompileError>,
}

impl CompileErrorList {
    pub fn new(name: &str, text: &str, errors: Vec<CompileError>) -> CompileErrorList {
        CompileErrorList {
            name: name.to_string(),
            text: Arc::from(text),
            errors,
        }
    }

    pub fn single(name: &str, text: &str, error: CompileError) -> CompileErrorList {
        CompileErrorList::new(name, text, vec![error])
    }
}

impl fmt::Display for CompileErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "compile error: {} ({})", e.msg, self.name)?;
            write!(f, "{}", excerpt(&self.text, e.begin, e.end))?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrorList {}

/// The error returned from top-level evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("{0}")]
    Compile(#[from] CompileErrorList),
    #[error("{0}")]
    Exception(#[from] Exception),
    #[error("{path}: {message}")]
    Io { path: String, message: String },
}

impl EvalError {
    /// Full diagnostic rendering for display to the user.
    pub fn show(&self) -> String {
        match self {
            EvalError::Compile(list) => list.to_string(),
            EvalError::Exception(e) => e.show(),
            EvalError::Io { .. } => self.to_string(),
        }
    }
}

/// Render the source line containing `[begin, end)` with carets under
/// the range.
pub fn excerpt(text: &str, begin: usize, end: usize) -> String {
    let begin = begin.min(text.len());
    let end = end.clamp(begin, text.len());
    let line_start = text[..begin].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[begin..]
        .find('\n')
        .map(|i| begin + i)
        .unwrap_or(text.len());
    let line = &text[line_start..line_end];
    let col = text[line_start..begin].chars().count();
    let width = text[begin..end.min(line_end)].chars().count().max(1);
    let line_no = text[..line_start].matches('\n').count() + 1;
    format!(
        "line {line_no}: {line}\n{}{}",
        " ".repeat(col + "line : ".len() + line_no.to_string().len()),
        "^".repeat(width)
    )
}

fn indent(s: &str, n: usize) -> String {
    let pad = " ".repeat(n);
    s.lines()
        .map(|l| format!("{pad}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_display() {
        assert_eq!(Cause::Fail("boom".into()).to_string(), "boom");
        assert_eq!(Cause::Return.to_string(), "return");
    }

    #[test]
    fn flow_kinds() {
        assert_eq!(
            Exception::flow(FlowKind::Break).flow_kind(),
            Some(FlowKind::Break)
        );
        assert_eq!(Exception::fail("x").flow_kind(), None);
    }

    #[test]
    fn to_exitus_maps_causes() {
        assert_eq!(
            Exception::fail("boom").to_exitus(),
            Exitus::Failure("boom".into())
        );
        assert_eq!(
            Exception::flow(FlowKind::Continue).to_exitus(),
            Exitus::Flow(FlowKind::Continue)
        );
    }

    #[test]
    fn inner_chain_appends_at_the_end() {
        let e = Exception::fail("first")
            .with_inner(Exception::fail("second"))
            .with_inner(Exception::fail("third"));
        let i1 = e.inner.as_ref().unwrap();
        assert_eq!(i1.cause, Cause::Fail("second".into()));
        let i2 = i1.inner.as_ref().unwrap();
        assert_eq!(i2.cause, Cause::Fail("third".into()));
    }

    #[test]
    fn excerpt_points_at_range() {
        let text = "put hello\nput world";
        let e = excerpt(text, 14, 19);
        assert!(e.contains("line 2: put world"));
        assert!(e.contains("^^^^^"));
    }

    #[test]
    fn compile_error_list_renders_all() {
        let list = CompileErrorList::new(
            "test",
            "put $x",
            vec![
                CompileError::new("variable $x not found", 4, 6),
                CompileError::new("another", 0, 3),
            ],
        );
        let s = list.to_string();
        assert!(s.contains("variable $x not found"));
        assert!(s.contains("another"));
    }
}
