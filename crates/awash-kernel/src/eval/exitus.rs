//! Exitus — the completion status of one command form.
//!
//! Every form in a pipeline evaluates to an exitus value. External
//! commands that exit non-zero produce a `Failure` without raising an
//! exception; user exceptions only become exitus values at display
//! boundaries (the `Status:` line, the except-clause binding).

use std::fmt;

use super::value::Value;

/// A control-flow kind carried by an exitus or an exception cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Return,
    Break,
    Continue,
}

impl FlowKind {
    pub fn keyword(self) -> &'static str {
        match self {
            FlowKind::Return => "return",
            FlowKind::Break => "break",
            FlowKind::Continue => "continue",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A command result.
#[derive(Debug, Clone, PartialEq)]
pub enum Exitus {
    Ok,
    Failure(String),
    Traceback(Vec<Exitus>),
    Flow(FlowKind),
}

impl Exitus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Exitus::Ok)
    }

    /// Render with ANSI colors: green `ok`, bold-red failure message,
    /// `(a | b)` for tracebacks, yellow flow keywords.
    pub fn show(&self) -> String {
        match self {
            Exitus::Ok => "\x1b[32mok\x1b[m".to_string(),
            Exitus::Failure(msg) => format!("\x1b[31;1m{msg}\x1b[m"),
            Exitus::Traceback(causes) => {
                let parts: Vec<String> = causes.iter().map(Exitus::show).collect();
                format!("({})", parts.join(" | "))
            }
            Exitus::Flow(kind) => format!("\x1b[33m{}\x1b[m", kind.keyword()),
        }
    }

    /// Plain-text rendering, used by `Value::repr`.
    pub fn repr(&self) -> String {
        match self {
            Exitus::Ok => "ok".to_string(),
            Exitus::Failure(msg) => format!("(failure {msg})"),
            Exitus::Traceback(causes) => {
                let parts: Vec<String> = causes.iter().map(Exitus::repr).collect();
                format!("({})", parts.join(" | "))
            }
            Exitus::Flow(kind) => kind.keyword().to_string(),
        }
    }
}

/// True if any value in the list is a non-Ok exitus. Non-exitus values
/// are silently ignored.
pub fn has_failure(vs: &[Value]) -> bool {
    vs.iter().any(|v| match v {
        Value::Exitus(e) => !e.is_ok(),
        _ => false,
    })
}

/// The `Status: a | b` line shown when a value list contains failures,
/// or None when everything is ok.
pub fn status_line(vs: &[Value]) -> Option<String> {
    if !has_failure(vs) {
        return None;
    }
    let shown: Vec<String> = vs
        .iter()
        .filter_map(|v| match v {
            Value::Exitus(e) => Some(e.show()),
            _ => None,
        })
        .collect();
    Some(format!("Status: {}", shown.join(" | ")))
}
