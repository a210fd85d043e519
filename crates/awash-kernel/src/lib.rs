//! awash-kernel: the core of awash.
//!
//! This crate provides:
//!
//! - **Lexer**: tokenizes awash source using logos
//! - **Parser**: builds the syntax tree (chunks, pipelines, forms,
//!   compounds) with byte ranges on every node
//! - **Eval**: the evaluator runtime — compiler, frames, ports,
//!   special forms, exceptions

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::{Evaler, EvalError, Exitus, Value};
