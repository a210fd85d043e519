//! External command linkage.
//!
//! Commands whose head resolves to no function are spawned as host
//! processes with their standard streams bound to the frame's port
//! files. A non-zero exit is an ordinary `Failure` exitus, not an
//! exception; only spawn-level problems are worth a message.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::exitus::Exitus;
use super::frame::Frame;
use super::port::PortFile;
use super::value::Value;
use super::EvalResult;

/// Run an external command bound to the frame's ports and wait for it.
pub async fn exec_external(
    fm: &Frame,
    name: &str,
    args: Vec<Value>,
    _begin: usize,
    _end: usize,
) -> EvalResult<Exitus> {
    let path = match resolve(fm, name) {
        Some(p) => p,
        None => return Ok(Exitus::Failure(format!("{name}: command not found"))),
    };

    let argv: Vec<String> = args.iter().map(Value::to_arg_string).collect();
    let mut cmd = Command::new(&path);
    cmd.args(&argv)
        .stdin(port_stdio(fm, 0))
        .stdout(port_stdio(fm, 1))
        .stderr(port_stdio(fm, 2));

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return Ok(Exitus::Failure(format!("{name}: {e}"))),
    };
    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => return Ok(Exitus::Failure(format!("{name}: wait: {e}"))),
    };

    if status.success() {
        Ok(Exitus::Ok)
    } else {
        match status.code() {
            Some(code) => Ok(Exitus::Failure(format!("{name}: exited with {code}"))),
            None => Ok(Exitus::Failure(format!("{name}: killed by signal"))),
        }
    }
}

fn port_stdio(fm: &Frame, index: usize) -> std::process::Stdio {
    match fm.port(index) {
        Some(port) => port.file.to_stdio(),
        None => PortFile::None.to_stdio(),
    }
}

/// Resolve a command name: paths with a slash are used as-is, plain
/// names are searched along the evaluator's search paths.
fn resolve(fm: &Frame, name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    for dir in &fm.ev.search_paths {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
