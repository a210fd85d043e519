//! awash CLI entry point.
//!
//! Usage:
//!   awash                      # Interactive REPL
//!   awash -c <command>         # Execute command and exit
//!   awash script.elv           # Run a script

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use tokio::runtime::Runtime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use awash_kernel::eval::{has_failure, status_line, Evaler, NullStore, SrcKind, Value};
use awash_kernel::EvalError;

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        None => run_repl(),

        Some("--help" | "-h") => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }

        Some("--version" | "-V") => {
            println!("awash {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }

        Some("-c") => {
            let cmd = args.get(2).context("-c requires a command argument")?;
            run_command(cmd)
        }

        Some(path) if !path.starts_with('-') => run_script(path),

        Some(unknown) => {
            eprintln!("Unknown option: {unknown}");
            eprintln!("Run 'awash --help' for usage.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_help() {
    println!(
        r#"awash v{}

Usage:
  awash                        Interactive REPL
  awash -c <command>           Execute command and exit
  awash <script.elv>           Run a script file

Options:
  -c <command>                 Execute command string and exit
  -h, --help                   Show this help
  -V, --version                Show version

Environment:
  AWASH_LIB                    Module library directory
  RUST_LOG                     Log filter (tracing)
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// The module library directory: $AWASH_LIB, else the XDG data dir.
fn lib_dir() -> Option<PathBuf> {
    if let Some(dir) = env::var_os("AWASH_LIB") {
        return Some(PathBuf::from(dir));
    }
    let data_home = env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))?;
    Some(data_home.join("awash/lib"))
}

fn make_evaler(rt: &Runtime) -> Arc<Evaler> {
    // The evaler spawns its sentinel tasks, so build it inside the
    // runtime.
    let _guard = rt.enter();
    Arc::new(Evaler::new(Arc::new(NullStore), lib_dir()))
}

fn run_command(cmd: &str) -> Result<ExitCode> {
    let rt = Runtime::new().context("failed to create runtime")?;
    let ev = make_evaler(&rt);
    let result = rt.block_on(ev.eval_text("[command]", cmd, SrcKind::Top));
    Ok(report(result))
}

fn run_script(path: &str) -> Result<ExitCode> {
    let rt = Runtime::new().context("failed to create runtime")?;
    let ev = make_evaler(&rt);
    let result = rt.block_on(ev.eval_source(std::path::Path::new(path)));
    Ok(report(result))
}

/// Print the status of a finished evaluation and derive the exit code:
/// non-zero when evaluation failed or the final value list contains a
/// non-Ok exitus.
fn report(result: Result<Vec<Value>, EvalError>) -> ExitCode {
    match result {
        Ok(values) => {
            if let Some(line) = status_line(&values) {
                println!("{line}");
            }
            if has_failure(&values) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("{}", e.show());
            ExitCode::FAILURE
        }
    }
}

fn run_repl() -> Result<ExitCode> {
    let rt = Runtime::new().context("failed to create runtime")?;
    let ev = make_evaler(&rt);

    let mut rl: Editor<(), DefaultHistory> =
        Editor::new().context("failed to initialize line editor")?;

    loop {
        match rl.readline("awash> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);
                let result = rt.block_on(ev.eval_text("[tty]", trimmed, SrcKind::Interactive));
                match result {
                    Ok(values) => {
                        if let Some(line) = status_line(&values) {
                            println!("{line}");
                        }
                    }
                    Err(e) => eprintln!("{}", e.show()),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
