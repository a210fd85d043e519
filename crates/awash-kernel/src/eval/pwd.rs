//! The computed `pwd` variable and the directory-history contract.

use std::sync::Arc;

use super::exc::Exception;
use super::value::Value;
use super::vartypes::Var;
use super::EvalResult;

/// The sink consulted when the process changes directory. The only
/// contract: record that the process changed into directory `dir`.
pub trait AddDirer: Send + Sync {
    fn add_dir(&self, dir: &str);
}

/// A sink that records nothing.
pub struct NullStore;

impl AddDirer for NullStore {
    fn add_dir(&self, _dir: &str) {}
}

/// A variable whose value always reflects the current working
/// directory. Setting it changes the working directory.
pub struct PwdVar {
    store: Arc<dyn AddDirer>,
}

impl PwdVar {
    pub fn new(store: Arc<dyn AddDirer>) -> PwdVar {
        PwdVar { store }
    }
}

impl Var for PwdVar {
    fn get(&self) -> EvalResult<Value> {
        let cwd = std::env::current_dir()
            .map_err(|e| Exception::fail(format!("cannot get working directory: {e}")))?;
        Ok(Value::Str(cwd.to_string_lossy().into_owned()))
    }

    fn set(&self, v: Value) -> EvalResult<()> {
        match v {
            Value::Str(path) => chdir(&path, &self.store),
            _ => Err(Exception::fail("path must be string")),
        }
    }
}

/// Change the working directory and notify the history sink.
pub fn chdir(path: &str, store: &Arc<dyn AddDirer>) -> EvalResult<()> {
    std::env::set_current_dir(path)
        .map_err(|e| Exception::fail(format!("cannot change directory to {path}: {e}")))?;
    if let Ok(abs) = std::env::current_dir() {
        store.add_dir(&abs.to_string_lossy());
    }
    Ok(())
}
