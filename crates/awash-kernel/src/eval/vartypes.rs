//! Variable indirection and namespaces.
//!
//! A `Var` is a cell holding one value: read it, write it, nothing else.
//! Concrete kinds cover plain in-memory cells, environment-backed
//! variables, read-only values and the computed `pwd` variable (in
//! `pwd.rs`). Namespaces map names to variables; names carry suffixes
//! encoding their kind (`~` functions, `:` namespaces).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::exc::Exception;
use super::value::Value;
use super::EvalResult;

/// A mutable cell holding one value.
pub trait Var: Send + Sync {
    fn get(&self) -> EvalResult<Value>;
    fn set(&self, v: Value) -> EvalResult<()>;
}

pub type VarRef = Arc<dyn Var>;

/// A plain in-memory variable.
pub struct PtrVar(RwLock<Value>);

impl PtrVar {
    pub fn new(v: Value) -> PtrVar {
        PtrVar(RwLock::new(v))
    }
}

impl Var for PtrVar {
    fn get(&self) -> EvalResult<Value> {
        Ok(self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set(&self, v: Value) -> EvalResult<()> {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = v;
        Ok(())
    }
}

/// Shorthand: a fresh in-memory variable.
pub fn ptr_var(v: Value) -> VarRef {
    Arc::new(PtrVar::new(v))
}

/// A read-only variable; writing reports an error.
pub struct RoVar(Value);

impl Var for RoVar {
    fn get(&self) -> EvalResult<Value> {
        Ok(self.0.clone())
    }

    fn set(&self, _v: Value) -> EvalResult<()> {
        Err(Exception::fail("variable is read-only"))
    }
}

pub fn ro_var(v: Value) -> VarRef {
    Arc::new(RoVar(v))
}

/// A variable backed by the process environment. Reading an unset
/// variable yields the empty string; writing requires a string value.
pub struct EnvVar {
    name: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>) -> EnvVar {
        EnvVar { name: name.into() }
    }
}

impl Var for EnvVar {
    fn get(&self) -> EvalResult<Value> {
        Ok(Value::Str(std::env::var(&self.name).unwrap_or_default()))
    }

    fn set(&self, v: Value) -> EvalResult<()> {
        match v {
            Value::Str(s) => {
                std::env::set_var(&self.name, s);
                Ok(())
            }
            other => Err(Exception::fail(format!(
                "environment variable needs a string, got {}",
                other.kind()
            ))),
        }
    }
}

/// A namespace: name → variable. Cloning aliases the same map;
/// `fork_copy` duplicates the map while sharing the variable cells.
#[derive(Clone)]
pub struct Ns(Arc<RwLock<HashMap<String, VarRef>>>);

impl Ns {
    pub fn new() -> Ns {
        Ns(Arc::new(RwLock::new(HashMap::new())))
    }

    pub fn get(&self, name: &str) -> Option<VarRef> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn set(&self, name: impl Into<String>, var: VarRef) {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), var);
    }

    pub fn del(&self, name: &str) -> Option<VarRef> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the binding map. The variable cells are shared: the
    /// copy sees value mutations, but adding or removing names in one
    /// map does not touch the other.
    pub fn fork_copy(&self) -> Ns {
        let map = self
            .0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ns(Arc::new(RwLock::new(map)))
    }

    /// Identity comparison (the module-memoization contract).
    pub fn ptr_eq(&self, other: &Ns) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// The closed-over outer scopes of a frame, combined into one view.
///
/// Layers are live aliases, searched front to back: a closure defined
/// at the top level sees functions added to the global namespace after
/// its definition, which is what makes mutually recursive `fn`
/// definitions work.
#[derive(Clone, Default)]
pub struct UpView(Vec<Ns>);

impl UpView {
    pub fn new() -> UpView {
        UpView(Vec::new())
    }

    /// The view a closure captures: the defining frame's local scope in
    /// front of everything that frame could already see.
    pub fn capture(local: &Ns, up: &UpView) -> UpView {
        let mut layers = Vec::with_capacity(up.0.len() + 1);
        layers.push(local.clone());
        layers.extend(up.0.iter().cloned());
        UpView(layers)
    }

    pub fn get(&self, name: &str) -> Option<VarRef> {
        self.0.iter().find_map(|ns| ns.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|ns| ns.has(name))
    }
}

impl fmt::Debug for UpView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpView[{} layers]", self.0.len())
    }
}

impl Default for Ns {
    fn default() -> Ns {
        Ns::new()
    }
}

impl fmt::Debug for Ns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ns{:?}", self.names())
    }
}

/// The error produced by `del_element`, carrying which index level
/// failed so the caller can report the precise sub-range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElemError {
    /// 0 = the variable itself, k = the k-th index (1-based).
    pub level: usize,
    pub msg: String,
}

/// Delete an element inside a variable: `del x[i]`, `del m[a][b]`.
///
/// Reads the value, rebuilds it without the indexed element, writes it
/// back. Values are immutable, so nesting rebuilds each level.
pub fn del_element(var: &VarRef, indices: &[Value]) -> Result<(), ElemError> {
    let current = var.get().map_err(|e| ElemError {
        level: 0,
        msg: e.to_string(),
    })?;
    let updated = del_in(&current, indices, 1)?;
    var.set(updated).map_err(|e| ElemError {
        level: 0,
        msg: e.to_string(),
    })
}

fn del_in(value: &Value, indices: &[Value], level: usize) -> Result<Value, ElemError> {
    let (idx, rest) = match indices.split_first() {
        Some(pair) => pair,
        None => {
            return Err(ElemError {
                level: level - 1,
                msg: "no index to delete".to_string(),
            })
        }
    };
    let key = idx.as_str().ok_or_else(|| ElemError {
        level,
        msg: format!("index must be a string, got {}", idx.kind()),
    })?;
    match value {
        Value::Map(entries) => {
            if rest.is_empty() {
                let mut map = entries.as_ref().clone();
                if map.remove(key).is_none() {
                    return Err(ElemError {
                        level,
                        msg: format!("no such key: {key}"),
                    });
                }
                Ok(Value::Map(Arc::new(map)))
            } else {
                let sub = entries.get(key).ok_or_else(|| ElemError {
                    level,
                    msg: format!("no such key: {key}"),
                })?;
                let rebuilt = del_in(sub, rest, level + 1)?;
                let mut map = entries.as_ref().clone();
                map.insert(key.to_string(), rebuilt);
                Ok(Value::Map(Arc::new(map)))
            }
        }
        Value::List(items) => {
            let i: usize = key.parse().map_err(|_| ElemError {
                level,
                msg: format!("bad list index: {key}"),
            })?;
            if i >= items.len() {
                return Err(ElemError {
                    level,
                    msg: format!("list index out of range: {i}"),
                });
            }
            let mut list = items.as_ref().clone();
            if rest.is_empty() {
                list.remove(i);
            } else {
                list[i] = del_in(&list[i], rest, level + 1)?;
            }
            Ok(Value::List(Arc::new(list)))
        }
        other => Err(ElemError {
            level: level - 1,
            msg: format!("cannot delete element of {}", other.kind()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn ptr_var_get_set() {
        let v = ptr_var(Value::str("a"));
        assert_eq!(v.get().unwrap(), Value::str("a"));
        v.set(Value::str("b")).unwrap();
        assert_eq!(v.get().unwrap(), Value::str("b"));
    }

    #[test]
    fn ro_var_rejects_set() {
        let v = ro_var(Value::Bool(true));
        assert!(v.set(Value::Bool(false)).is_err());
        assert_eq!(v.get().unwrap(), Value::Bool(true));
    }

    #[test]
    fn env_var_round_trip() {
        let v = EnvVar::new("AWASH_VARTYPES_TEST");
        v.set(Value::str("42")).unwrap();
        assert_eq!(v.get().unwrap(), Value::str("42"));
        assert!(v.set(Value::Bool(true)).is_err());
        std::env::remove_var("AWASH_VARTYPES_TEST");
    }

    #[test]
    fn ns_fork_copy_isolates_bindings() {
        let ns = Ns::new();
        ns.set("x", ptr_var(Value::str("1")));
        let copy = ns.fork_copy();
        copy.set("y", ptr_var(Value::str("2")));
        copy.del("x");
        assert!(ns.has("x"));
        assert!(!ns.has("y"));
        assert!(copy.has("y"));
    }

    #[test]
    fn ns_fork_copy_shares_cells() {
        let ns = Ns::new();
        ns.set("x", ptr_var(Value::str("1")));
        let copy = ns.fork_copy();
        copy.get("x").unwrap().set(Value::str("9")).unwrap();
        assert_eq!(ns.get("x").unwrap().get().unwrap(), Value::str("9"));
    }

    #[test]
    fn ns_ptr_eq() {
        let a = Ns::new();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&a.fork_copy()));
    }

    #[test]
    fn del_element_from_map() {
        let mut m = HashMap::new();
        m.insert("k".to_string(), Value::str("v"));
        m.insert("other".to_string(), Value::str("w"));
        let var = ptr_var(Value::map(m));
        del_element(&var, &[Value::str("k")]).unwrap();
        let got = var.get().unwrap();
        assert!(got.index(&Value::str("k")).is_err());
        assert_eq!(got.index(&Value::str("other")).unwrap(), Value::str("w"));
    }

    #[test]
    fn del_element_from_list() {
        let var = ptr_var(Value::list(vec![
            Value::str("a"),
            Value::str("b"),
            Value::str("c"),
        ]));
        del_element(&var, &[Value::str("1")]).unwrap();
        assert_eq!(
            var.get().unwrap(),
            Value::list(vec![Value::str("a"), Value::str("c")])
        );
    }

    #[test]
    fn del_element_nested() {
        let mut inner = HashMap::new();
        inner.insert("x".to_string(), Value::str("1"));
        inner.insert("y".to_string(), Value::str("2"));
        let mut outer = HashMap::new();
        outer.insert("m".to_string(), Value::map(inner));
        let var = ptr_var(Value::map(outer));
        del_element(&var, &[Value::str("m"), Value::str("x")]).unwrap();
        let got = var.get().unwrap();
        let m = got.index(&Value::str("m")).unwrap();
        assert!(m.index(&Value::str("x")).is_err());
        assert_eq!(m.index(&Value::str("y")).unwrap(), Value::str("2"));
    }

    #[test]
    fn del_element_reports_level() {
        let var = ptr_var(Value::str("not indexable"));
        let err = del_element(&var, &[Value::str("0")]).unwrap_err();
        assert_eq!(err.level, 0);

        let mut m = HashMap::new();
        m.insert("k".to_string(), Value::str("v"));
        let var = ptr_var(Value::map(m));
        let err = del_element(&var, &[Value::str("missing")]).unwrap_err();
        assert_eq!(err.level, 1);
    }
}
