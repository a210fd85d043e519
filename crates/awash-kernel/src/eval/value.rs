//! The dynamic value model.
//!
//! Values are immutable; compound payloads sit behind `Arc` so cloning a
//! value is cheap and two frames can hold the same list without copying.
//! Mutation happens only through the `Var` indirection in `vartypes`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::callable::{BuiltinFn, Closure};
use super::exc::Exception;
use super::exitus::Exitus;
use super::vartypes::Ns;
use super::EvalResult;

/// Suffix marking function names in a namespace (`put` is stored as `put~`).
pub const FN_SUFFIX: &str = "~";
/// Suffix marking namespace names (`use m` binds `m:`).
pub const NS_SUFFIX: &str = ":";

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Str(String),
    Bool(bool),
    Exitus(Exitus),
    List(Arc<Vec<Value>>),
    Map(Arc<HashMap<String, Value>>),
    Fn(FnValue),
    Ns(Ns),
}

/// A callable value: a builtin function or a user closure.
#[derive(Clone)]
pub enum FnValue {
    Builtin(Arc<BuiltinFn>),
    Closure(Arc<Closure>),
}

impl FnValue {
    pub fn name(&self) -> String {
        match self {
            FnValue::Builtin(b) => b.name.to_string(),
            FnValue::Closure(_) => "<closure>".to_string(),
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn map(entries: HashMap<String, Value>) -> Value {
        Value::Map(Arc::new(entries))
    }

    /// The kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Exitus(_) => "exitus",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Fn(_) => "fn",
            Value::Ns(_) => "ns",
        }
    }

    /// Canonical representation, as printed after the `▶ ` marker.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => quote(s),
            Value::Bool(true) => "$true".to_string(),
            Value::Bool(false) => "$false".to_string(),
            Value::Exitus(e) => e.repr(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", parts.join(" "))
            }
            Value::Map(entries) => {
                if entries.is_empty() {
                    return "[&]".to_string();
                }
                let mut keys: Vec<&String> = entries.keys().collect();
                keys.sort();
                let parts: Vec<String> = keys
                    .iter()
                    .map(|k| format!("&{}={}", quote(k), entries[*k].repr()))
                    .collect();
                format!("[{}]", parts.join(" "))
            }
            Value::Fn(f) => match f {
                FnValue::Builtin(b) => format!("<builtin {}>", b.name),
                FnValue::Closure(_) => "<closure>".to_string(),
            },
            Value::Ns(_) => "<ns>".to_string(),
        }
    }

    /// Truthiness: false is `$false`, the empty string, a string that
    /// parses to numeric zero, and empty lists/maps. Failures and flow
    /// exituses are false; everything else is true.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty() && s.parse::<f64>().map(|n| n != 0.0).unwrap_or(true),
            Value::Bool(b) => *b,
            Value::Exitus(e) => e.is_ok(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Fn(_) | Value::Ns(_) => true,
        }
    }

    /// The iteration protocol. Lists iterate their elements; everything
    /// else reports that it cannot be iterated.
    pub fn iterate(&self) -> EvalResult<Vec<Value>> {
        match self {
            Value::List(items) => Ok(items.as_ref().clone()),
            other => Err(Exception::fail(format!(
                "cannot iterate {}",
                other.kind()
            ))),
        }
    }

    /// The indexing protocol: lists by numeric index, maps by key.
    pub fn index(&self, idx: &Value) -> EvalResult<Value> {
        match self {
            Value::List(items) => {
                let key = idx.as_str().ok_or_else(|| {
                    Exception::fail(format!("list index must be a string, got {}", idx.kind()))
                })?;
                let i: usize = key
                    .parse()
                    .map_err(|_| Exception::fail(format!("bad list index: {key}")))?;
                items
                    .get(i)
                    .cloned()
                    .ok_or_else(|| Exception::fail(format!("list index out of range: {i}")))
            }
            Value::Map(entries) => {
                let key = idx.as_str().ok_or_else(|| {
                    Exception::fail(format!("map key must be a string, got {}", idx.kind()))
                })?;
                entries
                    .get(key)
                    .cloned()
                    .ok_or_else(|| Exception::fail(format!("no such key: {key}")))
            }
            other => Err(Exception::fail(format!("cannot index {}", other.kind()))),
        }
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The string form used for external command arguments and string
    /// concatenation contexts.
    pub fn to_arg_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }
}

/// True when every value in the list is true-ish.
pub fn all_true(vs: &[Value]) -> bool {
    vs.iter().all(Value::to_bool)
}

/// Quote a string for repr: barewords pass through, anything else is
/// single-quoted.
fn quote(s: &str) -> String {
    let bare = !s.is_empty()
        && s.chars().all(|c| {
            c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '~' | '+' | '%' | '@')
        });
    if bare {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "''"))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Exitus(e) => write!(f, "Exitus({e:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Value::Fn(fv) => write!(f, "Fn({})", fv.name()),
            Value::Ns(_) => write!(f, "Ns"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Exitus(a), Value::Exitus(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Fn(FnValue::Builtin(a)), Value::Fn(FnValue::Builtin(b))) => {
                Arc::ptr_eq(a, b)
            }
            (Value::Fn(FnValue::Closure(a)), Value::Fn(FnValue::Closure(b))) => {
                Arc::ptr_eq(a, b)
            }
            (Value::Ns(a), Value::Ns(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_strings() {
        assert_eq!(Value::str("abc").repr(), "abc");
        assert_eq!(Value::str("a b").repr(), "'a b'");
        assert_eq!(Value::str("").repr(), "''");
        assert_eq!(Value::str("it's").repr(), "'it''s'");
    }

    #[test]
    fn repr_bools_and_lists() {
        assert_eq!(Value::Bool(true).repr(), "$true");
        assert_eq!(
            Value::list(vec![Value::str("a"), Value::Bool(false)]).repr(),
            "[a $false]"
        );
    }

    #[test]
    fn repr_maps_sorted() {
        let mut m = HashMap::new();
        m.insert("b".to_string(), Value::str("2"));
        m.insert("a".to_string(), Value::str("1"));
        assert_eq!(Value::map(m).repr(), "[&a=1 &b=2]");
        assert_eq!(Value::map(HashMap::new()).repr(), "[&]");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Bool(false).to_bool());
        assert!(!Value::str("").to_bool());
        assert!(!Value::str("0").to_bool());
        assert!(!Value::str("0.0").to_bool());
        assert!(Value::str("1").to_bool());
        assert!(Value::str("x").to_bool());
        assert!(!Value::list(vec![]).to_bool());
        assert!(Value::list(vec![Value::str("a")]).to_bool());
        assert!(!Value::Exitus(Exitus::Failure("no".into())).to_bool());
        assert!(Value::Exitus(Exitus::Ok).to_bool());
    }

    #[test]
    fn iterate_lists_only() {
        let l = Value::list(vec![Value::str("a"), Value::str("b")]);
        assert_eq!(l.iterate().unwrap().len(), 2);
        assert!(Value::str("ab").iterate().is_err());
    }

    #[test]
    fn index_list_and_map() {
        let l = Value::list(vec![Value::str("a"), Value::str("b")]);
        assert_eq!(l.index(&Value::str("1")).unwrap(), Value::str("b"));
        assert!(l.index(&Value::str("7")).is_err());
        assert!(l.index(&Value::str("x")).is_err());

        let mut m = HashMap::new();
        m.insert("k".to_string(), Value::str("v"));
        let m = Value::map(m);
        assert_eq!(m.index(&Value::str("k")).unwrap(), Value::str("v"));
        assert!(m.index(&Value::str("missing")).is_err());
    }

    #[test]
    fn equality_is_structural_for_data() {
        assert_eq!(Value::str("x"), Value::str("x"));
        assert_ne!(Value::str("x"), Value::Bool(true));
        assert_eq!(
            Value::list(vec![Value::str("a")]),
            Value::list(vec![Value::str("a")])
        );
    }
}
