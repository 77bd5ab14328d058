//! The rich value model exchanged with the remote interpreter.
//!
//! Unlike the wire form ([`serde_json::Value`] plus a mask), a [`Value`] can
//! carry functions: either a local handler exposed to the remote side, or a
//! stub for a function the remote side owns. The codec converts between the
//! two representations.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::channel::RemoteFunction;

/// Boxed async handler backing a local callback.
pub type Callback = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Vec<Value>> + Send + Sync>;

/// A value as seen by bridge callers: JSON-shaped data plus functions.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Str(String),
    Array(Vec<Value>),
    /// String-keyed map; key order carries no meaning.
    Map(BTreeMap<String, Value>),
    Function(FunctionRef),
}

/// A callable leaf. Local functions are owned handlers the remote side can
/// invoke by id; remote functions are capability references whose invocation
/// is always an explicit round trip over the channel.
#[derive(Clone)]
pub enum FunctionRef {
    Local(Callback),
    Remote(RemoteFunction),
}

impl Value {
    /// Wraps an async closure as a callable value. Packing it registers the
    /// closure as a local callback and transmits its id.
    pub fn callback<F, Fut>(handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Value>> + Send + 'static,
    {
        Value::Function(FunctionRef::Local(Arc::new(move |args| {
            Box::pin(handler(args))
        })))
    }

    /// Converts plain wire data. Function references cannot appear here;
    /// that resolution needs a mask and a channel (see the codec).
    pub fn from_wire(wire: serde_json::Value) -> Self {
        match wire {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_wire).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_wire(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(serde_json::Number::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (
                Value::Function(FunctionRef::Local(a)),
                Value::Function(FunctionRef::Local(b)),
            ) => Arc::ptr_eq(a, b),
            (
                Value::Function(FunctionRef::Remote(a)),
                Value::Function(FunctionRef::Remote(b)),
            ) => a.id() == b.id() && a.same_channel(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Map(entries) => f.debug_map().entries(entries).finish(),
            Value::Function(FunctionRef::Local(_)) => f.write_str("Function(<local>)"),
            Value::Function(FunctionRef::Remote(r)) => write!(f, "Function({:?})", r.id()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Function(FunctionRef::Local(_)) => f.write_str("<function>"),
            Value::Function(FunctionRef::Remote(r)) => write!(f, "<function {}>", r.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_wire_preserves_structure() {
        let wire = json!({"a": [1, "two", true, null], "b": {"c": 3.5}});
        let value = Value::from_wire(wire);
        let Value::Map(entries) = &value else {
            panic!("expected map");
        };
        assert_eq!(
            entries["a"],
            Value::Array(vec![
                Value::from(1i64),
                Value::from("two"),
                Value::from(true),
                Value::Null,
            ])
        );
        let Value::Map(inner) = &entries["b"] else {
            panic!("expected nested map");
        };
        assert_eq!(inner["c"], Value::from(3.5));
    }

    #[test]
    fn function_values_compare_by_identity() {
        let a = Value::callback(|_| async { Vec::new() });
        let b = Value::callback(|_| async { Vec::new() });
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_json_like() {
        let value = Value::Array(vec![
            Value::Null,
            Value::from("hi"),
            Value::from(2i64),
            Value::Map(BTreeMap::from([("k".to_string(), Value::from(false))])),
        ]);
        assert_eq!(value.to_string(), r#"[null, "hi", 2, {"k": false}]"#);
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(7i64).as_i64(), Some(7));
        assert_eq!(Value::from("s").as_str(), Some("s"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Null.as_i64(), None);
    }
}
