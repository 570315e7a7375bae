//! Runtime values for the shell core.
//!
//! [`Value`] is the tagged union every token evaluates to and every command
//! receives and returns. Scalars, lists, and maps are plain data; callables
//! and opaque host handles are reference-counted trait objects compared by
//! identity. [`ArgList`] is the shared parameter storage behind `$args` and
//! `$argv` — two views over one vector, so mutating an index through either
//! view is observed by the other.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ShellError};
use crate::session::Session;

/// A callable shell value: a registered command, a host function, or a
/// closure literal.
#[async_trait]
pub trait Callable: Send + Sync {
    /// Invoke with a materialised argument list.
    async fn invoke(&self, session: &Arc<Session>, args: Vec<Value>) -> Result<Value>;

    /// Short form used when the callable is displayed.
    fn describe(&self) -> String {
        "function".to_string()
    }
}

/// A host-object handle. The evaluator never looks inside one; method calls
/// on opaque values are delegated to the host invoker.
pub trait OpaqueValue: Any + Send + Sync {
    /// Host-side type tag, e.g. `"bundle"`.
    fn type_name(&self) -> &str;

    /// Downcast access for hosts that know the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Display form.
    fn render(&self) -> String;
}

impl OpaqueValue for ShellError {
    fn type_name(&self) -> &str {
        "error"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn render(&self) -> String {
        self.to_string()
    }
}

/// Shared parameter storage with two display views.
///
/// The joined view (`$args`) stringifies by joining elements with single
/// spaces and yields `Null` for out-of-range reads, so `{ a$args }` invoked
/// with `1 2` expands to `a1 2` rather than `a[1, 2]`. The raw view
/// (`$argv`) displays like an ordinary list. Both views share one vector;
/// [`ArgList::same`] compares that storage identity, which is how the
/// statement driver recognises a bare `$args` to splice.
#[derive(Clone)]
pub struct ArgList {
    items: Arc<RwLock<Vec<Value>>>,
    joined: bool,
}

impl ArgList {
    /// New joined-view list over fresh storage.
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
            joined: true,
        }
    }

    /// The raw (`$argv`) view over the same storage.
    pub fn raw_view(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            joined: false,
        }
    }

    /// The joined (`$args`) view over the same storage.
    pub fn joined_view(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            joined: true,
        }
    }

    /// True when both lists are views over the same storage.
    pub fn same(&self, other: &ArgList) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }

    /// True for the display-joined (`$args`) view.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Element at `index`, or `Null` when out of range.
    pub fn get(&self, index: usize) -> Value {
        self.read().get(index).cloned().unwrap_or(Value::Null)
    }

    /// Replace the element at `index`. Returns false when out of range.
    /// The write is observed by every view sharing this storage.
    pub fn set(&self, index: usize, value: Value) -> bool {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Value>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Display for ArgList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.read();
        if self.joined {
            let mut first = true;
            for item in items.iter() {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{item}")?;
                first = false;
            }
            Ok(())
        } else {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, "]")
        }
    }
}

impl fmt::Debug for ArgList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArgList({})", self.raw_view())
    }
}

/// The tagged union of all shell values.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Insertion-ordered mapping with text keys.
    Map(IndexMap<String, Value>),
    /// Invocable value; compared by identity.
    Callable(Arc<dyn Callable>),
    /// Host-object handle; compared by identity.
    Opaque(Arc<dyn OpaqueValue>),
    /// Shared parameter list (`$args` / `$argv`).
    Args(ArgList),
}

impl Value {
    /// Text content when this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Shell truthiness: null, false, zero, and empty text are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Callable(_) | Value::Opaque(_) => true,
            Value::Args(args) => !args.is_empty(),
        }
    }

    /// Type tag for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Callable(_) => "function",
            Value::Opaque(_) => "object",
            Value::Args(_) => "args",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            // {:?} keeps a trailing ".0" on integral floats, so the
            // text form round-trips back to Float through the eval ladder.
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                write!(f, "}}")
            }
            Value::Callable(c) => write!(f, "{}", c.describe()),
            Value::Opaque(o) => write!(f, "{}", o.render()),
            Value::Args(args) => write!(f, "{args}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Callable(c) => write!(f, "Callable({})", c.describe()),
            Value::Opaque(o) => write!(f, "Opaque({})", o.type_name()),
            Value::Args(args) => write!(f, "Args({args})"),
            other => write!(f, "{other}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => Arc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            (Value::Args(a), Value::Args(b)) => a.same(b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Convert a value to its JSON representation.
///
/// Callables, opaque handles, and parameter lists have no structural JSON
/// form; they serialize as their display text. NaN and infinite floats
/// become `null`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        other => serde_json::Value::String(other.to_string()),
    }
}

/// Convert JSON to a value. Integral numbers become `Int`, everything else
/// maps structurally.
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        value_to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(json_to_value(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_list_views_share_storage() {
        let args = ArgList::new(vec![Value::Int(1), Value::Int(2)]);
        let raw = args.raw_view();

        assert!(args.same(&raw));
        assert!(args.set(0, Value::Text("one".into())));
        assert_eq!(raw.get(0), Value::Text("one".into()));
    }

    #[test]
    fn arg_list_out_of_range_is_null() {
        let args = ArgList::new(vec![Value::Int(1)]);
        assert_eq!(args.get(5), Value::Null);
    }

    #[test]
    fn arg_list_display_views() {
        let args = ArgList::new(vec![Value::Text("a".into()), Value::Int(2)]);
        assert_eq!(args.to_string(), "a 2");
        assert_eq!(args.raw_view().to_string(), "[a, 2]");
    }

    #[test]
    fn distinct_storage_is_not_same() {
        let a = ArgList::new(vec![Value::Int(1)]);
        let b = ArgList::new(vec![Value::Int(1)]);
        assert!(!a.same(&b));
    }

    #[test]
    fn display_round_trip_forms() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(3.5).to_string(), "3.5");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Text("hi".into()).to_string(), "hi");
    }

    #[test]
    fn display_collections() {
        let list = Value::List(vec![Value::Int(1), Value::Text("b".into())]);
        assert_eq!(list.to_string(), "[1, b]");

        let mut map = IndexMap::new();
        map.insert("k".to_string(), Value::Int(1));
        map.insert("j".to_string(), Value::Text("x".into()));
        assert_eq!(Value::Map(map).to_string(), "{k=1, j=x}");
    }

    #[test]
    fn json_round_trip() {
        let mut map = IndexMap::new();
        map.insert("n".to_string(), Value::Int(3));
        map.insert("xs".to_string(), Value::List(vec![Value::Bool(false)]));
        let value = Value::Map(map);

        let json = value_to_json(&value);
        assert_eq!(json_to_value(json), value);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Text(String::new()).truthy());
        assert!(Value::Int(1).truthy());
        assert!(Value::Text("x".into()).truthy());
    }

    #[test]
    fn opaque_error_downcast() {
        let err: Arc<dyn OpaqueValue> = Arc::new(ShellError::CommandNotFound { name: "z".into() });
        assert_eq!(err.type_name(), "error");
        let shell_err = err
            .as_any()
            .downcast_ref::<ShellError>()
            .expect("downcast to ShellError");
        assert!(matches!(shell_err, ShellError::CommandNotFound { .. }));
    }
}
