//! Runtime values produced by graph nodes.
//!
//! A [`Value`] is a cheap handle: cloning it never copies strings or list
//! contents. Lists grow through [`Value::push`], which is copy-on-write, so a
//! value handed out before an append keeps its old contents.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The result of evaluating a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value. Also the "false" result of boolean nodes.
    #[default]
    Null,
    Number(i64),
    Float(f64),
    String(Arc<str>),
    List(Arc<Vec<Value>>),
}

impl Value {
    /// The value boolean nodes produce for "true".
    pub fn true_value() -> Self {
        Value::Number(1)
    }

    pub fn empty_list() -> Self {
        Value::List(Arc::new(Vec::new()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Null and the empty list are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// List items, or an empty slice for anything that is not a list.
    pub fn as_list(&self) -> &[Value] {
        match self {
            Value::List(items) => items.as_slice(),
            _ => &[],
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of the value; numbers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Number(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Appends to a list value. Returns `false` if the value is not a list.
    ///
    /// Other handles to the same list keep seeing the contents they had
    /// before the push.
    pub fn push(&mut self, item: Value) -> bool {
        match self {
            Value::List(items) => {
                Arc::make_mut(items).push(item);
                true
            }
            _ => false,
        }
    }

    /// Items of the value viewed as a sequence: list items for lists, the
    /// value itself for scalars, nothing for null.
    pub fn items(&self) -> &[Value] {
        match self {
            Value::Null => &[],
            Value::List(items) => items.as_slice(),
            other => std::slice::from_ref(other),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::empty_list().is_truthy());
        assert!(Value::list(vec![Value::Null]).is_truthy());
        assert!(Value::from(0).is_truthy());
        assert!(Value::from("").is_truthy());
        assert!(Value::true_value().is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("Hello World").to_string(), "'Hello World'");
        assert_eq!(Value::Null.to_string(), "null");
        let list = Value::list(vec![Value::from(5), Value::from("a"), Value::from(1.5)]);
        assert_eq!(list.to_string(), "[5 'a' 1.5]");
    }

    #[test]
    fn test_push_is_copy_on_write() {
        let mut list = Value::empty_list();
        assert!(list.push(Value::from(1)));
        let snapshot = list.clone();
        assert!(list.push(Value::from(2)));

        assert_eq!(snapshot.as_list().len(), 1);
        assert_eq!(list.as_list().len(), 2);
        assert_eq!(list.as_list()[1], Value::from(2));
    }

    #[test]
    fn test_push_rejects_scalars() {
        let mut v = Value::from("x");
        assert!(!v.push(Value::Null));
        assert_eq!(v, Value::from("x"));
    }

    #[test]
    fn test_items_view() {
        assert!(Value::Null.items().is_empty());
        assert_eq!(Value::from(3).items(), &[Value::from(3)]);
        assert_eq!(Value::list(vec![Value::from(1), Value::from(2)]).items().len(), 2);
    }

    #[test]
    fn test_json_shape() {
        let v: Value = serde_json::from_str(r#"["GET", 2, 2.5, null]"#).unwrap();
        assert_eq!(
            v,
            Value::list(vec![Value::from("GET"), Value::from(2), Value::from(2.5), Value::Null])
        );
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"["GET",2,2.5,null]"#);
    }
}
