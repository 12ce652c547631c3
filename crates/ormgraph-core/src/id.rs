//! Assembled entity identifiers.
//!
//! An [`Id`] is the ordered list of identifier column values of one row. Most
//! entities have a single-column key, so the values live inline in a
//! `SmallVec`.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::value::Value;

/// A possibly composite identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id(SmallVec<[Value; 1]>);

impl Id {
    /// Single-column identifier.
    pub fn single(value: impl Into<Value>) -> Self {
        let mut values = SmallVec::new();
        values.push(value.into());
        Id(values)
    }

    /// Composite identifier, components in key-column order.
    pub fn composite(values: impl IntoIterator<Item = Value>) -> Self {
        Id(values.into_iter().collect())
    }

    /// Builds an identifier from row values, returning `None` when every
    /// component is null (the row carries no instance for this key). Zero and
    /// the empty string are ordinary key values.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Option<Self> {
        let values: SmallVec<[Value; 1]> = values.into_iter().collect();
        if values.is_empty() || values.iter().all(Value::is_null) {
            None
        } else {
            Some(Id(values))
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::single(v)
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::single(v)
    }
}

impl From<Value> for Id {
    fn from(v: Value) -> Self {
        Id::single(v)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_null_values_are_absent() {
        assert!(Id::from_values(vec![Value::Null, Value::Null]).is_none());
        assert!(Id::from_values(Vec::new()).is_none());
    }

    #[test]
    fn default_values_are_present() {
        assert_eq!(Id::from_values(vec![Value::Integer(0)]), Some(Id::single(0)));
        assert!(Id::from_values(vec![Value::from("")]).is_some());
    }

    #[test]
    fn partially_null_composite_is_present() {
        let id = Id::from_values(vec![Value::Integer(1), Value::Null]).unwrap();
        assert_eq!(id.len(), 2);
    }

    #[test]
    fn display() {
        assert_eq!(Id::single(7).to_string(), "7");
        assert_eq!(
            Id::composite(vec![Value::from(1), Value::from("a")]).to_string(),
            "(1, 'a')"
        );
    }
}
