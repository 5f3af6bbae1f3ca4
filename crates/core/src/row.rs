//! Row structure.
//!
//! A `Row` is an immutable ordered mapping from column name to value.
//! Rows are shared freely between operators, nodes and storage indexes,
//! so the column map sits behind an `Rc` and cloning a row is cheap.

use crate::value::Value;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

static NULL: Value = Value::Null;

/// An immutable row of named values.
#[derive(Clone, Debug)]
pub struct Row {
    columns: Rc<BTreeMap<String, Value>>,
}

impl Row {
    /// Creates a row from an existing column map.
    pub fn new(columns: BTreeMap<String, Value>) -> Self {
        Self {
            columns: Rc::new(columns),
        }
    }

    /// Creates a row from (name, value) pairs.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let columns = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect::<BTreeMap<_, _>>();
        Self::new(columns)
    }

    /// Creates an empty row.
    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    /// Gets a value by column name.
    #[inline]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Gets a value by column name, treating missing columns as Null.
    #[inline]
    pub fn get_or_null(&self, column: &str) -> &Value {
        self.columns.get(column).unwrap_or(&NULL)
    }

    /// Returns a new row with one column replaced or added.
    pub fn with(&self, column: impl Into<String>, value: Value) -> Row {
        let mut columns = (*self.columns).clone();
        columns.insert(column.into(), value);
        Self::new(columns)
    }

    /// Extracts the values of the named columns, missing columns as Null.
    pub fn project(&self, columns: &[String]) -> Vec<Value> {
        columns
            .iter()
            .map(|c| self.get_or_null(c).clone())
            .collect()
    }

    /// Iterates over (column, value) pairs in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of columns.
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if this row has no columns.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.columns, &other.columns) || self.columns == other.columns
    }
}

impl Eq for Row {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_row_from_pairs() {
        let row = Row::from_pairs([("id", Value::Int(1)), ("name", Value::from("Alice"))]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("name"), Some(&Value::from("Alice")));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_row_get_or_null() {
        let row = Row::from_pairs([("id", Value::Int(1))]);
        assert_eq!(row.get_or_null("missing"), &Value::Null);
    }

    #[test]
    fn test_row_with() {
        let row = Row::from_pairs([("id", Value::Int(1)), ("age", Value::Int(20))]);
        let updated = row.with("age", Value::Int(21));
        assert_eq!(row.get("age"), Some(&Value::Int(20)));
        assert_eq!(updated.get("age"), Some(&Value::Int(21)));
        assert_eq!(updated.get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_row_project() {
        let row = Row::from_pairs([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let key = row.project(&[String::from("b"), String::from("c")]);
        assert_eq!(key, vec![Value::Int(2), Value::Null]);
    }

    #[test]
    fn test_row_equality() {
        let a = Row::from_pairs([("id", Value::Int(1))]);
        let b = Row::from_pairs([("id", Value::Int(1))]);
        let c = Row::from_pairs([("id", Value::Int(2))]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        // Clones share the same map.
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_row_iter_ordered() {
        let row = Row::from_pairs([("b", Value::Int(2)), ("a", Value::Int(1))]);
        let names: Vec<&str> = row.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
