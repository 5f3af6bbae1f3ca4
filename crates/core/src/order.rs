//! Sort specifications and row comparators.
//!
//! An `OrderSpec` is an ordered list of (column, direction) pairs. Together
//! with the primary key it defines the total order every fetch stream obeys.

use crate::row::Row;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

/// Sort direction for a single column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Returns the opposite direction.
    pub fn reversed(self) -> Direction {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }
}

/// An ordered list of (column, direction) pairs defining a row ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderSpec {
    fields: Vec<(String, Direction)>,
}

impl OrderSpec {
    /// Creates an order over the given (column, direction) pairs.
    pub fn new<K: Into<String>>(fields: impl IntoIterator<Item = (K, Direction)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, d)| (k.into(), d)).collect(),
        }
    }

    /// Creates an ascending order over a single column.
    pub fn asc(column: impl Into<String>) -> Self {
        Self::new([(column.into(), Direction::Asc)])
    }

    /// Creates an ascending order over every column of a key.
    pub fn by_key(columns: &[String]) -> Self {
        Self::new(columns.iter().map(|c| (c.clone(), Direction::Asc)))
    }

    /// Appends another ascending column.
    pub fn then_asc(mut self, column: impl Into<String>) -> Self {
        self.fields.push((column.into(), Direction::Asc));
        self
    }

    /// Appends another descending column.
    pub fn then_desc(mut self, column: impl Into<String>) -> Self {
        self.fields.push((column.into(), Direction::Desc));
        self
    }

    /// Returns the (column, direction) pairs.
    #[inline]
    pub fn fields(&self) -> &[(String, Direction)] {
        &self.fields
    }

    /// Returns the column names in sort order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    /// Returns true if the order references the given column.
    pub fn contains(&self, column: &str) -> bool {
        self.fields.iter().any(|(c, _)| c == column)
    }

    /// Compares two rows under this order.
    ///
    /// Rows that tie on every listed column compare equal; callers that
    /// need a total order must include the primary key in the spec.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for (column, direction) in &self.fields {
            let ord = a.get_or_null(column).compare(b.get_or_null(column));
            let ord = match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// A row boundary used by Skip and by AST pagination starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bound {
    /// The boundary row.
    pub row: Row,
    /// If true the boundary row itself is excluded.
    pub exclusive: bool,
}

impl Bound {
    /// Creates an inclusive bound.
    pub fn at(row: Row) -> Self {
        Self {
            row,
            exclusive: false,
        }
    }

    /// Creates an exclusive bound.
    pub fn after(row: Row) -> Self {
        Self {
            row,
            exclusive: true,
        }
    }
}
