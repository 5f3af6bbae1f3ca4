//! Source schema definitions.
//!
//! Every pipeline stage exposes a `SourceSchema` describing the rows it
//! emits: the table they come from, column types, the primary key, the
//! sort order the stage's fetch stream obeys, and the child relationships
//! its nodes carry. Schemas are immutable and shared via `Rc`.

use crate::error::{Error, Result};
use crate::order::OrderSpec;
use crate::row::Row;
use crate::types::DataType;
use crate::value::Value;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;

/// A child relationship declared on a schema.
#[derive(Clone, Debug)]
pub struct RelationshipSchema {
    /// Relationship name, unique within the parent schema.
    pub name: String,
    /// Hidden relationships exist to support filtering and are excluded
    /// from presentation output.
    pub hidden: bool,
    /// Schema of the child rows.
    pub schema: Rc<SourceSchema>,
}

/// Metadata describing the rows a pipeline stage emits.
#[derive(Clone, Debug)]
pub struct SourceSchema {
    name: String,
    columns: Vec<(String, DataType)>,
    primary_key: Vec<String>,
    sort: OrderSpec,
    relationships: Vec<RelationshipSchema>,
}

impl SourceSchema {
    /// Returns the table name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared columns.
    #[inline]
    pub fn columns(&self) -> &[(String, DataType)] {
        &self.columns
    }

    /// Returns the primary-key column names.
    #[inline]
    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    /// Returns the sort order of this stage's fetch stream.
    #[inline]
    pub fn sort(&self) -> &OrderSpec {
        &self.sort
    }

    /// Returns the declared child relationships.
    #[inline]
    pub fn relationships(&self) -> &[RelationshipSchema] {
        &self.relationships
    }

    /// Looks up a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationshipSchema> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Returns true if the schema declares the given column.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(c, _)| c == column)
    }

    /// Extracts the primary-key values of a row.
    pub fn row_key(&self, row: &Row) -> Vec<Value> {
        row.project(&self.primary_key)
    }

    /// Compares two rows under this schema's sort order.
    #[inline]
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        self.sort.compare(a, b)
    }

    /// Returns a copy of this schema with a different sort order.
    ///
    /// The caller is responsible for the order being total; the builder
    /// enforces that the primary key is included.
    pub fn with_sort(&self, sort: OrderSpec) -> SourceSchema {
        SourceSchema {
            sort,
            ..self.clone()
        }
    }

    /// Returns a copy of this schema with an additional relationship.
    pub fn with_relationship(&self, relationship: RelationshipSchema) -> SourceSchema {
        let mut schema = self.clone();
        schema.relationships.push(relationship);
        schema
    }
}

/// Builder for `SourceSchema`.
pub struct SchemaBuilder {
    name: String,
    columns: Vec<(String, DataType)>,
    primary_key: Vec<String>,
    sort: Option<OrderSpec>,
}

impl SchemaBuilder {
    /// Starts a schema for the named table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            sort: None,
        }
    }

    /// Adds a column.
    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push((name.into(), data_type));
        self
    }

    /// Declares the primary key.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| String::from(*c)).collect();
        self
    }

    /// Declares the sort order. Defaults to the primary key ascending.
    pub fn sort(mut self, sort: OrderSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Validates and builds the schema.
    pub fn build(self) -> Result<SourceSchema> {
        if self.primary_key.is_empty() {
            return Err(Error::invalid_schema("primary key must not be empty"));
        }
        for key in &self.primary_key {
            if !self.columns.iter().any(|(c, _)| c == key) {
                return Err(Error::column_not_found(self.name.clone(), key.clone()));
            }
        }
        for (i, (name, _)) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|(c, _)| c == name) {
                return Err(Error::invalid_schema("duplicate column name"));
            }
        }
        let sort = self
            .sort
            .unwrap_or_else(|| OrderSpec::by_key(&self.primary_key));
        Ok(SourceSchema {
            name: self.name,
            columns: self.columns,
            primary_key: self.primary_key,
            sort,
            relationships: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn users() -> SourceSchema {
        SchemaBuilder::new("users")
            .column("id", DataType::Int)
            .column("name", DataType::String)
            .primary_key(&["id"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_defaults_sort_to_primary_key() {
        let schema = users();
        assert_eq!(schema.name(), "users");
        let cols: vec::Vec<&str> = schema.sort().columns().collect();
        assert_eq!(cols, vec!["id"]);
    }

    #[test]
    fn test_build_rejects_missing_pk_column() {
        let err = SchemaBuilder::new("t")
            .column("a", DataType::Int)
            .primary_key(&["b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { .. }));
    }

    #[test]
    fn test_build_rejects_empty_pk() {
        let err = SchemaBuilder::new("t")
            .column("a", DataType::Int)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_build_rejects_duplicate_column() {
        let err = SchemaBuilder::new("t")
            .column("a", DataType::Int)
            .column("a", DataType::String)
            .primary_key(&["a"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_row_key() {
        let schema = users();
        let row = Row::from_pairs([("id", Value::Int(3)), ("name", Value::from("c"))]);
        assert_eq!(schema.row_key(&row), vec![Value::Int(3)]);
    }

    #[test]
    fn test_with_relationship() {
        let users = Rc::new(users());
        let orders = SchemaBuilder::new("orders")
            .column("id", DataType::Int)
            .column("user_id", DataType::Int)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let joined = orders.with_relationship(RelationshipSchema {
            name: String::from("buyer"),
            hidden: true,
            schema: users.clone(),
        });
        assert!(joined.relationship("buyer").is_some());
        assert!(joined.relationship("buyer").unwrap().hidden);
        assert!(joined.relationship("missing").is_none());
    }
}
