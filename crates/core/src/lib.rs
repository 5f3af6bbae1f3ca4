//! Rivulet Core - shared vocabulary for the Rivulet IVM engine.
//!
//! This crate provides the foundational types every pipeline stage speaks:
//!
//! - `DataType`: supported column types (Bool, Int, Float, String, Json)
//! - `Value`: runtime values with a total cross-variant order
//! - `Row`: an immutable, cheaply clonable column-name -> value mapping
//! - `OrderSpec` / `compare_rows`: total row orderings derived from a sort
//!   specification plus the primary key
//! - `SourceSchema`: per-operator metadata (table, columns, primary key,
//!   sort, declared child relationships)
//! - `Error`: structural errors raised during pipeline construction
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::{DataType, Row, Value};
//! use rivulet_core::schema::SchemaBuilder;
//!
//! let schema = SchemaBuilder::new("users")
//!     .column("id", DataType::Int)
//!     .column("name", DataType::String)
//!     .primary_key(&["id"])
//!     .build()
//!     .unwrap();
//!
//! let row = Row::from_pairs([
//!     ("id", Value::Int(1)),
//!     ("name", Value::from("Alice")),
//! ]);
//!
//! assert_eq!(row.get("id"), Some(&Value::Int(1)));
//! assert_eq!(schema.row_key(&row), vec![Value::Int(1)]);
//! ```

#![no_std]

extern crate alloc;

mod compare;
mod error;
mod order;
pub mod pattern;
mod row;
pub mod schema;
mod types;
mod value;

pub use compare::CompareOp;
pub use error::{Error, Result};
pub use order::{Bound, Direction, OrderSpec};
pub use row::Row;
pub use schema::{RelationshipSchema, SourceSchema};
pub use types::DataType;
pub use value::Value;
