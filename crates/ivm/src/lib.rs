//! Rivulet IVM - incremental view maintenance operators.
//!
//! This crate implements the operator algebra at the heart of the engine.
//! A pipeline is a graph of operators rooted at the query's table; every
//! stage implements the same protocol:
//!
//! - `fetch`: pull the current result lazily, in the stage's sort order
//! - `push`: apply one incremental change and forward derived changes
//! - `cleanup`: release held state while returning what was held
//! - `destroy`: unconditional teardown, propagated upstream
//!
//! # Stream model
//!
//! - `Node`: a row plus named, re-invocable child relationship accessors
//! - `Change`: a tagged add/remove/edit/child delta flowing downstream
//! - `Storage`: an operator-private key/value scratch space
//!
//! # Operators
//!
//! `Filter`, `Skip`, `Take`, `Join`, `Exists`, and `FanOut`/`FanIn` for
//! OR branches. Sources implement the `Source` contract; `MemorySource`
//! is the in-memory reference implementation used by tests and by
//! embedders without their own row store.
//!
//! # Example
//!
//! ```ignore
//! use rivulet_ivm::{Capture, Filter, MemorySource, RowChange, Source};
//!
//! let users = MemorySource::new(schema);
//! let conn = users.connect(&sort, &[], &split_keys);
//! let filter = Filter::new(conn.input, predicate);
//! let capture = Capture::attach(&(filter as _));
//!
//! users.push(RowChange::Add(row));
//! assert_eq!(capture.take().len(), 1);
//! ```
//!
//! Pipelines are single-threaded: operators are linked with `Rc` and
//! interior mutability, downstream edges are `Weak`, and nothing here is
//! `Send`.

#![no_std]

extern crate alloc;

mod capture;
mod change;
mod node;
mod operator;
pub mod operators;
mod source;
mod storage;

pub use capture::{snapshot, snapshot_rows, Capture};
pub use change::Change;
pub use node::{ConstraintFetch, Node, Relationship, RelationshipFetch};
pub use operator::{
    empty_stream, Basis, Constraint, FetchRequest, NodeStream, Operator, OperatorRef, Output,
    OutputEdge, Start,
};
pub use operators::exists::{Exists, ExistsMode};
pub use operators::fan::{FanIn, FanOut};
pub use operators::filter::{Filter, RowPredicate};
pub use operators::join::Join;
pub use operators::skip::Skip;
pub use operators::take::Take;
pub use source::{MemorySource, RowChange, SimpleFilter, Source, SourceConnection};
pub use storage::{encode_key, MemoryStorage, Storage, StorageValue};
