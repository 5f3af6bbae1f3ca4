//! Nodes: rows with relationship accessors.
//!
//! A `Node` pairs a row with zero or more named relationships. Each
//! relationship carries an explicit fetch capability (a handle to the
//! child operator plus the correlation constraint) rather than a
//! closure, so nodes never form ownership cycles with the operators
//! that produced them. Invoking an accessor is always safe, can be
//! repeated, and reflects current upstream state.

use crate::operator::{Constraint, FetchRequest, NodeStream, Operator, OperatorRef};
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use rivulet_core::Row;

/// Capability to fetch the child rows of one relationship.
pub trait RelationshipFetch {
    /// Fetches the current child nodes.
    fn fetch_children(&self) -> NodeStream;
}

/// Fetches children from a child operator under a fixed constraint.
pub struct ConstraintFetch {
    input: OperatorRef,
    constraint: Constraint,
}

impl ConstraintFetch {
    /// Creates a fetcher over `input` filtered by `constraint`.
    pub fn new(input: OperatorRef, constraint: Constraint) -> Self {
        Self { input, constraint }
    }
}

impl RelationshipFetch for ConstraintFetch {
    fn fetch_children(&self) -> NodeStream {
        self.input
            .fetch(&FetchRequest::new().with_constraint(self.constraint.clone()))
    }
}

/// A named relationship attached to a node.
#[derive(Clone)]
pub struct Relationship {
    name: String,
    hidden: bool,
    fetcher: Rc<dyn RelationshipFetch>,
}

impl Relationship {
    /// Creates a relationship.
    pub fn new(name: impl Into<String>, hidden: bool, fetcher: Rc<dyn RelationshipFetch>) -> Self {
        Self {
            name: name.into(),
            hidden,
            fetcher,
        }
    }

    /// Returns the relationship name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if this relationship is excluded from presentation.
    #[inline]
    pub fn hidden(&self) -> bool {
        self.hidden
    }

    /// Fetches the current child nodes.
    pub fn fetch(&self) -> NodeStream {
        self.fetcher.fetch_children()
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("name", &self.name)
            .field("hidden", &self.hidden)
            .finish()
    }
}

/// A row plus its relationship accessors.
#[derive(Clone, Debug)]
pub struct Node {
    row: Row,
    relationships: Vec<Relationship>,
}

impl Node {
    /// Creates a node with no relationships.
    pub fn leaf(row: Row) -> Self {
        Self {
            row,
            relationships: Vec::new(),
        }
    }

    /// Returns the node's row.
    #[inline]
    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Consumes the node, returning its row.
    pub fn into_row(self) -> Row {
        self.row
    }

    /// Returns the node's relationships.
    #[inline]
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Returns a copy of this node with one more relationship.
    pub fn with_relationship(mut self, relationship: Relationship) -> Node {
        self.relationships.push(relationship);
        self
    }

    /// Fetches the children of the named relationship, or None if the
    /// node does not carry it.
    pub fn related(&self, name: &str) -> Option<NodeStream> {
        self.relationships
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.fetch())
    }
}
