//! Incremental changes flowing downstream through a pipeline.

use crate::node::Node;
use alloc::boxed::Box;
use alloc::string::String;
use rivulet_core::Row;

/// A change to one row of an operator's output.
///
/// `Add` is only ever issued for rows not previously visible to the
/// operator's output, `Remove` only for rows previously visible; a push
/// violating that is a programmer error upstream and operators are
/// entitled to panic on it. Pushes do not arrive in primary-key order.
#[derive(Clone, Debug)]
pub enum Change {
    /// A row became visible.
    Add(Node),
    /// A visible row disappeared.
    Remove(Node),
    /// A visible row changed in place; both nodes share a primary key.
    Edit { old: Node, new: Node },
    /// Something changed beneath an unchanged parent row, inside the
    /// named relationship.
    Child {
        node: Node,
        relationship: String,
        change: Box<Change>,
    },
}

impl Change {
    /// Creates an edit change.
    pub fn edit(old: Node, new: Node) -> Self {
        Change::Edit { old, new }
    }

    /// Creates a child change.
    pub fn child(node: Node, relationship: impl Into<String>, change: Change) -> Self {
        Change::Child {
            node,
            relationship: relationship.into(),
            change: Box::new(change),
        }
    }

    /// The row this change is about; for edits the new row, for child
    /// changes the unchanged parent row.
    pub fn row(&self) -> &Row {
        match self {
            Change::Add(node) | Change::Remove(node) => node.row(),
            Change::Edit { new, .. } => new.row(),
            Change::Child { node, .. } => node.row(),
        }
    }

    /// The node this change is about, same selection as [`Change::row`].
    pub fn node(&self) -> &Node {
        match self {
            Change::Add(node) | Change::Remove(node) => node,
            Change::Edit { new, .. } => new,
            Change::Child { node, .. } => node,
        }
    }
}
