//! Join: tree-shaped parent/child correlation.
//!
//! Each parent node gains a named relationship whose accessor fetches
//! the matching child rows via a constraint over the correlation key.
//! The join keeps a storage index from child-key values to parent rows
//! so a child-side push can locate the affected parents without
//! scanning; the affected parents are re-fetched from the parent input
//! so deeper relationships stay attached, and the child change is
//! forwarded as a `Child` change against each of them.

use crate::change::Change;
use crate::node::{ConstraintFetch, Node, Relationship};
use crate::operator::{
    Constraint, FetchRequest, NodeStream, Operator, OperatorRef, Output, OutputEdge,
};
use crate::storage::{encode_key, Storage, StorageValue};
use alloc::boxed::Box;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use rivulet_core::{RelationshipSchema, Row, SourceSchema};

/// Combines a parent input and a child input into a tree.
pub struct Join {
    parent: OperatorRef,
    child: OperatorRef,
    storage: Rc<dyn Storage>,
    parent_key: Vec<String>,
    child_key: Vec<String>,
    relationship: String,
    hidden: bool,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
    parent_end: RefCell<Option<Rc<JoinParentEnd>>>,
    child_end: RefCell<Option<Rc<JoinChildEnd>>>,
}

impl Join {
    /// Creates a join and wires itself as the output of both inputs.
    ///
    /// `parent_key` and `child_key` are equal-length column lists; a
    /// child row matches a parent row when the child's `child_key`
    /// values equal the parent's `parent_key` values.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: OperatorRef,
        child: OperatorRef,
        storage: Rc<dyn Storage>,
        parent_key: Vec<String>,
        child_key: Vec<String>,
        relationship: impl Into<String>,
        hidden: bool,
    ) -> Rc<Join> {
        assert_eq!(
            parent_key.len(),
            child_key.len(),
            "correlation key lists must have equal length"
        );
        let relationship = relationship.into();
        let schema = Rc::new(parent.schema().with_relationship(RelationshipSchema {
            name: relationship.clone(),
            hidden,
            schema: child.schema(),
        }));
        let join = Rc::new(Join {
            parent,
            child,
            storage,
            parent_key,
            child_key,
            relationship,
            hidden,
            schema,
            output: OutputEdge::new(),
            parent_end: RefCell::new(None),
            child_end: RefCell::new(None),
        });

        let parent_end = Rc::new(JoinParentEnd {
            join: Rc::downgrade(&join),
        });
        let out: Rc<dyn Output> = parent_end.clone();
        join.parent.set_output(Rc::downgrade(&out));
        *join.parent_end.borrow_mut() = Some(parent_end);

        let child_end = Rc::new(JoinChildEnd {
            join: Rc::downgrade(&join),
        });
        let out: Rc<dyn Output> = child_end.clone();
        join.child.set_output(Rc::downgrade(&out));
        *join.child_end.borrow_mut() = Some(child_end);

        join
    }

    fn index_key(&self, parent_row: &Row) -> String {
        let child_values = parent_row.project(&self.parent_key);
        let pk = self.schema.row_key(parent_row);
        format!("{}/{}", encode_key(&child_values), encode_key(&pk))
    }

    /// Attaches this join's relationship accessor to a parent node.
    fn wrap(&self, node: Node) -> Node {
        let constraint =
            Constraint::from_key(&self.child_key, &node.row().project(&self.parent_key));
        node.with_relationship(Relationship::new(
            self.relationship.clone(),
            self.hidden,
            Rc::new(ConstraintFetch::new(self.child.clone(), constraint)),
        ))
    }

    fn push_parent(&self, change: Change) {
        match change {
            Change::Add(node) => {
                self.storage.set(
                    self.index_key(node.row()),
                    StorageValue::Row(node.row().clone()),
                );
                let wrapped = self.wrap(node);
                self.output.push(Change::Add(wrapped));
            }
            Change::Remove(node) => {
                self.storage.remove(&self.index_key(node.row()));
                let wrapped = self.wrap(node);
                self.output.push(Change::Remove(wrapped));
            }
            Change::Edit { old, new } => {
                debug_assert_eq!(
                    old.row().project(&self.parent_key),
                    new.row().project(&self.parent_key),
                    "correlation keys must be split upstream"
                );
                self.storage.set(
                    self.index_key(new.row()),
                    StorageValue::Row(new.row().clone()),
                );
                let change = Change::Edit {
                    old: self.wrap(old),
                    new: self.wrap(new),
                };
                self.output.push(change);
            }
            Change::Child {
                node,
                relationship,
                change,
            } => {
                self.output.push(Change::Child {
                    node: self.wrap(node),
                    relationship,
                    change,
                });
            }
        }
    }

    fn push_child(&self, change: Change) {
        let child_values = change.row().project(&self.child_key);
        let prefix = format!("{}/", encode_key(&child_values));
        let entries = self.storage.scan_prefix(&prefix);

        for (_, value) in entries {
            let parent_row = match value {
                StorageValue::Row(row) => row,
                other => panic!("unexpected join index entry {:?}", other),
            };
            let pk_columns = self.schema.primary_key();
            let pk_values = parent_row.project(pk_columns);
            let constraint = Constraint::from_key(pk_columns, &pk_values);
            let parent_node = self
                .parent
                .fetch(&FetchRequest::new().with_constraint(constraint))
                .next()
                .expect("join index references a parent row missing upstream");
            self.output.push(Change::Child {
                node: self.wrap(parent_node),
                relationship: self.relationship.clone(),
                change: Box::new(change.clone()),
            });
        }
    }
}

impl Operator for Join {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        let storage = self.storage.clone();
        let child = self.child.clone();
        let parent_key = self.parent_key.clone();
        let child_key = self.child_key.clone();
        let relationship = self.relationship.clone();
        let hidden = self.hidden;
        let schema = self.schema.clone();
        Box::new(self.parent.fetch(req).map(move |node| {
            let child_values = node.row().project(&parent_key);
            let pk = schema.row_key(node.row());
            storage.set(
                format!("{}/{}", encode_key(&child_values), encode_key(&pk)),
                StorageValue::Row(node.row().clone()),
            );
            let constraint = Constraint::from_key(&child_key, &child_values);
            node.with_relationship(Relationship::new(
                relationship.clone(),
                hidden,
                Rc::new(ConstraintFetch::new(child.clone(), constraint)),
            ))
        }))
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        let storage = self.storage.clone();
        let child = self.child.clone();
        let parent_key = self.parent_key.clone();
        let child_key = self.child_key.clone();
        let relationship = self.relationship.clone();
        let hidden = self.hidden;
        let schema = self.schema.clone();
        Box::new(self.parent.cleanup(req).map(move |node| {
            let child_values = node.row().project(&parent_key);
            let pk = schema.row_key(node.row());
            storage.remove(&format!(
                "{}/{}",
                encode_key(&child_values),
                encode_key(&pk)
            ));
            let constraint = Constraint::from_key(&child_key, &child_values);
            // Propagate the release into the child pipeline.
            child
                .cleanup(&FetchRequest::new().with_constraint(constraint.clone()))
                .for_each(drop);
            node.with_relationship(Relationship::new(
                relationship.clone(),
                hidden,
                Rc::new(ConstraintFetch::new(child.clone(), constraint)),
            ))
        }))
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        self.parent.destroy();
        self.child.destroy();
    }
}

/// Receives parent-side pushes.
struct JoinParentEnd {
    join: Weak<Join>,
}

impl Output for JoinParentEnd {
    fn push(&self, change: Change) {
        if let Some(join) = self.join.upgrade() {
            join.push_parent(change);
        }
    }
}

/// Receives child-side pushes.
struct JoinChildEnd {
    join: Weak<Join>,
}

impl Output for JoinChildEnd {
    fn push(&self, change: Change) {
        if let Some(join) = self.join.upgrade() {
            join.push_child(change);
        }
    }
}
