//! Exists: existential filtering over a joined relationship.
//!
//! Exists does not join; it filters the parent stream produced by a
//! prior hidden Join to the rows whose named relationship yields at
//! least one child (`Exists`) or none (`NotExists`). The child count per
//! parent key is cached in storage so child-side pushes can drive 0 <-> 1
//! visibility transitions without refetching, and so fetches observe the
//! operator's processed state rather than recomputing mid-push.

use crate::change::Change;
use crate::node::Node;
use crate::operator::{
    wire, FetchRequest, NodeStream, Operator, OperatorRef, Output, OutputEdge,
};
use crate::storage::{encode_key, Storage, StorageValue};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use rivulet_core::SourceSchema;

/// Whether the relationship must or must not have children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExistsMode {
    Exists,
    NotExists,
}

impl ExistsMode {
    fn visible(&self, size: usize) -> bool {
        match self {
            ExistsMode::Exists => size > 0,
            ExistsMode::NotExists => size == 0,
        }
    }
}

/// Filters parents by the child count of one relationship.
pub struct Exists {
    input: OperatorRef,
    storage: Rc<dyn Storage>,
    relationship: String,
    mode: ExistsMode,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
}

impl Exists {
    /// Creates an exists filter over `input` and wires itself as its
    /// output. `relationship` must be declared on the input's schema.
    pub fn new(
        input: OperatorRef,
        storage: Rc<dyn Storage>,
        relationship: impl Into<String>,
        mode: ExistsMode,
    ) -> Rc<Exists> {
        let relationship = relationship.into();
        let schema = input.schema();
        assert!(
            schema.relationship(&relationship).is_some(),
            "exists over undeclared relationship {}",
            relationship
        );
        let exists = Rc::new(Exists {
            input,
            storage,
            relationship,
            mode,
            schema,
            output: OutputEdge::new(),
        });
        wire(&exists.input, &exists);
        exists
    }

    fn cache_key(&self, node: &Node) -> String {
        encode_key(&self.schema.row_key(node.row()))
    }

    fn cached(&self, key: &str) -> Option<usize> {
        match self.storage.get(key) {
            Some(StorageValue::Count(n)) => Some(n),
            None => None,
            Some(other) => panic!("unexpected exists storage entry {:?}", other),
        }
    }

    fn count_children(&self, node: &Node) -> usize {
        node.related(&self.relationship)
            .expect("input node lacks the exists relationship")
            .count()
    }

    /// The child count for a node, from cache or computed and cached.
    fn size_of(&self, node: &Node) -> usize {
        let key = self.cache_key(node);
        match self.cached(&key) {
            Some(n) => n,
            None => {
                let n = self.count_children(node);
                self.storage.set(key, StorageValue::Count(n));
                n
            }
        }
    }
}

impl Operator for Exists {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        let storage = self.storage.clone();
        let schema = self.schema.clone();
        let relationship = self.relationship.clone();
        let mode = self.mode;
        Box::new(self.input.fetch(req).filter(move |node| {
            let key = encode_key(&schema.row_key(node.row()));
            let size = match storage.get(&key) {
                Some(StorageValue::Count(n)) => n,
                _ => {
                    let n = node
                        .related(&relationship)
                        .expect("input node lacks the exists relationship")
                        .count();
                    storage.set(key, StorageValue::Count(n));
                    n
                }
            };
            mode.visible(size)
        }))
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        let storage = self.storage.clone();
        let schema = self.schema.clone();
        let relationship = self.relationship.clone();
        let mode = self.mode;
        Box::new(self.input.cleanup(req).filter(move |node| {
            let key = encode_key(&schema.row_key(node.row()));
            let size = match storage.get(&key) {
                Some(StorageValue::Count(n)) => n,
                _ => node
                    .related(&relationship)
                    .expect("input node lacks the exists relationship")
                    .count(),
            };
            storage.remove(&key);
            mode.visible(size)
        }))
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        self.input.destroy();
    }
}

impl Output for Exists {
    fn push(&self, change: Change) {
        match change {
            Change::Add(node) => {
                let key = self.cache_key(&node);
                let size = self.count_children(&node);
                self.storage.set(key, StorageValue::Count(size));
                if self.mode.visible(size) {
                    self.output.push(Change::Add(node));
                }
            }
            Change::Remove(node) => {
                let key = self.cache_key(&node);
                let size = self.cached(&key).unwrap_or_else(|| self.count_children(&node));
                self.storage.remove(&key);
                if self.mode.visible(size) {
                    self.output.push(Change::Remove(node));
                }
            }
            Change::Edit { old, new } => {
                let key = self.cache_key(&new);
                let size = self.cached(&key).unwrap_or_else(|| self.count_children(&new));
                self.storage.set(key, StorageValue::Count(size));
                if self.mode.visible(size) {
                    self.output.push(Change::Edit { old, new });
                }
            }
            Change::Child {
                node,
                relationship,
                change,
            } if relationship == self.relationship => {
                let key = self.cache_key(&node);
                let Some(old_size) = self.cached(&key) else {
                    // Never hydrated here, so nothing was emitted
                    // downstream; record the post-change count and stop.
                    let size = self.count_children(&node);
                    self.storage.set(key, StorageValue::Count(size));
                    return;
                };
                let new_size = match &*change {
                    Change::Add(_) => old_size + 1,
                    Change::Remove(_) => {
                        debug_assert!(old_size > 0, "child remove below an empty relationship");
                        old_size.saturating_sub(1)
                    }
                    _ => old_size,
                };
                self.storage
                    .set(key, StorageValue::Count(new_size));

                let was = self.mode.visible(old_size);
                let is = self.mode.visible(new_size);
                match (was, is) {
                    (false, true) => self.output.push(Change::Add(node)),
                    (true, false) => self.output.push(Change::Remove(node)),
                    (true, true) => self.output.push(Change::Child {
                        node,
                        relationship,
                        change,
                    }),
                    (false, false) => {}
                }
            }
            Change::Child {
                node,
                relationship,
                change,
            } => {
                let visible = {
                    let key = self.cache_key(&node);
                    self.cached(&key).map(|n| self.mode.visible(n))
                };
                if visible.unwrap_or(false) {
                    self.output.push(Change::Child {
                        node,
                        relationship,
                        change,
                    });
                }
            }
        }
    }
}
