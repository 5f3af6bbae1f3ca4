//! ExtractMatchingKeys: recover original-root rows after a flip.
//!
//! Walks a fixed relationship path on every fetched or pushed node and
//! emits the rows found at the path's end. The same physical row can be
//! reached through multiple parent branches after a flip's join, so
//! each target primary key is reference-counted in storage: a target
//! becomes visible on its first reference and invisible when the last
//! one goes away.
//!
//! Pushed changes are applied by re-walking the affected source node
//! and diffing against the contribution recorded for it, rather than by
//! interpreting the nested change. Accessors always reflect current
//! state, so a removal that an Exists below already converted into a
//! parent remove (whose subtree can no longer be walked) is still
//! accounted for exactly: the recorded contribution says what the node
//! used to reach.

use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use alloc::format;
use rivulet_core::{Row, SourceSchema};
use rivulet_ivm::{
    encode_key, Change, FetchRequest, Node, NodeStream, Operator, OperatorRef, Output, OutputEdge,
    Storage, StorageValue,
};

/// Extracts, deduplicates and re-emits the rows at the end of a
/// relationship path.
pub struct ExtractMatchingKeys {
    input: OperatorRef,
    storage: Rc<dyn Storage>,
    path: Vec<String>,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
}

impl ExtractMatchingKeys {
    /// Creates an extractor over `input`, following `path` to rows of
    /// `target_schema`, and wires itself as the input's output.
    pub fn new(
        input: OperatorRef,
        storage: Rc<dyn Storage>,
        path: Vec<String>,
        target_schema: Rc<SourceSchema>,
    ) -> Rc<ExtractMatchingKeys> {
        assert!(!path.is_empty(), "extract path must not be empty");
        let extract = Rc::new(ExtractMatchingKeys {
            input,
            storage,
            path,
            schema: target_schema,
            output: OutputEdge::new(),
        });
        let out: Rc<dyn Output> = extract.clone();
        extract.input.set_output(Rc::downgrade(&out));
        extract
    }

    fn target_key(&self, node: &Node) -> String {
        encode_key(&self.schema.row_key(node.row()))
    }

    fn source_key(&self, node: &Node) -> String {
        format!(
            "src/{}",
            encode_key(&self.input.schema().row_key(node.row()))
        )
    }

    fn count(&self, target: &str) -> usize {
        match self.storage.get(&format!("count/{}", target)) {
            Some(StorageValue::Count(n)) => n,
            None => 0,
            Some(other) => panic!("unexpected extract count entry {:?}", other),
        }
    }

    fn set_count(&self, target: &str, n: usize) {
        self.storage
            .set(format!("count/{}", target), StorageValue::Count(n));
    }

    fn stored_row(&self, target: &str) -> Row {
        match self.storage.get(&format!("row/{}", target)) {
            Some(StorageValue::Row(row)) => row,
            other => panic!("missing row for tracked extract target: {:?}", other),
        }
    }

    fn contributions(&self, source: &str) -> Vec<String> {
        match self.storage.get(source) {
            Some(StorageValue::Keys(keys)) => keys,
            None => Vec::new(),
            Some(other) => panic!("unexpected extract contribution entry {:?}", other),
        }
    }

    /// Takes one more reference on a target; the first one makes it
    /// visible.
    fn acquire(&self, target: &Node, key: &str) {
        let n = self.count(key);
        self.set_count(key, n + 1);
        self.storage.set(
            format!("row/{}", key),
            StorageValue::Row(target.row().clone()),
        );
        if n == 0 {
            self.output.push(Change::Add(target.clone()));
        }
    }

    /// Drops one reference; the last one makes the target invisible.
    /// The remove is emitted from the remembered row because the
    /// upstream link that used to reach it may already be gone.
    fn release(&self, key: &str) {
        let n = self.count(key);
        debug_assert!(n > 0, "release of an untracked extract target");
        if n <= 1 {
            let row = self.stored_row(key);
            self.storage.remove(&format!("count/{}", key));
            self.storage.remove(&format!("row/{}", key));
            self.output.push(Change::Remove(Node::leaf(row)));
        } else {
            self.set_count(key, n - 1);
        }
    }

    /// Re-emits an in-place content change of a visible target, once:
    /// later diffs for other source nodes see the refreshed row and
    /// stay silent.
    fn refresh(&self, target: &Node, key: &str) {
        let stored = self.stored_row(key);
        if &stored != target.row() {
            self.storage.set(
                format!("row/{}", key),
                StorageValue::Row(target.row().clone()),
            );
            if self.count(key) > 0 {
                self.output.push(Change::Edit {
                    old: Node::leaf(stored),
                    new: target.clone(),
                });
            }
        }
    }

    /// Replaces one source node's recorded contribution with the given
    /// target multiset, emitting the add/remove/edit deltas.
    fn apply_diff(&self, source: &str, targets: Vec<Node>) {
        let old = self.contributions(source);
        let new_keys: Vec<String> = targets.iter().map(|t| self.target_key(t)).collect();

        let mut new_pool = new_keys.clone();
        for key in &old {
            if let Some(pos) = new_pool.iter().position(|k| k == key) {
                new_pool.remove(pos);
            } else {
                self.release(key);
            }
        }

        let mut old_pool = old;
        for (target, key) in targets.iter().zip(&new_keys) {
            if let Some(pos) = old_pool.iter().position(|k| k == key) {
                old_pool.remove(pos);
                self.refresh(target, key);
            } else {
                self.acquire(target, key);
            }
        }

        if new_keys.is_empty() {
            self.storage.remove(source);
        } else {
            self.storage
                .set(String::from(source), StorageValue::Keys(new_keys));
        }
    }

    fn hydrated(&self) -> bool {
        self.storage.get(HYDRATED).is_some()
    }

    /// Builds counts and contributions from a full upstream walk and
    /// returns the deduplicated targets in first-seen order.
    fn hydrate(&self) -> Vec<Node> {
        for (key, _) in self.storage.scan_prefix("") {
            self.storage.remove(&key);
        }

        let mut out: Vec<Node> = Vec::new();
        for node in self.input.fetch(&FetchRequest::new()) {
            let source = self.source_key(&node);
            let targets = collect_targets(&node, &self.path);
            let mut keys = Vec::new();
            for target in &targets {
                let key = self.target_key(target);
                let n = self.count(&key);
                self.set_count(&key, n + 1);
                self.storage.set(
                    format!("row/{}", key),
                    StorageValue::Row(target.row().clone()),
                );
                if n == 0 {
                    out.push(target.clone());
                }
                keys.push(key);
            }
            if !keys.is_empty() {
                self.storage.set(source, StorageValue::Keys(keys));
            }
        }
        self.storage.set(String::from(HYDRATED), StorageValue::Count(1));
        out
    }
}

const HYDRATED: &str = "hydrated";

/// Collects the nodes at the end of `path` beneath `node`. Duplicates
/// are preserved; the caller reference-counts them.
fn collect_targets(node: &Node, path: &[String]) -> Vec<Node> {
    let mut out = Vec::new();
    walk(node, path, &mut out);
    out
}

fn walk(node: &Node, path: &[String], out: &mut Vec<Node>) {
    match path.split_first() {
        None => out.push(node.clone()),
        Some((first, rest)) => {
            if let Some(children) = node.related(first) {
                for child in children {
                    walk(&child, rest, out);
                }
            }
        }
    }
}

impl Operator for ExtractMatchingKeys {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    /// Extraction order is not meaningful; `SortToRootOrder` above is
    /// responsible for ordering, so `start`/`reverse` are not honored
    /// here. The first fetch hydrates the counts and contributions;
    /// later fetches are pure walks so a consumer may re-fetch while a
    /// push is mid-flight without disturbing maintained state.
    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        let out = if self.hydrated() {
            let mut seen: Vec<String> = Vec::new();
            let mut out: Vec<Node> = Vec::new();
            for node in self.input.fetch(&FetchRequest::new()) {
                for target in collect_targets(&node, &self.path) {
                    let key = self.target_key(&target);
                    if !seen.contains(&key) {
                        seen.push(key);
                        out.push(target);
                    }
                }
            }
            out
        } else {
            self.hydrate()
        };

        let constraint = req.constraint.clone();
        alloc::boxed::Box::new(out.into_iter().filter(move |node| {
            constraint
                .as_ref()
                .map(|c| c.matches(node.row()))
                .unwrap_or(true)
        }))
    }

    fn cleanup(&self, _req: &FetchRequest) -> NodeStream {
        let mut seen: Vec<String> = Vec::new();
        let mut out: Vec<Node> = Vec::new();
        for node in self.input.cleanup(&FetchRequest::new()) {
            for target in collect_targets(&node, &self.path) {
                let key = self.target_key(&target);
                if !seen.contains(&key) {
                    seen.push(key);
                    out.push(target);
                }
            }
        }
        for (key, _) in self.storage.scan_prefix("") {
            self.storage.remove(&key);
        }
        alloc::boxed::Box::new(out.into_iter())
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        self.input.destroy();
    }
}

impl Output for ExtractMatchingKeys {
    fn push(&self, change: Change) {
        if !self.hydrated() {
            // Nothing downstream has fetched yet; there is no emitted
            // state to maintain.
            return;
        }
        match change {
            Change::Add(node) => {
                let source = self.source_key(&node);
                let targets = collect_targets(&node, &self.path);
                self.apply_diff(&source, targets);
            }
            Change::Remove(node) => {
                // The node is gone; whatever it used to reach loses one
                // reference each.
                let source = self.source_key(&node);
                self.apply_diff(&source, Vec::new());
            }
            Change::Edit { new, .. } => {
                let source = self.source_key(&new);
                let targets = collect_targets(&new, &self.path);
                self.apply_diff(&source, targets);
            }
            Change::Child {
                node, relationship, ..
            } => {
                // Only changes under the extraction path can alter what
                // the path reaches; re-walk the affected source node
                // and diff against its recorded contribution.
                if relationship == self.path[0] {
                    let source = self.source_key(&node);
                    let targets = collect_targets(&node, &self.path);
                    self.apply_diff(&source, targets);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use rivulet_core::schema::SchemaBuilder;
    use rivulet_core::{DataType, OrderSpec, Value};
    use rivulet_ivm::{Capture, Join, MemorySource, MemoryStorage, Source};

    fn users_schema() -> SourceSchema {
        SchemaBuilder::new("users")
            .column("id", DataType::Int)
            .column("name", DataType::String)
            .primary_key(&["id"])
            .build()
            .unwrap()
    }

    fn order(id: i64, user_id: i64) -> Row {
        Row::from_pairs([("id", Value::Int(id)), ("user_id", Value::Int(user_id))])
    }

    fn user(id: i64, name: &str) -> Row {
        Row::from_pairs([("id", Value::Int(id)), ("name", Value::from(name))])
    }

    /// The flipped shape: orders joined to users; extract recovers the
    /// user rows reachable from each order.
    fn setup() -> (MemorySource, MemorySource, OperatorRef) {
        let orders = MemorySource::new(
            SchemaBuilder::new("orders")
                .column("id", DataType::Int)
                .column("user_id", DataType::Int)
                .primary_key(&["id"])
                .build()
                .unwrap(),
        );
        let users = MemorySource::new(users_schema());

        let orders_conn = orders.connect(&OrderSpec::asc("id"), &[], &["user_id".into()]);
        let users_conn = users.connect(&OrderSpec::asc("id"), &[], &["id".into()]);
        let join = Join::new(
            orders_conn.input,
            users_conn.input,
            Rc::new(MemoryStorage::new()),
            vec![String::from("user_id")],
            vec![String::from("id")],
            "users",
            true,
        );
        let extract: OperatorRef = ExtractMatchingKeys::new(
            join,
            Rc::new(MemoryStorage::new()),
            vec![String::from("users")],
            Rc::new(users_schema()),
        );
        (orders, users, extract)
    }

    fn fetch_ids(extract: &OperatorRef) -> Vec<i64> {
        extract
            .fetch(&FetchRequest::new())
            .map(|n| n.row().get("id").unwrap().as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_fetch_dedups_multiple_branches() {
        let (orders, users, extract) = setup();
        users.add(user(1, "a"));
        users.add(user(2, "b"));
        // Two orders reference user 1: one extracted node, not two.
        orders.add(order(10, 1));
        orders.add(order(11, 1));
        orders.add(order(12, 2));

        assert_eq!(fetch_ids(&extract), vec![1, 2]);
        // Refetching does not double-count.
        assert_eq!(fetch_ids(&extract), vec![1, 2]);
    }

    #[test]
    fn test_reference_counting_across_pushes() {
        let (orders, users, extract) = setup();
        users.add(user(1, "a"));
        orders.add(order(10, 1));
        let _ = fetch_ids(&extract);
        let capture = Capture::attach(&extract);

        // Second branch to the same user: no new emission.
        orders.add(order(11, 1));
        assert!(capture.is_empty());

        // Dropping one branch keeps the target visible.
        orders.remove(order(11, 1));
        assert!(capture.is_empty());

        // Dropping the last branch removes it.
        orders.remove(order(10, 1));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            Change::Remove(node) => assert_eq!(node.row().get("id"), Some(&Value::Int(1))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_target_removal_reaches_output() {
        let (orders, users, extract) = setup();
        users.add(user(1, "a"));
        orders.add(order(10, 1));
        let _ = fetch_ids(&extract);
        let capture = Capture::attach(&extract);

        // Removing the user itself: the child change re-walks order 10,
        // finds nothing, and releases the recorded reference.
        users.remove(user(1, "a"));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            Change::Remove(node) => assert_eq!(node.row().get("id"), Some(&Value::Int(1))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_target_edit_emitted_once() {
        let (orders, users, extract) = setup();
        users.add(user(1, "a"));
        // Two branches reach user 1; an edit must surface exactly once.
        orders.add(order(10, 1));
        orders.add(order(11, 1));
        let _ = fetch_ids(&extract);
        let capture = Capture::attach(&extract);

        users.edit(user(1, "a"), user(1, "a2"));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            Change::Edit { old, new } => {
                assert_eq!(old.row().get("name"), Some(&Value::from("a")));
                assert_eq!(new.row().get("name"), Some(&Value::from("a2")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_new_source_row_adds_target() {
        let (orders, users, extract) = setup();
        users.add(user(3, "c"));
        let _ = fetch_ids(&extract);
        let capture = Capture::attach(&extract);

        orders.add(order(20, 3));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            Change::Add(node) => assert_eq!(node.row().get("id"), Some(&Value::Int(3))),
            other => panic!("unexpected {:?}", other),
        }
    }
}
