//! Take: a storage-backed row limit, optionally partitioned.
//!
//! Take remembers, per partition, how many rows it has emitted and the
//! current boundary row. A pushed row ordered before the boundary when
//! the partition is full evicts the boundary row (re-querying upstream
//! for the replacement boundary); a pushed row ordered after the
//! boundary is a no-op. Partitions are keyed by a compound column set so
//! each parent of a related subquery gets its own window.

use crate::change::Change;
use crate::node::Node;
use crate::operator::{
    wire, Constraint, FetchRequest, NodeStream, Operator, OperatorRef, Output, OutputEdge, Start,
};
use crate::storage::{encode_key, Storage, StorageValue};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use rivulet_core::{Row, SourceSchema, Value};

#[derive(Clone)]
struct TakeState {
    size: usize,
    bound: Option<Row>,
}

/// Enforces a row limit per partition.
pub struct Take {
    input: OperatorRef,
    storage: Rc<dyn Storage>,
    limit: usize,
    partition_key: Option<Vec<String>>,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
}

impl Take {
    /// Creates a take over `input` and wires itself as its output.
    ///
    /// With a partition key, every fetch must carry a constraint over
    /// exactly those columns; the window is tracked per key value.
    pub fn new(
        input: OperatorRef,
        storage: Rc<dyn Storage>,
        limit: usize,
        partition_key: Option<Vec<String>>,
    ) -> Rc<Take> {
        let schema = input.schema();
        let take = Rc::new(Take {
            input,
            storage,
            limit,
            partition_key,
            schema,
            output: OutputEdge::new(),
        });
        wire(&take.input, &take);
        take
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        self.schema.compare_rows(a, b)
    }

    fn partition_values(&self, row: &Row) -> Vec<Value> {
        match &self.partition_key {
            Some(columns) => row.project(columns),
            None => Vec::new(),
        }
    }

    fn partition_from_request(&self, req: &FetchRequest) -> Vec<Value> {
        let Some(columns) = &self.partition_key else {
            return Vec::new();
        };
        let constraint = req
            .constraint
            .as_ref()
            .expect("partitioned take fetched without a partition constraint");
        columns
            .iter()
            .map(|column| {
                constraint
                    .fields()
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| v.clone())
                    .expect("partition constraint missing a partition column")
            })
            .collect()
    }

    fn state(&self, key: &str) -> Option<TakeState> {
        match self.storage.get(key) {
            Some(StorageValue::TakeState { size, bound }) => Some(TakeState { size, bound }),
            None => None,
            Some(other) => panic!("unexpected take storage entry {:?}", other),
        }
    }

    fn store(&self, key: &str, state: &TakeState) {
        self.storage.set(
            String::from(key),
            StorageValue::TakeState {
                size: state.size,
                bound: state.bound.clone(),
            },
        );
    }

    fn partition_request(&self, key_values: &[Value]) -> FetchRequest {
        let mut req = FetchRequest::new();
        if let Some(columns) = &self.partition_key {
            req = req.with_constraint(Constraint::from_key(columns, key_values));
        }
        req
    }

    fn fetch_first(
        &self,
        key_values: &[Value],
        start: Option<Start>,
        reverse: bool,
    ) -> Option<Node> {
        let mut req = self.partition_request(key_values);
        if let Some(start) = start {
            req = req.with_start(start);
        }
        req.reverse = reverse;
        self.input.fetch(&req).next()
    }

    /// Hydrates a partition: pulls up to `limit` rows forward and
    /// records the window. Returns the window nodes.
    fn hydrate(&self, key: &str, key_values: &[Value]) -> Vec<Node> {
        let mut nodes: Vec<Node> = Vec::new();
        if self.limit > 0 {
            let mut upstream = self.input.fetch(&self.partition_request(key_values));
            while nodes.len() < self.limit {
                match upstream.next() {
                    Some(node) => nodes.push(node),
                    None => break,
                }
            }
        }
        let state = TakeState {
            size: nodes.len(),
            bound: nodes.last().map(|n| n.row().clone()),
        };
        self.store(key, &state);
        nodes
    }

    /// Serves a fetch from a hydrated window: upstream rows inside the
    /// boundary, lazily.
    fn serve(&self, req: &FetchRequest, state: TakeState) -> NodeStream {
        let Some(bound) = state.bound else {
            return crate::operator::empty_stream();
        };
        let schema = self.schema.clone();
        let mut forwarded = req.clone();
        if req.reverse && forwarded.start.is_none() {
            // The window's top end is the boundary row.
            forwarded.start = Some(Start::at(bound.clone()));
        }
        let upstream = self.input.fetch(&forwarded);
        Box::new(
            upstream
                .take_while(move |n| schema.compare_rows(n.row(), &bound) != Ordering::Greater)
                .take(state.size),
        )
    }
}

impl Operator for Take {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        let key_values = self.partition_from_request(req);
        let key = encode_key(&key_values);
        match self.state(&key) {
            Some(state) => self.serve(req, state),
            None => {
                let nodes = self.hydrate(&key, &key_values);
                if req.start.is_none() && !req.reverse {
                    Box::new(nodes.into_iter())
                } else {
                    // Hydration is always forward; re-serve the request
                    // shape from the recorded window.
                    let state = self.state(&key).expect("window just hydrated");
                    self.serve(req, state)
                }
            }
        }
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        let key_values = self.partition_from_request(req);
        let key = encode_key(&key_values);
        let nodes: Vec<Node> = match self.state(&key) {
            Some(TakeState {
                size,
                bound: Some(bound),
            }) => {
                let schema = self.schema.clone();
                self.input
                    .cleanup(&self.partition_request(&key_values))
                    .take_while(|n| schema.compare_rows(n.row(), &bound) != Ordering::Greater)
                    .take(size)
                    .collect()
            }
            _ => Vec::new(),
        };
        self.storage.remove(&key);
        Box::new(nodes.into_iter())
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        self.input.destroy();
    }
}

impl Output for Take {
    fn push(&self, change: Change) {
        if self.limit == 0 {
            return;
        }
        let key_values = self.partition_values(change.row());
        let key = encode_key(&key_values);
        let Some(mut state) = self.state(&key) else {
            // Partition never fetched; nothing downstream to maintain.
            return;
        };

        match change {
            Change::Add(node) => {
                if state.size < self.limit {
                    let grows = match &state.bound {
                        None => true,
                        Some(bound) => self.compare(node.row(), bound) == Ordering::Greater,
                    };
                    if grows {
                        state.bound = Some(node.row().clone());
                    }
                    state.size += 1;
                    self.store(&key, &state);
                    self.output.push(Change::Add(node));
                    return;
                }

                let bound = state.bound.clone().expect("full window has a boundary");
                match self.compare(node.row(), &bound) {
                    Ordering::Greater => {}
                    Ordering::Equal => {
                        panic!("add pushed for the row already at the take boundary")
                    }
                    Ordering::Less => {
                        // The new row enters the window; the boundary row
                        // leaves it. Upstream already contains the new
                        // row, so the predecessor of the old boundary is
                        // the new boundary.
                        let evicted = self
                            .fetch_first(&key_values, Some(Start::at(bound.clone())), false)
                            .expect("boundary row missing upstream");
                        let new_bound = self
                            .fetch_first(&key_values, Some(Start::after(bound.clone())), true)
                            .expect("full window has a predecessor of its boundary");
                        state.bound = Some(new_bound.row().clone());
                        self.store(&key, &state);
                        self.output.push(Change::Remove(evicted));
                        self.output.push(Change::Add(node));
                    }
                }
            }
            Change::Remove(node) => {
                let Some(bound) = state.bound.clone() else {
                    return;
                };
                if self.compare(node.row(), &bound) == Ordering::Greater {
                    return;
                }
                self.output.push(Change::Remove(node));
                // Refill from past the old boundary; upstream no longer
                // contains the removed row.
                match self.fetch_first(&key_values, Some(Start::after(bound.clone())), false) {
                    Some(replacement) => {
                        state.bound = Some(replacement.row().clone());
                        self.store(&key, &state);
                        self.output.push(Change::Add(replacement));
                    }
                    None => {
                        state.size -= 1;
                        state.bound = self
                            .fetch_first(&key_values, Some(Start::at(bound)), true)
                            .map(|n| n.row().clone());
                        self.store(&key, &state);
                    }
                }
            }
            Change::Edit { old, new } => {
                let Some(bound) = state.bound.clone() else {
                    return;
                };
                let c_old = self.compare(old.row(), &bound);
                let c_new = self.compare(new.row(), &bound);
                debug_assert_eq!(
                    c_old == Ordering::Greater,
                    c_new == Ordering::Greater,
                    "ordering keys must be split upstream"
                );
                if c_new == Ordering::Greater {
                    return;
                }
                if c_new == Ordering::Equal {
                    state.bound = Some(new.row().clone());
                    self.store(&key, &state);
                }
                self.output.push(Change::Edit { old, new });
            }
            Change::Child {
                node,
                relationship,
                change,
            } => {
                let within = state
                    .bound
                    .as_ref()
                    .map(|b| self.compare(node.row(), b) != Ordering::Greater)
                    .unwrap_or(false);
                if within {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{snapshot_rows, Capture};
    use crate::source::{MemorySource, Source};
    use crate::storage::MemoryStorage;
    use alloc::vec;
    use rivulet_core::schema::SchemaBuilder;
    use rivulet_core::{DataType, OrderSpec};

    fn item(id: i64) -> Row {
        Row::from_pairs([("id", Value::Int(id))])
    }

    fn setup(limit: usize) -> (MemorySource, OperatorRef) {
        let schema = SchemaBuilder::new("items")
            .column("id", DataType::Int)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let source = MemorySource::new(schema);
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        let take: OperatorRef = Take::new(conn.input, Rc::new(MemoryStorage::new()), limit, None);
        (source, take)
    }

    fn ids(rows: Vec<Row>) -> Vec<i64> {
        rows.iter()
            .map(|r| r.get("id").unwrap().as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_fetch_limits() {
        let (source, take) = setup(3);
        for id in [5, 1, 4, 2, 3] {
            source.add(item(id));
        }
        assert_eq!(ids(snapshot_rows(&take)), vec![1, 2, 3]);
        // Restartable: same answer again.
        assert_eq!(ids(snapshot_rows(&take)), vec![1, 2, 3]);
    }

    #[test]
    fn test_fetch_under_limit() {
        let (source, take) = setup(10);
        source.add(item(1));
        source.add(item(2));
        assert_eq!(ids(snapshot_rows(&take)), vec![1, 2]);
    }

    #[test]
    fn test_push_fills_window() {
        let (source, take) = setup(2);
        let _ = snapshot_rows(&take); // hydrate empty
        let capture = Capture::attach(&take);

        source.add(item(5));
        source.add(item(7));
        assert_eq!(capture.take().len(), 2);
        assert_eq!(ids(snapshot_rows(&take)), vec![5, 7]);
    }

    #[test]
    fn test_push_after_boundary_is_noop_when_full() {
        let (source, take) = setup(2);
        source.add(item(1));
        source.add(item(2));
        let _ = snapshot_rows(&take);
        let capture = Capture::attach(&take);

        source.add(item(9));
        assert!(capture.is_empty());
        assert_eq!(ids(snapshot_rows(&take)), vec![1, 2]);
    }

    #[test]
    fn test_push_before_boundary_evicts() {
        let (source, take) = setup(2);
        source.add(item(2));
        source.add(item(4));
        let _ = snapshot_rows(&take);
        let capture = Capture::attach(&take);

        source.add(item(3));
        let changes = capture.take();
        assert_eq!(changes.len(), 2);
        match (&changes[0], &changes[1]) {
            (Change::Remove(removed), Change::Add(added)) => {
                assert_eq!(removed.row().get("id"), Some(&Value::Int(4)));
                assert_eq!(added.row().get("id"), Some(&Value::Int(3)));
            }
            other => panic!("unexpected changes {:?}", other),
        }
        assert_eq!(ids(snapshot_rows(&take)), vec![2, 3]);
    }

    #[test]
    fn test_remove_inside_window_refills() {
        let (source, take) = setup(2);
        for id in 1..=4 {
            source.add(item(id));
        }
        let _ = snapshot_rows(&take); // window [1, 2]
        let capture = Capture::attach(&take);

        source.remove(item(1));
        let changes = capture.take();
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], Change::Remove(_)));
        match &changes[1] {
            Change::Add(added) => assert_eq!(added.row().get("id"), Some(&Value::Int(3))),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ids(snapshot_rows(&take)), vec![2, 3]);
    }

    #[test]
    fn test_remove_boundary_without_replacement_shrinks() {
        let (source, take) = setup(3);
        source.add(item(1));
        source.add(item(2));
        let _ = snapshot_rows(&take); // window [1, 2], not full
        let capture = Capture::attach(&take);

        source.remove(item(2));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], Change::Remove(_)));
        assert_eq!(ids(snapshot_rows(&take)), vec![1]);

        source.remove(item(1));
        assert_eq!(capture.take().len(), 1);
        assert!(ids(snapshot_rows(&take)).is_empty());
    }

    #[test]
    fn test_remove_outside_window_is_noop() {
        let (source, take) = setup(2);
        for id in 1..=4 {
            source.add(item(id));
        }
        let _ = snapshot_rows(&take);
        let capture = Capture::attach(&take);

        source.remove(item(4));
        assert!(capture.is_empty());
        assert_eq!(ids(snapshot_rows(&take)), vec![1, 2]);
    }

    #[test]
    fn test_edit_inside_window_passes() {
        let schema = SchemaBuilder::new("items")
            .column("id", DataType::Int)
            .column("label", DataType::String)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let source = MemorySource::new(schema);
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        let take: OperatorRef = Take::new(conn.input, Rc::new(MemoryStorage::new()), 2, None);

        let row = |id: i64, label: &str| {
            Row::from_pairs([("id", Value::Int(id)), ("label", Value::from(label))])
        };
        source.add(row(1, "a"));
        source.add(row(2, "b"));
        source.add(row(3, "c"));
        let _ = snapshot_rows(&take);
        let capture = Capture::attach(&take);

        source.edit(row(2, "b"), row(2, "b2"));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], Change::Edit { .. }));

        // Edits beyond the window are swallowed.
        source.edit(row(3, "c"), row(3, "c2"));
        assert!(capture.is_empty());
    }

    #[test]
    fn test_push_before_hydration_is_swallowed() {
        let (source, take) = setup(2);
        let capture = Capture::attach(&take);
        source.add(item(1));
        assert!(capture.is_empty());
    }

    #[test]
    fn test_cleanup_releases_state() {
        let (source, take) = setup(2);
        source.add(item(1));
        source.add(item(2));
        let _ = snapshot_rows(&take);

        let held: Vec<Node> = take.cleanup(&FetchRequest::new()).collect();
        assert_eq!(held.len(), 2);

        // State is gone; a fresh fetch re-hydrates.
        assert_eq!(ids(snapshot_rows(&take)), vec![1, 2]);
    }
}
