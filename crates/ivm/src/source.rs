//! The source contract and the in-memory reference source.
//!
//! A `Source` is an external provider of ordered, filterable row
//! streams. The engine treats each connection as a leaf operator: the
//! source applies base-row changes to its own state first, then pushes
//! the derived change into every connection in connect order.
//!
//! `MemorySource` is the reference implementation used by tests and by
//! embedders without their own row store. It applies pushed-down simple
//! filters itself (`fully_applied_filters` is true) and re-expresses an
//! edit that touches a split-edit key as remove+add, so downstream
//! joins and takes never see an in-place change of an ordering or
//! correlation column.

use crate::change::Change;
use crate::node::Node;
use crate::operator::{
    Basis, FetchRequest, NodeStream, Operator, OperatorRef, Output, OutputEdge, Start,
};
use crate::storage::encode_key;
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::cmp::Ordering;
use hashbrown::HashMap;
use rivulet_core::{CompareOp, OrderSpec, Row, SourceSchema, Value};

/// A pushed-down simple comparison the source may apply itself.
#[derive(Clone, Debug)]
pub struct SimpleFilter {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

impl SimpleFilter {
    /// Creates a filter.
    pub fn new(field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Returns true if the row satisfies the filter.
    pub fn matches(&self, row: &Row) -> bool {
        self.op.eval(row.get_or_null(&self.field), &self.value)
    }
}

/// A change to one base-table row.
#[derive(Clone, Debug)]
pub enum RowChange {
    Add(Row),
    Remove(Row),
    Edit { old: Row, new: Row },
}

/// Result of connecting to a source.
pub struct SourceConnection {
    /// The leaf operator for this connection.
    pub input: OperatorRef,
    /// True if the source applied every requested filter itself, so the
    /// builder may skip the redundant filter stage.
    pub fully_applied_filters: bool,
}

/// An external provider of ordered, filterable row streams.
pub trait Source {
    /// Returns the table schema.
    fn schema(&self) -> Rc<SourceSchema>;

    /// Opens a connection ordered by `sort`.
    ///
    /// `sort` must include every primary-key column (the builder
    /// enforces this before connecting). An edit touching any column in
    /// `split_edit_keys` is pushed as remove+add instead.
    fn connect(
        &self,
        sort: &OrderSpec,
        filters: &[SimpleFilter],
        split_edit_keys: &[String],
    ) -> SourceConnection;
}

type Registry = Rc<RefCell<Vec<Rc<SourceInput>>>>;

/// In-memory source: canonical rows keyed by primary key plus one
/// sorted index per connection.
pub struct MemorySource {
    schema: Rc<SourceSchema>,
    rows: RefCell<HashMap<String, Row>>,
    connections: Registry,
}

impl MemorySource {
    /// Creates an empty source for the given table schema.
    pub fn new(schema: SourceSchema) -> Self {
        Self {
            schema: Rc::new(schema),
            rows: RefCell::new(HashMap::new()),
            connections: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Applies a base-row change and pushes it into every connection.
    ///
    /// Panics on an `Add` for a primary key already visible, a `Remove`
    /// for an unknown key, or an `Edit` that changes the primary key:
    /// those are upstream programmer errors and continuing would corrupt
    /// every downstream operator's incremental state.
    pub fn push(&self, change: RowChange) {
        {
            let mut rows = self.rows.borrow_mut();
            match &change {
                RowChange::Add(row) => {
                    let key = encode_key(&self.schema.row_key(row));
                    let previous = rows.insert(key, row.clone());
                    assert!(
                        previous.is_none(),
                        "add pushed for already-visible row {:?}",
                        self.schema.row_key(row)
                    );
                }
                RowChange::Remove(row) => {
                    let key = encode_key(&self.schema.row_key(row));
                    let removed = rows.remove(&key);
                    assert!(
                        removed.is_some(),
                        "remove pushed for unknown row {:?}",
                        self.schema.row_key(row)
                    );
                }
                RowChange::Edit { old, new } => {
                    assert_eq!(
                        self.schema.row_key(old),
                        self.schema.row_key(new),
                        "edit must preserve the primary key"
                    );
                    let key = encode_key(&self.schema.row_key(old));
                    let previous = rows.insert(key, new.clone());
                    assert!(
                        previous.is_some(),
                        "edit pushed for unknown row {:?}",
                        self.schema.row_key(old)
                    );
                }
            }
        }

        let connections: Vec<Rc<SourceInput>> = self.connections.borrow().clone();
        for connection in connections {
            connection.apply(&change);
        }
    }

    /// Convenience for `push(RowChange::Add(row))`.
    pub fn add(&self, row: Row) {
        self.push(RowChange::Add(row));
    }

    /// Convenience for `push(RowChange::Remove(row))`.
    pub fn remove(&self, row: Row) {
        self.push(RowChange::Remove(row));
    }

    /// Convenience for `push(RowChange::Edit { old, new })`.
    pub fn edit(&self, old: Row, new: Row) {
        self.push(RowChange::Edit { old, new });
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }
}

impl Source for MemorySource {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn connect(
        &self,
        sort: &OrderSpec,
        filters: &[SimpleFilter],
        split_edit_keys: &[String],
    ) -> SourceConnection {
        assert!(
            self.schema.primary_key().iter().all(|k| sort.contains(k)),
            "connection sort must include the primary key of {}",
            self.schema.name()
        );

        let schema = Rc::new(self.schema.with_sort(sort.clone()));

        // Split keys always include the primary key: a key change is
        // never an in-place edit.
        let mut split_keys: Vec<String> = split_edit_keys.to_vec();
        for key in self.schema.primary_key() {
            if !split_keys.contains(key) {
                split_keys.push(key.clone());
            }
        }

        let mut seeded: Vec<Row> = self
            .rows
            .borrow()
            .values()
            .filter(|row| filters.iter().all(|f| f.matches(row)))
            .cloned()
            .collect();
        seeded.sort_by(|a, b| schema.compare_rows(a, b));

        let input = Rc::new(SourceInput {
            schema,
            rows: Rc::new(RefCell::new(seeded)),
            filters: filters.to_vec(),
            split_keys,
            output: OutputEdge::new(),
            registry: Rc::downgrade(&self.connections),
        });
        self.connections.borrow_mut().push(input.clone());

        SourceConnection {
            input,
            fully_applied_filters: true,
        }
    }
}

/// One connection's leaf operator: a sorted, filtered row index.
struct SourceInput {
    schema: Rc<SourceSchema>,
    rows: Rc<RefCell<Vec<Row>>>,
    filters: Vec<SimpleFilter>,
    split_keys: Vec<String>,
    output: OutputEdge,
    registry: Weak<RefCell<Vec<Rc<SourceInput>>>>,
}

impl SourceInput {
    fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    fn insert(&self, row: Row) {
        let mut rows = self.rows.borrow_mut();
        match rows.binary_search_by(|r| self.schema.compare_rows(r, &row)) {
            Err(pos) => rows.insert(pos, row),
            Ok(_) => panic!(
                "duplicate sort key in source {}; sort order is not total",
                self.schema.name()
            ),
        }
    }

    fn delete(&self, row: &Row) {
        let mut rows = self.rows.borrow_mut();
        match rows.binary_search_by(|r| self.schema.compare_rows(r, row)) {
            Ok(pos) => {
                rows.remove(pos);
            }
            Err(_) => panic!(
                "remove pushed for row not present in source {}",
                self.schema.name()
            ),
        }
    }

    /// Applies one base change to this connection's index, then pushes
    /// the derived change downstream. The index is updated before the
    /// push so a downstream re-fetch observes post-change state.
    fn apply(&self, change: &RowChange) {
        match change {
            RowChange::Add(row) => {
                if self.matches(row) {
                    self.insert(row.clone());
                    self.output.push(Change::Add(Node::leaf(row.clone())));
                }
            }
            RowChange::Remove(row) => {
                if self.matches(row) {
                    self.delete(row);
                    self.output.push(Change::Remove(Node::leaf(row.clone())));
                }
            }
            RowChange::Edit { old, new } => {
                if self
                    .split_keys
                    .iter()
                    .any(|k| old.get_or_null(k) != new.get_or_null(k))
                {
                    self.apply(&RowChange::Remove(old.clone()));
                    self.apply(&RowChange::Add(new.clone()));
                    return;
                }
                match (self.matches(old), self.matches(new)) {
                    (true, true) => {
                        self.delete(old);
                        self.insert(new.clone());
                        self.output.push(Change::edit(
                            Node::leaf(old.clone()),
                            Node::leaf(new.clone()),
                        ));
                    }
                    (true, false) => {
                        self.delete(old);
                        self.output.push(Change::Remove(Node::leaf(old.clone())));
                    }
                    (false, true) => {
                        self.insert(new.clone());
                        self.output.push(Change::Add(Node::leaf(new.clone())));
                    }
                    (false, false) => {}
                }
            }
        }
    }
}

impl Operator for SourceInput {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        Box::new(SourceScan {
            rows: self.rows.clone(),
            schema: self.schema.clone(),
            constraint: req.constraint.clone(),
            start: req.start.clone(),
            reverse: req.reverse,
            cursor: None,
            started: false,
        })
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        // The index is shared by every consumer of this connection;
        // nothing is held per consumer, so cleanup is a plain fetch.
        self.fetch(req)
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .borrow_mut()
                .retain(|conn| !core::ptr::eq(Rc::as_ptr(conn), self));
        }
    }
}

/// Lazy, restartable cursor scan over a connection's sorted index.
///
/// The cursor remembers the last yielded row and relocates it by
/// comparison on every step, so the scan stays valid across concurrent
/// index mutation between `next` calls.
struct SourceScan {
    rows: Rc<RefCell<Vec<Row>>>,
    schema: Rc<SourceSchema>,
    constraint: Option<crate::operator::Constraint>,
    start: Option<Start>,
    reverse: bool,
    cursor: Option<Row>,
    started: bool,
}

impl SourceScan {
    fn admits(&self, row: &Row) -> bool {
        self.constraint
            .as_ref()
            .map(|c| c.matches(row))
            .unwrap_or(true)
    }
}

fn lower_bound(rows: &[Row], schema: &SourceSchema, row: &Row) -> usize {
    rows.partition_point(|r| schema.compare_rows(r, row) == Ordering::Less)
}

fn upper_bound(rows: &[Row], schema: &SourceSchema, row: &Row) -> usize {
    rows.partition_point(|r| schema.compare_rows(r, row) != Ordering::Greater)
}

impl Iterator for SourceScan {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let rows = self.rows.borrow();

        if !self.reverse {
            let mut pos = match (&self.cursor, &self.start, self.started) {
                (Some(cursor), _, _) => upper_bound(&rows, &self.schema, cursor),
                (None, Some(start), false) => match start.basis {
                    Basis::At => lower_bound(&rows, &self.schema, &start.row),
                    Basis::After => upper_bound(&rows, &self.schema, &start.row),
                },
                (None, _, true) => return None,
                (None, None, false) => 0,
            };
            self.started = true;
            while pos < rows.len() {
                if self.admits(&rows[pos]) {
                    self.cursor = Some(rows[pos].clone());
                    return Some(Node::leaf(rows[pos].clone()));
                }
                pos += 1;
            }
            None
        } else {
            let end = match (&self.cursor, &self.start, self.started) {
                (Some(cursor), _, _) => lower_bound(&rows, &self.schema, cursor),
                (None, Some(start), false) => match start.basis {
                    Basis::At => upper_bound(&rows, &self.schema, &start.row),
                    Basis::After => lower_bound(&rows, &self.schema, &start.row),
                },
                (None, _, true) => return None,
                (None, None, false) => rows.len(),
            };
            self.started = true;
            let mut pos = end;
            while pos > 0 {
                pos -= 1;
                if self.admits(&rows[pos]) {
                    self.cursor = Some(rows[pos].clone());
                    return Some(Node::leaf(rows[pos].clone()));
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Capture;
    use crate::operator::Constraint;
    use alloc::vec;
    use rivulet_core::schema::SchemaBuilder;
    use rivulet_core::DataType;

    fn users_schema() -> SourceSchema {
        SchemaBuilder::new("users")
            .column("id", DataType::Int)
            .column("age", DataType::Int)
            .primary_key(&["id"])
            .build()
            .unwrap()
    }

    fn user(id: i64, age: i64) -> Row {
        Row::from_pairs([("id", Value::Int(id)), ("age", Value::Int(age))])
    }

    fn collect_ids(stream: NodeStream) -> Vec<i64> {
        stream
            .map(|n| n.row().get("id").unwrap().as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_fetch_in_sort_order() {
        let source = MemorySource::new(users_schema());
        source.add(user(2, 30));
        source.add(user(1, 20));
        source.add(user(3, 40));

        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        assert!(conn.fully_applied_filters);
        let ids = collect_ids(conn.input.fetch(&FetchRequest::new()));
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_fetch_secondary_sort() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 30));
        source.add(user(2, 10));
        source.add(user(3, 20));

        let sort = OrderSpec::asc("age").then_asc("id");
        let conn = source.connect(&sort, &[], &[]);
        let ids = collect_ids(conn.input.fetch(&FetchRequest::new()));
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_fetch_with_start_and_reverse() {
        let source = MemorySource::new(users_schema());
        for id in 1..=5 {
            source.add(user(id, id * 10));
        }
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);

        let req = FetchRequest::new().with_start(Start::after(user(2, 20)));
        assert_eq!(collect_ids(conn.input.fetch(&req)), vec![3, 4, 5]);

        let req = FetchRequest::new().with_start(Start::at(user(2, 20)));
        assert_eq!(collect_ids(conn.input.fetch(&req)), vec![2, 3, 4, 5]);

        let req = FetchRequest::new().reversed();
        assert_eq!(collect_ids(conn.input.fetch(&req)), vec![5, 4, 3, 2, 1]);

        let req = FetchRequest::new()
            .with_start(Start::at(user(3, 30)))
            .reversed();
        assert_eq!(collect_ids(conn.input.fetch(&req)), vec![3, 2, 1]);

        let req = FetchRequest::new()
            .with_start(Start::after(user(3, 30)))
            .reversed();
        assert_eq!(collect_ids(conn.input.fetch(&req)), vec![2, 1]);
    }

    #[test]
    fn test_fetch_start_row_need_not_exist() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 10));
        source.add(user(3, 30));
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);

        let req = FetchRequest::new().with_start(Start::at(user(2, 20)));
        assert_eq!(collect_ids(conn.input.fetch(&req)), vec![3]);
    }

    #[test]
    fn test_fetch_with_constraint() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 20));
        source.add(user(2, 30));
        source.add(user(3, 20));
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);

        let req =
            FetchRequest::new().with_constraint(Constraint::new([("age", Value::Int(20))]));
        assert_eq!(collect_ids(conn.input.fetch(&req)), vec![1, 3]);
    }

    #[test]
    fn test_filters_applied_on_fetch_and_push() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 15));
        source.add(user(2, 25));

        let filter = SimpleFilter::new("age", CompareOp::Gt, Value::Int(18));
        let conn = source.connect(&OrderSpec::asc("id"), &[filter], &[]);
        let capture = Capture::attach(&conn.input);

        assert_eq!(collect_ids(conn.input.fetch(&FetchRequest::new())), vec![2]);

        source.add(user(3, 17)); // filtered out
        source.add(user(4, 40)); // passes
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].row().get("id"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_edit_crossing_filter_boundary() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 15));

        let filter = SimpleFilter::new("age", CompareOp::Gt, Value::Int(18));
        let conn = source.connect(&OrderSpec::asc("id"), &[filter], &[]);
        let capture = Capture::attach(&conn.input);

        source.edit(user(1, 15), user(1, 21));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], Change::Add(_)));

        source.edit(user(1, 21), user(1, 10));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], Change::Remove(_)));
    }

    #[test]
    fn test_split_edit_keys() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 20));

        let conn = source.connect(&OrderSpec::asc("id"), &[], &[String::from("age")]);
        let capture = Capture::attach(&conn.input);

        // Editing a split key arrives as remove + add.
        source.edit(user(1, 20), user(1, 21));
        let changes = capture.take();
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], Change::Remove(_)));
        assert!(matches!(changes[1], Change::Add(_)));
    }

    #[test]
    fn test_plain_edit_stays_edit() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 20));
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        let capture = Capture::attach(&conn.input);

        source.edit(user(1, 20), user(1, 99));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], Change::Edit { .. }));
    }

    #[test]
    #[should_panic(expected = "already-visible")]
    fn test_duplicate_add_panics() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 20));
        source.add(user(1, 25));
    }

    #[test]
    #[should_panic(expected = "unknown row")]
    fn test_remove_unknown_panics() {
        let source = MemorySource::new(users_schema());
        source.remove(user(1, 20));
    }

    #[test]
    fn test_destroy_unregisters() {
        let source = MemorySource::new(users_schema());
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        assert_eq!(source.connection_count(), 1);
        conn.input.destroy();
        assert_eq!(source.connection_count(), 0);
    }

    #[test]
    fn test_scan_survives_mutation_between_steps() {
        let source = MemorySource::new(users_schema());
        source.add(user(1, 10));
        source.add(user(3, 30));
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);

        let mut stream = conn.input.fetch(&FetchRequest::new());
        let first = stream.next().unwrap();
        assert_eq!(first.row().get("id"), Some(&Value::Int(1)));

        // Rows inserted behind the cursor are skipped, ahead are seen.
        source.add(user(2, 20));
        source.add(user(4, 40));
        let rest: Vec<i64> = collect_ids(stream);
        assert_eq!(rest, vec![2, 3, 4]);
    }
}
