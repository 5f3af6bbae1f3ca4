//! Stateless row filter.

use crate::change::Change;
use crate::operator::{
    wire, FetchRequest, NodeStream, Operator, OperatorRef, Output, OutputEdge,
};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use rivulet_core::{Row, SourceSchema};

/// Predicate over a single row.
pub type RowPredicate = Rc<dyn Fn(&Row) -> bool>;

/// Passes through rows satisfying a predicate.
///
/// An edit whose old and new rows land on different sides of the
/// predicate is re-expressed as the corresponding add or remove, so
/// downstream visibility stays consistent.
pub struct Filter {
    input: OperatorRef,
    predicate: RowPredicate,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
}

impl Filter {
    /// Creates a filter over `input` and wires itself as its output.
    pub fn new(input: OperatorRef, predicate: RowPredicate) -> Rc<Filter> {
        let schema = input.schema();
        let filter = Rc::new(Filter {
            input,
            predicate,
            schema,
            output: OutputEdge::new(),
        });
        wire(&filter.input, &filter);
        filter
    }
}

impl Operator for Filter {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        let predicate = self.predicate.clone();
        Box::new(self.input.fetch(req).filter(move |n| predicate(n.row())))
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        let predicate = self.predicate.clone();
        Box::new(self.input.cleanup(req).filter(move |n| predicate(n.row())))
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        self.input.destroy();
    }
}

impl Output for Filter {
    fn push(&self, change: Change) {
        match change {
            Change::Add(node) => {
                if (self.predicate)(node.row()) {
                    self.output.push(Change::Add(node));
                }
            }
            Change::Remove(node) => {
                if (self.predicate)(node.row()) {
                    self.output.push(Change::Remove(node));
                }
            }
            Change::Edit { old, new } => {
                match ((self.predicate)(old.row()), (self.predicate)(new.row())) {
                    (true, true) => self.output.push(Change::Edit { old, new }),
                    (true, false) => self.output.push(Change::Remove(old)),
                    (false, true) => self.output.push(Change::Add(new)),
                    (false, false) => {}
                }
            }
            Change::Child {
                node,
                relationship,
                change,
            } => {
                if (self.predicate)(node.row()) {
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
    use alloc::vec::Vec;
    use rivulet_core::schema::SchemaBuilder;
    use rivulet_core::{DataType, OrderSpec, Value};

    fn setup() -> (MemorySource, OperatorRef) {
        let schema = SchemaBuilder::new("users")
            .column("id", DataType::Int)
            .column("age", DataType::Int)
            .primary_key(&["id"])
            .build()
            .unwrap();
        let source = MemorySource::new(schema);
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        (source, conn.input)
    }

    fn user(id: i64, age: i64) -> Row {
        Row::from_pairs([("id", Value::Int(id)), ("age", Value::Int(age))])
    }

    fn adult() -> RowPredicate {
        Rc::new(|row: &Row| {
            row.get("age")
                .and_then(|v| v.as_int())
                .map(|age| age >= 18)
                .unwrap_or(false)
        })
    }

    #[test]
    fn test_fetch_filters() {
        let (source, input) = setup();
        source.add(user(1, 15));
        source.add(user(2, 25));

        let filter: OperatorRef = Filter::new(input, adult());
        let rows = snapshot_rows(&filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_push_filters() {
        let (source, input) = setup();
        let filter: OperatorRef = Filter::new(input, adult());
        let capture = Capture::attach(&filter);

        source.add(user(1, 15));
        assert!(capture.is_empty());
        source.add(user(2, 25));
        assert_eq!(capture.take().len(), 1);
    }

    #[test]
    fn test_edit_transitions() {
        let (source, input) = setup();
        source.add(user(1, 15));
        let filter: OperatorRef = Filter::new(input, adult());
        let capture = Capture::attach(&filter);

        // fail -> pass becomes an add
        source.edit(user(1, 15), user(1, 20));
        let changes = capture.take();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], Change::Add(_)));

        // pass -> pass stays an edit
        source.edit(user(1, 20), user(1, 30));
        let changes = capture.take();
        assert!(matches!(changes[0], Change::Edit { .. }));

        // pass -> fail becomes a remove
        source.edit(user(1, 30), user(1, 10));
        let changes = capture.take();
        assert!(matches!(changes[0], Change::Remove(_)));

        // fail -> fail is swallowed
        source.edit(user(1, 10), user(1, 12));
        assert!(capture.is_empty());
    }

    #[test]
    fn test_fetch_restartable() {
        let (source, input) = setup();
        source.add(user(1, 20));
        source.add(user(2, 30));
        let filter: OperatorRef = Filter::new(input, adult());

        let a: Vec<Row> = snapshot_rows(&filter);
        let b: Vec<Row> = snapshot_rows(&filter);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }
}
