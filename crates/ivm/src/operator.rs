//! The operator protocol.
//!
//! Every pipeline stage implements [`Operator`]; stages that receive
//! pushed changes from an upstream stage also implement [`Output`].
//! Operators are linked with `Rc`: the downstream stage owns its input
//! strongly, while the upstream stage holds a `Weak` reference to its one
//! downstream consumer, so graphs never form reference cycles.
//!
//! Push is synchronous and depth-first. An operator must release every
//! borrow of its private state before calling downstream, because the
//! downstream stage is allowed to call `fetch` back into it while
//! handling the push (Take does this when refilling its window).

use crate::change::Change;
use crate::node::Node;
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use rivulet_core::{Row, SourceSchema, Value};

/// An equality filter hint passed down with a fetch, used for index
/// selection and child lookup by correlation key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Constraint {
    fields: Vec<(String, Value)>,
}

impl Constraint {
    /// Creates a constraint over (column, value) pairs.
    pub fn new<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Creates a constraint pairing columns with values positionally.
    pub fn from_key(columns: &[String], values: &[Value]) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self {
            fields: columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
        }
    }

    /// Returns the constrained (column, value) pairs.
    #[inline]
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Returns true if no column is constrained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns true if the row satisfies every constrained column.
    pub fn matches(&self, row: &Row) -> bool {
        self.fields
            .iter()
            .all(|(column, value)| row.get_or_null(column) == value)
    }
}

/// Whether a scan resumes at or strictly after the start row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Basis {
    At,
    After,
}

/// A resume point for a scan: a previously seen row plus a basis.
///
/// The row is a comparison point, not an identity: it may no longer
/// exist upstream, and the scan resumes at the first row ordered at or
/// after it.
#[derive(Clone, Debug)]
pub struct Start {
    pub row: Row,
    pub basis: Basis,
}

impl Start {
    /// Creates a resume point including the row itself.
    pub fn at(row: Row) -> Self {
        Self {
            row,
            basis: Basis::At,
        }
    }

    /// Creates a resume point strictly after the row.
    pub fn after(row: Row) -> Self {
        Self {
            row,
            basis: Basis::After,
        }
    }
}

/// Parameters of a fetch or cleanup call.
#[derive(Clone, Debug, Default)]
pub struct FetchRequest {
    /// Equality filter hint for index selection.
    pub constraint: Option<Constraint>,
    /// Resume point for the scan.
    pub start: Option<Start>,
    /// Iterate in reverse sort order.
    pub reverse: bool,
}

impl FetchRequest {
    /// An unconstrained forward fetch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Sets the resume point.
    pub fn with_start(mut self, start: Start) -> Self {
        self.start = Some(start);
        self
    }

    /// Reverses the iteration order.
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// A finite, lazily produced, restartable sequence of nodes.
///
/// Streams own `Rc` handles into the operators they read from rather
/// than borrows, so a stream can be held while the graph is pushed to;
/// each `next` call observes current upstream state.
pub type NodeStream = Box<dyn Iterator<Item = Node>>;

/// Returns an empty node stream.
pub fn empty_stream() -> NodeStream {
    Box::new(core::iter::empty())
}

/// The downstream consumer of an operator's pushed changes.
pub trait Output {
    /// Applies one incremental change.
    fn push(&self, change: Change);
}

/// A pipeline stage.
pub trait Operator {
    /// Returns the schema of the rows this stage emits.
    fn schema(&self) -> Rc<SourceSchema>;

    /// Pulls the stage's current result, ordered by `schema().sort()`.
    ///
    /// Repeated identical calls yield the same sequence, subject to
    /// upstream state.
    fn fetch(&self, req: &FetchRequest) -> NodeStream;

    /// Signals that the consumer no longer needs this data; returns what
    /// was being held so the message can propagate upstream.
    fn cleanup(&self, req: &FetchRequest) -> NodeStream;

    /// Wires the one downstream consumer. Fan-out to multiple consumers
    /// exists only via the explicit FanOut operator.
    fn set_output(&self, output: Weak<dyn Output>);

    /// Irreversibly tears down this operator and everything upstream.
    fn destroy(&self);
}

impl core::fmt::Debug for dyn Operator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Operator")
    }
}

/// Shared handle to a pipeline stage.
pub type OperatorRef = Rc<dyn Operator>;

/// A single downstream edge, held weakly.
#[derive(Default)]
pub struct OutputEdge {
    slot: RefCell<Option<Weak<dyn Output>>>,
}

impl OutputEdge {
    /// Creates an unwired edge.
    pub fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    /// Replaces the downstream consumer.
    pub fn set(&self, output: Weak<dyn Output>) {
        *self.slot.borrow_mut() = Some(output);
    }

    /// Pushes a change to the downstream consumer, if one is wired and
    /// still alive. The internal borrow is released before the call so
    /// the consumer may fetch back through this operator.
    pub fn push(&self, change: Change) {
        let target = self.slot.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(target) = target {
            target.push(change);
        }
    }
}

/// Wires `op` as the downstream consumer of `input`.
pub(crate) fn wire<T: Output + 'static>(input: &OperatorRef, op: &Rc<T>) {
    let out: Rc<dyn Output> = op.clone();
    input.set_output(Rc::downgrade(&out));
}
