//! Terminal output capture and hydration helpers.

use crate::change::Change;
use crate::node::Node;
use crate::operator::{FetchRequest, Operator, OperatorRef, Output};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use rivulet_core::Row;

/// A terminal `Output` that records every pushed change.
#[derive(Default)]
pub struct Capture {
    changes: RefCell<Vec<Change>>,
}

impl Capture {
    /// Creates a detached capture.
    pub fn new() -> Rc<Capture> {
        Rc::new(Capture::default())
    }

    /// Creates a capture and wires it as `input`'s output.
    pub fn attach(input: &OperatorRef) -> Rc<Capture> {
        let capture = Capture::new();
        let out: Rc<dyn Output> = capture.clone();
        input.set_output(Rc::downgrade(&out));
        capture
    }

    /// Returns the recorded changes, clearing the buffer.
    pub fn take(&self) -> Vec<Change> {
        self.changes.borrow_mut().drain(..).collect()
    }

    /// Returns the number of recorded changes.
    pub fn len(&self) -> usize {
        self.changes.borrow().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.changes.borrow().is_empty()
    }
}

impl Output for Capture {
    fn push(&self, change: Change) {
        self.changes.borrow_mut().push(change);
    }
}

/// Fetches the pipeline's current nodes with a default request.
pub fn snapshot(input: &OperatorRef) -> Vec<Node> {
    input.fetch(&FetchRequest::new()).collect()
}

/// Fetches the pipeline's current rows with a default request.
pub fn snapshot_rows(input: &OperatorRef) -> Vec<Row> {
    input
        .fetch(&FetchRequest::new())
        .map(Node::into_row)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::Value;

    #[test]
    fn test_capture_records_and_drains() {
        let capture = Capture::new();
        capture.push(Change::Add(Node::leaf(Row::from_pairs([(
            "id",
            Value::Int(1),
        )]))));
        assert_eq!(capture.len(), 1);
        assert_eq!(capture.take().len(), 1);
        assert!(capture.is_empty());
    }
}
