//! FanOut / FanIn: OR over independent filter branches.
//!
//! FanOut duplicates its input's stream and pushes to N branch
//! pipelines; FanIn merges the branch outputs back into one stream,
//! de-duplicating by primary key so a row satisfying several branches
//! is emitted exactly once.
//!
//! Two de-duplication regimes:
//!
//! - A change fanned out by FanOut reaches every branch within one
//!   bracketed cycle: FanIn accumulates the branch deltas and merges
//!   them when the cycle ends (union visibility before = any branch
//!   emitted edit/remove, after = any emitted edit/add).
//! - A change entering a single branch from inside (the child side of a
//!   branch-local join) arrives outside any cycle: FanIn probes the
//!   sibling branches for current membership of the row. Siblings
//!   answer from their processed state (Exists serves cached counts),
//!   so a branch that has not yet seen the same base change reports its
//!   pre-change membership and the net emission stays exactly one.

use crate::change::Change;
use crate::node::Node;
use crate::operator::{
    wire, Constraint, FetchRequest, NodeStream, Operator, OperatorRef, Output, OutputEdge,
};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::cmp::Ordering;
use core::iter::Peekable;
use rivulet_core::{Row, SourceSchema};

/// Duplicates one input to N branch pipelines.
pub struct FanOut {
    input: OperatorRef,
    schema: Rc<SourceSchema>,
    outputs: RefCell<Vec<Weak<dyn Output>>>,
    fan_in: RefCell<Option<Weak<FanIn>>>,
    destroy_calls: Cell<usize>,
}

impl FanOut {
    /// Creates a fan-out over `input` and wires itself as its output.
    pub fn new(input: OperatorRef) -> Rc<FanOut> {
        let schema = input.schema();
        let fan_out = Rc::new(FanOut {
            input,
            schema,
            outputs: RefCell::new(Vec::new()),
            fan_in: RefCell::new(None),
            destroy_calls: Cell::new(0),
        });
        wire(&fan_out.input, &fan_out);
        fan_out
    }

    pub(crate) fn set_fan_in(&self, fan_in: &Rc<FanIn>) {
        *self.fan_in.borrow_mut() = Some(Rc::downgrade(fan_in));
    }
}

impl Operator for FanOut {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        self.input.fetch(req)
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        self.input.cleanup(req)
    }

    /// Unlike every other operator, fan-out accepts multiple outputs:
    /// one per OR branch, registered in branch order.
    fn set_output(&self, output: Weak<dyn Output>) {
        self.outputs.borrow_mut().push(output);
    }

    /// Each branch propagates destroy; the shared input goes down once
    /// the last branch has.
    fn destroy(&self) {
        self.destroy_calls.set(self.destroy_calls.get() + 1);
        if self.destroy_calls.get() >= self.outputs.borrow().len() {
            self.input.destroy();
        }
    }
}

impl Output for FanOut {
    fn push(&self, change: Change) {
        let fan_in = self.fan_in.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(fan_in) = &fan_in {
            fan_in.begin_cycle();
        }
        let outputs: Vec<Weak<dyn Output>> = self.outputs.borrow().clone();
        for output in outputs {
            if let Some(output) = output.upgrade() {
                output.push(change.clone());
            }
        }
        if let Some(fan_in) = &fan_in {
            fan_in.end_cycle();
        }
    }
}

/// Merges N branch pipelines back into one deduplicated stream.
pub struct FanIn {
    branches: Vec<OperatorRef>,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
    cycle: RefCell<Option<Vec<Change>>>,
    ends: RefCell<Vec<Rc<FanInBranchEnd>>>,
}

impl FanIn {
    /// Creates a fan-in over `branches`, pairs it with `fan_out` for
    /// push-cycle bracketing, and wires itself as every branch's output.
    pub fn new(fan_out: &Rc<FanOut>, branches: Vec<OperatorRef>) -> Rc<FanIn> {
        assert!(!branches.is_empty(), "fan-in requires at least one branch");
        let schema = fan_out.schema();
        let fan_in = Rc::new(FanIn {
            branches,
            schema,
            output: OutputEdge::new(),
            cycle: RefCell::new(None),
            ends: RefCell::new(Vec::new()),
        });
        for branch in &fan_in.branches {
            let end = Rc::new(FanInBranchEnd {
                fan_in: Rc::downgrade(&fan_in),
            });
            let out: Rc<dyn Output> = end.clone();
            branch.set_output(Rc::downgrade(&out));
            fan_in.ends.borrow_mut().push(end);
        }
        fan_out.set_fan_in(&fan_in);
        fan_in
    }

    fn begin_cycle(&self) {
        *self.cycle.borrow_mut() = Some(Vec::new());
    }

    fn end_cycle(&self) {
        let buffered = self.cycle.borrow_mut().take();
        if let Some(buffered) = buffered {
            self.flush(buffered);
        }
    }

    /// Merges the deltas every branch produced for one fanned change.
    /// All of them concern the same base row.
    fn flush(&self, buffered: Vec<Change>) {
        if buffered.is_empty() {
            return;
        }
        if buffered
            .iter()
            .all(|c| matches!(c, Change::Child { .. }))
        {
            // Identical child changes, one per passing branch.
            let first = buffered.into_iter().next().unwrap();
            self.output.push(first);
            return;
        }

        let was_visible = buffered
            .iter()
            .any(|c| matches!(c, Change::Remove(_) | Change::Edit { .. }));
        let is_visible = buffered
            .iter()
            .any(|c| matches!(c, Change::Add(_) | Change::Edit { .. }));

        let old_node = buffered.iter().find_map(|c| match c {
            Change::Edit { old, .. } => Some(old.clone()),
            Change::Remove(node) => Some(node.clone()),
            _ => None,
        });
        let new_node = buffered.iter().find_map(|c| match c {
            Change::Edit { new, .. } => Some(new.clone()),
            Change::Add(node) => Some(node.clone()),
            _ => None,
        });

        match (was_visible, is_visible) {
            (true, true) => self.output.push(Change::Edit {
                old: old_node.expect("visible row has an old node"),
                new: new_node.expect("visible row has a new node"),
            }),
            (false, true) => self
                .output
                .push(Change::Add(new_node.expect("add carries a node"))),
            (true, false) => self
                .output
                .push(Change::Remove(old_node.expect("remove carries a node"))),
            (false, false) => {}
        }
    }

    /// True if any branch other than `skip` currently contains the row.
    fn in_other_branch(&self, skip: usize, row: &Row) -> bool {
        let pk = self.schema.primary_key();
        let values = row.project(pk);
        let constraint = Constraint::from_key(pk, &values);
        self.branches.iter().enumerate().any(|(i, branch)| {
            i != skip
                && branch
                    .fetch(&FetchRequest::new().with_constraint(constraint.clone()))
                    .next()
                    .is_some()
        })
    }

    fn push_from_branch(&self, index: usize, change: Change) {
        {
            let mut cycle = self.cycle.borrow_mut();
            if let Some(buffer) = cycle.as_mut() {
                buffer.push(change);
                return;
            }
        }
        match change {
            Change::Add(node) => {
                if !self.in_other_branch(index, node.row()) {
                    self.output.push(Change::Add(node));
                }
            }
            Change::Remove(node) => {
                if !self.in_other_branch(index, node.row()) {
                    self.output.push(Change::Remove(node));
                }
            }
            other => self.output.push(other),
        }
    }

    fn branch_index(&self, end: &FanInBranchEnd) -> usize {
        self.ends
            .borrow()
            .iter()
            .position(|e| core::ptr::eq(Rc::as_ptr(e), end))
            .expect("push from an unregistered branch")
    }
}

impl Operator for FanIn {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        Box::new(FanInMerge {
            streams: self
                .branches
                .iter()
                .map(|b| b.fetch(req).peekable())
                .collect(),
            schema: self.schema.clone(),
            reverse: req.reverse,
        })
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        Box::new(FanInMerge {
            streams: self
                .branches
                .iter()
                .map(|b| b.cleanup(req).peekable())
                .collect(),
            schema: self.schema.clone(),
            reverse: req.reverse,
        })
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        for branch in &self.branches {
            branch.destroy();
        }
    }
}

/// Receives one branch's pushes, tagged by identity.
struct FanInBranchEnd {
    fan_in: Weak<FanIn>,
}

impl Output for FanInBranchEnd {
    fn push(&self, change: Change) {
        if let Some(fan_in) = self.fan_in.upgrade() {
            let index = fan_in.branch_index(self);
            fan_in.push_from_branch(index, change);
        }
    }
}

/// K-way ordered merge with primary-key dedup.
struct FanInMerge {
    streams: Vec<Peekable<NodeStream>>,
    schema: Rc<SourceSchema>,
    reverse: bool,
}

impl Iterator for FanInMerge {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let mut best: Option<(usize, Row)> = None;
        for i in 0..self.streams.len() {
            let row = match self.streams[i].peek() {
                Some(node) => node.row().clone(),
                None => continue,
            };
            best = match best {
                None => Some((i, row)),
                Some((best_i, best_row)) => {
                    let ord = self.schema.compare_rows(&row, &best_row);
                    let better = if self.reverse {
                        ord == Ordering::Greater
                    } else {
                        ord == Ordering::Less
                    };
                    if better {
                        Some((i, row))
                    } else {
                        Some((best_i, best_row))
                    }
                }
            };
        }
        let (best_i, best_row) = best?;
        let node = self.streams[best_i].next().expect("peeked stream is live");

        // The sort order is total, so an equal row in a sibling stream
        // is the same row reached through another branch.
        for i in 0..self.streams.len() {
            if i == best_i {
                continue;
            }
            while let Some(peeked) = self.streams[i].peek() {
                if self.schema.compare_rows(peeked.row(), &best_row) == Ordering::Equal {
                    self.streams[i].next();
                } else {
                    break;
                }
            }
        }
        Some(node)
    }
}
