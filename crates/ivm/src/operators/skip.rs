//! Skip: drop rows ordered before a bound.
//!
//! Used for OFFSET-like pagination resumed from a previously seen row.
//! Skip is a pure pass-through keyed on row comparison and holds no
//! storage.

use crate::change::Change;
use crate::operator::{
    wire, Basis, FetchRequest, NodeStream, Operator, OperatorRef, Output, OutputEdge, Start,
};
use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use core::cmp::Ordering;
use rivulet_core::{Bound, Row, SourceSchema};

/// Passes through rows at or after a bound.
pub struct Skip {
    input: OperatorRef,
    bound: Bound,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
}

impl Skip {
    /// Creates a skip over `input` and wires itself as its output.
    pub fn new(input: OperatorRef, bound: Bound) -> Rc<Skip> {
        let schema = input.schema();
        let skip = Rc::new(Skip {
            input,
            bound,
            schema,
            output: OutputEdge::new(),
        });
        wire(&skip.input, &skip);
        skip
    }

    fn within(&self, row: &Row) -> bool {
        let ord = self.schema.compare_rows(row, &self.bound.row);
        if self.bound.exclusive {
            ord == Ordering::Greater
        } else {
            ord != Ordering::Less
        }
    }

    /// Merges the request's start with the bound: the scan may begin at
    /// whichever resume point is later.
    fn clamp_start(&self, start: Option<&Start>) -> Start {
        let bound_start = Start {
            row: self.bound.row.clone(),
            basis: if self.bound.exclusive {
                Basis::After
            } else {
                Basis::At
            },
        };
        match start {
            None => bound_start,
            Some(start) => match self.schema.compare_rows(&start.row, &self.bound.row) {
                Ordering::Greater => start.clone(),
                Ordering::Less => bound_start,
                Ordering::Equal => {
                    // Same row: the stricter basis wins.
                    if matches!(start.basis, Basis::After) {
                        start.clone()
                    } else {
                        bound_start
                    }
                }
            },
        }
    }

    fn stream(&self, req: &FetchRequest, cleanup: bool) -> NodeStream {
        let schema = self.schema.clone();
        let bound = self.bound.clone();
        let within = move |row: &Row| {
            let ord = schema.compare_rows(row, &bound.row);
            if bound.exclusive {
                ord == Ordering::Greater
            } else {
                ord != Ordering::Less
            }
        };

        if req.reverse {
            // Reverse scans walk from the top end down and stop at the
            // bound instead of starting from it.
            let upstream = if cleanup {
                self.input.cleanup(req)
            } else {
                self.input.fetch(req)
            };
            Box::new(upstream.take_while(move |n| within(n.row())))
        } else {
            let mut forwarded = req.clone();
            forwarded.start = Some(self.clamp_start(req.start.as_ref()));
            let upstream = if cleanup {
                self.input.cleanup(&forwarded)
            } else {
                self.input.fetch(&forwarded)
            };
            Box::new(upstream.filter(move |n| within(n.row())))
        }
    }
}

impl Operator for Skip {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        self.stream(req, false)
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        self.stream(req, true)
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        self.input.destroy();
    }
}

impl Output for Skip {
    fn push(&self, change: Change) {
        match change {
            Change::Add(node) => {
                if self.within(node.row()) {
                    self.output.push(Change::Add(node));
                }
            }
            Change::Remove(node) => {
                if self.within(node.row()) {
                    self.output.push(Change::Remove(node));
                }
            }
            Change::Edit { old, new } => {
                match (self.within(old.row()), self.within(new.row())) {
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
                if self.within(node.row()) {
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
