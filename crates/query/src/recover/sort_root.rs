//! SortToRootOrder: restore the original root's declared order.
//!
//! Upstream order is not meaningful after extraction, so fetch buffers
//! the full extracted set, sorts it with the original root's
//! comparator, and honors `start`/`reverse` by locating the resume
//! position after sorting. Push is passed through unsorted: pushes are
//! an inherently unordered stream of deltas, ordering is a fetch-time
//! concern.

use alloc::boxed::Box;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cmp::Ordering;
use rivulet_core::{OrderSpec, SourceSchema};
use rivulet_ivm::{
    Basis, Change, FetchRequest, Node, NodeStream, Operator, OperatorRef, Output, OutputEdge,
};

/// Sorts the extracted set into the original root's order.
pub struct SortToRootOrder {
    input: OperatorRef,
    order: OrderSpec,
    schema: Rc<SourceSchema>,
    output: OutputEdge,
}

impl SortToRootOrder {
    /// Creates a sorter over `input` and wires itself as its output.
    /// `order` must be total (include the primary key).
    pub fn new(input: OperatorRef, order: OrderSpec) -> Rc<SortToRootOrder> {
        let schema = Rc::new(input.schema().with_sort(order.clone()));
        let sort = Rc::new(SortToRootOrder {
            input,
            order,
            schema,
            output: OutputEdge::new(),
        });
        let out: Rc<dyn Output> = sort.clone();
        sort.input.set_output(Rc::downgrade(&out));
        sort
    }

    fn sorted(&self, upstream: NodeStream, req: &FetchRequest) -> NodeStream {
        let mut nodes: Vec<Node> = upstream.collect();
        if let Some(constraint) = &req.constraint {
            nodes.retain(|n| constraint.matches(n.row()));
        }
        nodes.sort_by(|a, b| self.order.compare(a.row(), b.row()));
        if req.reverse {
            nodes.reverse();
        }
        match &req.start {
            None => Box::new(nodes.into_iter()),
            Some(start) => {
                let order = self.order.clone();
                let row = start.row.clone();
                let basis = start.basis;
                let reverse = req.reverse;
                Box::new(nodes.into_iter().skip_while(move |node| {
                    let ord = order.compare(node.row(), &row);
                    match (reverse, basis) {
                        (false, Basis::At) => ord == Ordering::Less,
                        (false, Basis::After) => ord != Ordering::Greater,
                        (true, Basis::At) => ord == Ordering::Greater,
                        (true, Basis::After) => ord != Ordering::Less,
                    }
                }))
            }
        }
    }
}

impl Operator for SortToRootOrder {
    fn schema(&self) -> Rc<SourceSchema> {
        self.schema.clone()
    }

    fn fetch(&self, req: &FetchRequest) -> NodeStream {
        let mut upstream_req = FetchRequest::new();
        upstream_req.constraint = req.constraint.clone();
        self.sorted(self.input.fetch(&upstream_req), req)
    }

    fn cleanup(&self, req: &FetchRequest) -> NodeStream {
        let mut upstream_req = FetchRequest::new();
        upstream_req.constraint = req.constraint.clone();
        self.sorted(self.input.cleanup(&upstream_req), req)
    }

    fn set_output(&self, output: Weak<dyn Output>) {
        self.output.set(output);
    }

    fn destroy(&self) {
        self.input.destroy();
    }
}

impl Output for SortToRootOrder {
    fn push(&self, change: Change) {
        self.output.push(change);
    }
}
