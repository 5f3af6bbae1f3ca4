//! Filter compilation: WHERE trees to row predicates and pushdown.

use crate::ast::Condition;
use alloc::rc::Rc;
use alloc::vec::Vec;
use rivulet_core::Row;
use rivulet_ivm::{RowPredicate, SimpleFilter};

/// Compiles a subquery-free condition tree into a row predicate.
///
/// Exists conditions never reach this point: the builder routes them
/// through hidden joins before filter application.
pub fn compile_predicate(condition: &Condition) -> RowPredicate {
    match condition {
        Condition::Simple(simple) => {
            let field = simple.field.clone();
            let op = simple.op;
            let value = simple.value.clone();
            Rc::new(move |row: &Row| op.eval(row.get_or_null(&field), &value))
        }
        Condition::And(children) => {
            let compiled: Vec<RowPredicate> = children.iter().map(compile_predicate).collect();
            Rc::new(move |row: &Row| compiled.iter().all(|p| p(row)))
        }
        Condition::Or(children) => {
            let compiled: Vec<RowPredicate> = children.iter().map(compile_predicate).collect();
            Rc::new(move |row: &Row| compiled.iter().any(|p| p(row)))
        }
        Condition::Exists(_) => {
            panic!("correlated subquery reached filter compilation")
        }
    }
}

/// Splits the top-level conjunctive simple conditions out of a WHERE
/// tree for source-level pushdown.
///
/// Returns the pushdownable filters and the residual tree that remains
/// if the source fully applies them.
pub fn split_pushdown(condition: &Condition) -> (Vec<SimpleFilter>, Option<Condition>) {
    match condition {
        Condition::Simple(simple) => (
            alloc::vec![SimpleFilter::new(
                simple.field.clone(),
                simple.op,
                simple.value.clone(),
            )],
            None,
        ),
        Condition::And(children) => {
            let mut filters = Vec::new();
            let mut residual = Vec::new();
            for child in children {
                match child {
                    Condition::Simple(simple) => filters.push(SimpleFilter::new(
                        simple.field.clone(),
                        simple.op,
                        simple.value.clone(),
                    )),
                    other => residual.push(other.clone()),
                }
            }
            let residual = match residual.len() {
                0 => None,
                1 => Some(residual.into_iter().next().unwrap()),
                _ => Some(Condition::And(residual)),
            };
            (filters, residual)
        }
        other => (Vec::new(), Some(other.clone())),
    }
}
