//! The flip-exists transform.
//!
//! When an EXISTS subquery's table is far smaller or more selective
//! than the enclosing table, it is cheaper to enumerate the subquery
//! table and check existence of the enclosing rows. Because join output
//! is tree-shaped, that reordering must restructure the AST: the marked
//! condition's subquery becomes the new pipeline root, and each
//! original ancestor becomes a nested EXISTS whose correlation is the
//! inverse of the original. The relocated original root keeps a
//! `was_root` tag carrying its orderBy/limit/start, which are stripped
//! at subquery position and reapplied by the caller atop the recovery
//! operators.
//!
//! Marker search is depth-first with inner markers found before outer
//! ones. Exactly one flip is applied per invocation; callers loop for
//! multi-hop reordering. A marker inside an OR branch, or on a NOT
//! EXISTS condition, is unsupported: the transform skips it and, if
//! nothing else is marked, returns the AST unchanged.

use crate::ast::{Condition, Correlation, ExistsCondition, ExistsOp, QueryAst, RootAttrs};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

/// Result of [`flip_exists`].
#[derive(Clone, Debug, PartialEq)]
pub enum FlipOutcome {
    /// No applicable marker; the AST is returned unmodified.
    Unchanged(QueryAst),
    /// One flip was applied.
    Flipped(FlippedQuery),
}

/// A flipped query plus everything the caller needs to recover
/// original-root rows.
#[derive(Clone, Debug, PartialEq)]
pub struct FlippedQuery {
    /// The rewritten AST, rooted at the flipped subquery's table.
    pub ast: QueryAst,
    /// Relationship aliases from the new root down to the tagged
    /// original-root node.
    pub path_to_root: Vec<String>,
    /// Table of the original root.
    pub root_table: String,
    /// The original root's presentation attributes, stripped at
    /// subquery position.
    pub root_attrs: RootAttrs,
}

/// Applies at most one flip to the AST.
pub fn flip_exists(ast: QueryAst) -> FlipOutcome {
    let Some(path) = locate_marker(&ast) else {
        return FlipOutcome::Unchanged(ast);
    };
    debug_log!("flip_exists: applying marker at depth {}", path.len());
    FlipOutcome::Flipped(rebuild(ast, &path))
}

/// Finds the first applicable marker, depth-first, inner before outer.
/// Returns the chain of exists-slot indices from the root down to the
/// marked condition. OR subtrees and NOT EXISTS subqueries are never
/// descended into: reordering there would change query semantics.
fn locate_marker(ast: &QueryAst) -> Option<Vec<usize>> {
    let slots = exists_slots(ast.where_clause.as_ref());
    for (index, exists) in slots.iter().enumerate() {
        if exists.op != ExistsOp::Exists {
            continue;
        }
        if let Some(mut deeper) = locate_marker(&exists.subquery) {
            let mut path = alloc::vec![index];
            path.append(&mut deeper);
            return Some(path);
        }
        if exists.flip {
            return Some(alloc::vec![index]);
        }
    }
    None
}

/// The AND-reachable exists conditions of a WHERE tree, in order.
fn exists_slots(condition: Option<&Condition>) -> Vec<&ExistsCondition> {
    let mut slots = Vec::new();
    if let Some(condition) = condition {
        collect_slots(condition, &mut slots);
    }
    slots
}

fn collect_slots<'a>(condition: &'a Condition, slots: &mut Vec<&'a ExistsCondition>) {
    match condition {
        Condition::Simple(_) | Condition::Or(_) => {}
        Condition::And(children) => {
            for child in children {
                collect_slots(child, slots);
            }
        }
        Condition::Exists(exists) => slots.push(exists),
    }
}

/// Removes the index-th AND-reachable exists condition from the tree,
/// flattening nested ANDs along the way.
fn take_exists(ast: &mut QueryAst, index: usize) -> ExistsCondition {
    let mut flat = Vec::new();
    if let Some(condition) = ast.where_clause.take() {
        flatten(condition, &mut flat);
    }
    let mut seen = 0usize;
    let mut taken = None;
    let mut rest = Vec::new();
    for condition in flat {
        match condition {
            Condition::Exists(exists) if taken.is_none() => {
                if seen == index {
                    taken = Some(exists);
                } else {
                    seen += 1;
                    rest.push(Condition::Exists(exists));
                }
            }
            other => rest.push(other),
        }
    }
    ast.where_clause = match rest.len() {
        0 => None,
        1 => Some(rest.into_iter().next().unwrap()),
        _ => Some(Condition::And(rest)),
    };
    taken.expect("marker path points at a missing exists condition")
}

fn flatten(condition: Condition, out: &mut Vec<Condition>) {
    match condition {
        Condition::And(children) => {
            for child in children {
                flatten(child, out);
            }
        }
        other => out.push(other),
    }
}

fn and_condition(ast: &mut QueryAst, condition: Condition) {
    ast.where_clause = Some(match ast.where_clause.take() {
        None => condition,
        Some(Condition::And(mut children)) => {
            children.push(condition);
            Condition::And(children)
        }
        Some(other) => Condition::And(alloc::vec![other, condition]),
    });
}

/// Rebuilds the AST with the marked condition's subquery as the new
/// root. Each chain node becomes a nested EXISTS of its former child,
/// correlated by the inverse of the original correlation.
fn rebuild(ast: QueryAst, path: &[usize]) -> FlippedQuery {
    // Walk down the chain, detaching each link.
    let mut chain: Vec<(QueryAst, Correlation)> = Vec::new();
    let mut current = ast;
    for &index in path {
        let link = take_exists(&mut current, index);
        chain.push((current, link.correlation));
        current = *link.subquery;
    }

    let (mut nested, mut correlation) = {
        let (mut root, correlation) = chain.remove(0);
        // Presentation attributes are meaningless at subquery position;
        // strip them onto the tag for the caller to reapply.
        let attrs = RootAttrs {
            order_by: root.order_by.take(),
            limit: root.limit.take(),
            start: root.start.take(),
        };
        root.was_root = Some(attrs);
        (root, correlation)
    };
    let root_table = nested.table.clone();
    let root_attrs = nested.was_root.clone().expect("tag just attached");

    let mut path_to_root = alloc::vec![String::from(nested.alias_or_table())];
    for (mut node, next_correlation) in chain {
        path_to_root.push(String::from(node.alias_or_table()));
        and_condition(
            &mut node,
            Condition::Exists(ExistsCondition {
                op: ExistsOp::Exists,
                correlation: correlation.inverted(),
                subquery: Box::new(nested),
                flip: false,
            }),
        );
        nested = node;
        correlation = next_correlation;
    }

    and_condition(
        &mut current,
        Condition::Exists(ExistsCondition {
            op: ExistsOp::Exists,
            correlation: correlation.inverted(),
            subquery: Box::new(nested),
            flip: false,
        }),
    );

    // Collected bottom-up relative to the new root; the path reads from
    // the new root's relationship down to the tagged node.
    path_to_root.reverse();

    FlippedQuery {
        ast: current,
        path_to_root,
        root_table,
        root_attrs,
    }
}
