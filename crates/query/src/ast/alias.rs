//! Global alias uniquification.
//!
//! Every query node -- the root, each correlated subquery and each
//! related subquery -- is assigned a unique alias before building, so
//! the same table appearing twice never collides in storage keys or
//! relationship names. Aliases already present are preserved when
//! unique; collisions get a numeric suffix. The pass runs once, over
//! the whole tree, in pre-order (WHERE subqueries before related ones),
//! which makes the assignment deterministic.

use crate::ast::{Condition, QueryAst};
use hashbrown::HashSet;
use alloc::format;
use alloc::string::String;

/// Assigns a unique alias to every query node in the tree.
pub fn uniquify_aliases(mut ast: QueryAst) -> QueryAst {
    let mut used = HashSet::new();
    assign(&mut ast, &mut used);
    ast
}

fn assign(ast: &mut QueryAst, used: &mut HashSet<String>) {
    let base = ast
        .alias
        .clone()
        .unwrap_or_else(|| ast.table.clone());
    let mut candidate = base.clone();
    let mut suffix = 1usize;
    while used.contains(&candidate) {
        suffix += 1;
        candidate = format!("{}_{}", base, suffix);
    }
    used.insert(candidate.clone());
    ast.alias = Some(candidate);

    if let Some(condition) = &mut ast.where_clause {
        assign_condition(condition, used);
    }
    for related in &mut ast.related {
        assign(&mut related.subquery, used);
    }
}

fn assign_condition(condition: &mut Condition, used: &mut HashSet<String>) {
    match condition {
        Condition::Simple(_) => {}
        Condition::And(children) | Condition::Or(children) => {
            for child in children {
                assign_condition(child, used);
            }
        }
        Condition::Exists(exists) => assign(&mut exists.subquery, used),
    }
}
