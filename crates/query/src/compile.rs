//! End-to-end query compilation.
//!
//! `compile` runs the full sequence: alias uniquification, the
//! delegate's AST mapping hook, one pass of the flip-exists transform,
//! and pipeline construction. When a flip applied, the recovery stack
//! (`ExtractMatchingKeys` -> `SortToRootOrder` -> Skip -> Take) is
//! placed on top so the pipeline's output is indistinguishable from the
//! unflipped query's.

use crate::ast::{uniquify_aliases, QueryAst};
use crate::builder::{BuilderDelegate, PipelineBuilder};
use crate::optimizer::{flip_exists, FlipOutcome, FlippedQuery};
use crate::recover::{ExtractMatchingKeys, SortToRootOrder};
use alloc::format;
use rivulet_core::{Error, OrderSpec, Result};
use rivulet_ivm::{OperatorRef, Skip, Source, Take};

/// Compiles a query into a runnable pipeline.
pub fn compile(ast: QueryAst, delegate: &dyn BuilderDelegate) -> Result<OperatorRef> {
    let ast = uniquify_aliases(ast);
    let ast = delegate.map_ast(ast);
    match flip_exists(ast) {
        FlipOutcome::Unchanged(ast) => PipelineBuilder::new(delegate).build(&ast),
        FlipOutcome::Flipped(flipped) => compile_flipped(flipped, delegate),
    }
}

fn compile_flipped(flipped: FlippedQuery, delegate: &dyn BuilderDelegate) -> Result<OperatorRef> {
    let FlippedQuery {
        ast,
        path_to_root,
        root_table,
        root_attrs,
    } = flipped;

    let root_source = delegate
        .source(&root_table)
        .ok_or_else(|| Error::source_not_found(root_table.as_str()))?;
    let root_schema = root_source.schema();

    // The original root's ordering invariant still applies even though
    // the builder no longer sees it at the root position.
    let order = match &root_attrs.order_by {
        Some(order) => {
            for key in root_schema.primary_key() {
                if !order.contains(key) {
                    return Err(Error::order_missing_key(
                        root_table.as_str(),
                        key.as_str(),
                    ));
                }
            }
            order.clone()
        }
        None => OrderSpec::by_key(root_schema.primary_key()),
    };

    let root_alias = path_to_root
        .last()
        .expect("flip produces a non-empty path")
        .clone();

    let input = PipelineBuilder::new(delegate).build(&ast)?;

    let extract_storage = delegate.create_storage(&format!("extract({})", root_alias));
    let mut input: OperatorRef =
        ExtractMatchingKeys::new(input, extract_storage, path_to_root, root_schema);
    input = SortToRootOrder::new(input, order);
    if let Some(start) = root_attrs.start {
        input = Skip::new(input, start);
    }
    if let Some(limit) = root_attrs.limit {
        let take_storage = delegate.create_storage(&format!("take({})", root_alias));
        input = Take::new(input, take_storage, limit, None);
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Condition, Correlation};
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;
    use crate::builder::CatalogDelegate;
    use rivulet_core::schema::SchemaBuilder;
    use rivulet_core::{DataType, Row, Value};
    use rivulet_ivm::{snapshot_rows, MemorySource};

    fn sources() -> (Rc<MemorySource>, Rc<MemorySource>, CatalogDelegate) {
        let users = Rc::new(MemorySource::new(
            SchemaBuilder::new("users")
                .column("id", DataType::Int)
                .primary_key(&["id"])
                .build()
                .unwrap(),
        ));
        let orders = Rc::new(MemorySource::new(
            SchemaBuilder::new("orders")
                .column("id", DataType::Int)
                .column("user_id", DataType::Int)
                .primary_key(&["id"])
                .build()
                .unwrap(),
        ));
        let catalog = CatalogDelegate::new();
        catalog.register("users", users.clone());
        catalog.register("orders", orders.clone());
        (users, orders, catalog)
    }

    fn seed(users: &MemorySource, orders: &MemorySource) {
        for id in 1..=5 {
            users.add(Row::from_pairs([("id", Value::Int(id))]));
        }
        for (id, uid) in [(1, 1), (2, 1), (3, 2), (4, 3), (5, 3), (6, 5)] {
            orders.add(Row::from_pairs([
                ("id", Value::Int(id)),
                ("user_id", Value::Int(uid)),
            ]));
        }
    }

    fn ids(rows: Vec<Row>) -> Vec<i64> {
        rows.iter()
            .map(|r| r.get("id").unwrap().as_int().unwrap())
            .collect()
    }

    fn exists_query(flip: bool) -> QueryAst {
        let exists = Condition::exists(
            Correlation::new(["id"], ["user_id"]),
            QueryAst::table("orders"),
        );
        let exists = if flip { exists.flipped() } else { exists };
        QueryAst::table("users")
            .with_order_by(OrderSpec::asc("id"))
            .with_where(exists)
    }

    #[test]
    fn test_compile_unflipped() {
        let (users, orders, catalog) = sources();
        seed(&users, &orders);
        let pipeline = compile(exists_query(false), &catalog).unwrap();
        assert_eq!(ids(snapshot_rows(&pipeline)), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_compile_flipped_matches_unflipped() {
        let (users, orders, catalog) = sources();
        seed(&users, &orders);
        let pipeline = compile(exists_query(true), &catalog).unwrap();
        assert_eq!(ids(snapshot_rows(&pipeline)), vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_compile_flipped_respects_limit_and_start() {
        let (users, orders, catalog) = sources();
        seed(&users, &orders);
        let ast = exists_query(true).with_limit(2);
        let pipeline = compile(ast, &catalog).unwrap();
        assert_eq!(ids(snapshot_rows(&pipeline)), vec![1, 2]);
    }

    #[test]
    fn test_flipped_order_must_include_primary_key() {
        let (_users, _orders, catalog) = sources();
        let ast = exists_query(true).with_order_by(OrderSpec::asc("name"));
        let err = compile(ast, &catalog).unwrap_err();
        assert!(matches!(err, Error::OrderMissingKey { .. }));
    }
}
