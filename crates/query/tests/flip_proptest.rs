//! Property-based tests for the flip transform and the windowing
//! operators.
//!
//! These verify the equivalences the engine is built around: a flipped
//! pipeline is observably identical to the unflipped one over random
//! data, Take windows always equal the sorted prefix, and
//! SortToRootOrder slices exactly like an in-memory sort.

use proptest::prelude::*;
use rivulet_core::schema::SchemaBuilder;
use rivulet_core::{DataType, OrderSpec, Row, Value};
use rivulet_ivm::{
    snapshot_rows, FetchRequest, MemorySource, MemoryStorage, Operator, OperatorRef, Source, Start,
    Take,
};
use rivulet_query::{compile, CatalogDelegate, Condition, Correlation, QueryAst, SortToRootOrder};
use std::collections::HashSet;
use std::rc::Rc;

fn user(id: i64) -> Row {
    Row::from_pairs([("id", Value::Int(id))])
}

fn order(id: i64, user_id: i64) -> Row {
    Row::from_pairs([("id", Value::Int(id)), ("user_id", Value::Int(user_id))])
}

fn catalog(users: &Rc<MemorySource>, orders: &Rc<MemorySource>) -> CatalogDelegate {
    let catalog = CatalogDelegate::new();
    catalog.register("users", users.clone());
    catalog.register("orders", orders.clone());
    catalog
}

fn users_source() -> Rc<MemorySource> {
    Rc::new(MemorySource::new(
        SchemaBuilder::new("users")
            .column("id", DataType::Int)
            .primary_key(&["id"])
            .build()
            .unwrap(),
    ))
}

fn orders_source() -> Rc<MemorySource> {
    Rc::new(MemorySource::new(
        SchemaBuilder::new("orders")
            .column("id", DataType::Int)
            .column("user_id", DataType::Int)
            .primary_key(&["id"])
            .build()
            .unwrap(),
    ))
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

fn ids(rows: Vec<Row>) -> Vec<i64> {
    rows.iter()
        .map(|r| r.get("id").unwrap().as_int().unwrap())
        .collect()
}

proptest! {
    /// Flipped and unflipped pipelines agree on arbitrary datasets,
    /// both after hydration and after incremental removals.
    #[test]
    fn flipped_matches_unflipped(
        user_ids in prop::collection::hash_set(0i64..25, 0..20),
        order_refs in prop::collection::vec((0i64..40, 0i64..25), 0..40),
    ) {
        let users = users_source();
        let orders = orders_source();
        for &id in &user_ids {
            users.add(user(id));
        }
        let mut seen = HashSet::new();
        for &(oid, uid) in &order_refs {
            if seen.insert(oid) {
                orders.add(order(oid, uid));
            }
        }

        let catalog = catalog(&users, &orders);
        let unflipped = compile(exists_query(false), &catalog).unwrap();
        let flipped = compile(exists_query(true), &catalog).unwrap();

        prop_assert_eq!(ids(snapshot_rows(&unflipped)), ids(snapshot_rows(&flipped)));
    }

    /// After hydration, random order insertions and deletions keep the
    /// two pipelines in lockstep.
    #[test]
    fn flipped_matches_unflipped_under_pushes(
        user_ids in prop::collection::hash_set(0i64..15, 1..10),
        initial in prop::collection::vec((0i64..30, 0i64..15), 0..20),
        ops in prop::collection::vec((any::<bool>(), 0i64..30, 0i64..15), 0..20),
    ) {
        let users = users_source();
        let orders = orders_source();
        for &id in &user_ids {
            users.add(user(id));
        }
        let mut live: std::collections::HashMap<i64, i64> = std::collections::HashMap::new();
        for &(oid, uid) in &initial {
            if !live.contains_key(&oid) {
                live.insert(oid, uid);
                orders.add(order(oid, uid));
            }
        }

        let catalog = catalog(&users, &orders);
        let unflipped = compile(exists_query(false), &catalog).unwrap();
        let flipped = compile(exists_query(true), &catalog).unwrap();
        let _ = snapshot_rows(&unflipped);
        let _ = snapshot_rows(&flipped);

        for &(add, oid, uid) in &ops {
            if add {
                if !live.contains_key(&oid) {
                    live.insert(oid, uid);
                    orders.add(order(oid, uid));
                }
            } else if let Some(uid) = live.remove(&oid) {
                orders.remove(order(oid, uid));
            }
        }

        prop_assert_eq!(ids(snapshot_rows(&unflipped)), ids(snapshot_rows(&flipped)));
    }

    /// A take window is always the sorted prefix of whatever rows
    /// remain upstream, regardless of push order.
    #[test]
    fn take_window_is_sorted_prefix(
        initial in prop::collection::hash_set(0i64..50, 0..25),
        ops in prop::collection::vec((any::<bool>(), 0i64..50), 0..25),
        limit in 1usize..6,
    ) {
        let source = Rc::new(MemorySource::new(
            SchemaBuilder::new("items")
                .column("id", DataType::Int)
                .primary_key(&["id"])
                .build()
                .unwrap(),
        ));
        let mut live: HashSet<i64> = HashSet::new();
        for &id in &initial {
            live.insert(id);
            source.add(user(id));
        }

        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        let take: OperatorRef = Take::new(conn.input, Rc::new(MemoryStorage::new()), limit, None);
        let _ = snapshot_rows(&take);

        for &(add, id) in &ops {
            if add {
                if live.insert(id) {
                    source.add(user(id));
                }
            } else if live.remove(&id) {
                source.remove(user(id));
            }
        }

        let mut expected: Vec<i64> = live.iter().copied().collect();
        expected.sort_unstable();
        expected.truncate(limit);
        prop_assert_eq!(ids(snapshot_rows(&take)), expected);
    }

    /// Sorting then slicing with start/reverse equals sorting the full
    /// set in memory and slicing it.
    #[test]
    fn sort_to_root_order_round_trip(
        rows in prop::collection::hash_set((0i64..40, 0i64..10), 1..25),
        start_index in 0usize..30,
        reverse in any::<bool>(),
        exclusive in any::<bool>(),
    ) {
        let source = Rc::new(MemorySource::new(
            SchemaBuilder::new("items")
                .column("id", DataType::Int)
                .column("rank", DataType::Int)
                .primary_key(&["id"])
                .build()
                .unwrap(),
        ));
        let mut by_id = HashSet::new();
        let mut dataset: Vec<(i64, i64)> = Vec::new();
        for &(id, rank) in &rows {
            if by_id.insert(id) {
                dataset.push((id, rank));
                source.add(Row::from_pairs([
                    ("id", Value::Int(id)),
                    ("rank", Value::Int(rank)),
                ]));
            }
        }

        let order = OrderSpec::asc("rank").then_asc("id");
        let conn = source.connect(&OrderSpec::asc("id"), &[], &[]);
        let sorter: OperatorRef = SortToRootOrder::new(conn.input, order);

        // Expected: sort in memory, orient, slice at the start row.
        dataset.sort_by_key(|&(id, rank)| (rank, id));
        if reverse {
            dataset.reverse();
        }
        let start_index = start_index.min(dataset.len() - 1);
        let (start_id, start_rank) = dataset[start_index];
        let expected: Vec<i64> = dataset[start_index + usize::from(exclusive)..]
            .iter()
            .map(|&(id, _)| id)
            .collect();

        let start_row = Row::from_pairs([
            ("id", Value::Int(start_id)),
            ("rank", Value::Int(start_rank)),
        ]);
        let start = if exclusive {
            Start::after(start_row)
        } else {
            Start::at(start_row)
        };
        let mut req = FetchRequest::new().with_start(start);
        req.reverse = reverse;

        let got: Vec<i64> = sorter
            .fetch(&req)
            .map(|n| n.row().get("id").unwrap().as_int().unwrap())
            .collect();
        prop_assert_eq!(got, expected);
    }
}
