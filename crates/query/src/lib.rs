//! Rivulet Query - declarative queries compiled to incremental pipelines.
//!
//! This crate provides the layers between a declarative query and a
//! running operator graph:
//!
//! - `ast`: the query AST (tables, conditions, correlations, ordering,
//!   pagination, related subqueries) and alias uniquification
//! - `builder`: the AST -> pipeline compiler with its `BuilderDelegate`
//!   seam for source lookup, storage creation and instrumentation
//! - `optimizer`: the flip-exists transform, reordering an EXISTS check
//!   to enumerate the cheaper side first
//! - `recover`: the post-reorder operators (`ExtractMatchingKeys`,
//!   `SortToRootOrder`) that restore original-root rows and order
//! - `compile`: the end-to-end entry point tying the above together

#![no_std]

extern crate alloc;

#[macro_use]
mod debug;

pub mod ast;
pub mod builder;
pub mod compile;
pub mod optimizer;
pub mod recover;

pub use ast::{
    uniquify_aliases, Condition, Correlation, ExistsCondition, ExistsOp, QueryAst, RelatedQuery,
    RootAttrs, SimpleCondition,
};
pub use builder::{BuilderDelegate, CatalogDelegate, PipelineBuilder};
pub use compile::compile;
pub use optimizer::{flip_exists, FlipOutcome, FlippedQuery};
pub use recover::{ExtractMatchingKeys, SortToRootOrder};
