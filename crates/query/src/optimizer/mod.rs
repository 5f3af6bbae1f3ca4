//! AST-to-AST optimization passes.

mod flip_exists;

pub use flip_exists::{flip_exists, FlipOutcome, FlippedQuery};
