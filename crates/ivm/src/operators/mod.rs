//! Pipeline operators.

pub mod exists;
pub mod fan;
pub mod filter;
pub mod join;
pub mod skip;
pub mod take;
