//! Post-reorder recovery operators.
//!
//! After a flip, the physical pipeline no longer emits original-root
//! rows at the top: they sit at the end of a fixed relationship path.
//! `ExtractMatchingKeys` recovers them (deduplicated by primary key);
//! `SortToRootOrder` restores the original root's declared order.

mod extract;
mod sort_root;

pub use extract::ExtractMatchingKeys;
pub use sort_root::SortToRootOrder;
