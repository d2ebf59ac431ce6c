//! In-memory indexes over materialized rows.

mod order;
pub use order::*;
