//! Execution threads and the per-run context.

mod context;
pub use context::*;

mod scope;
pub use scope::{Scope, ScopeGuard, ScopeStack};

mod statistic;
pub use statistic::*;

mod thread;
pub use thread::*;
