//! Rows, their sources and their sinks.

pub mod convert;

mod column;
pub use column::*;

mod row;
pub use row::*;

mod key_column;
pub use key_column::*;

mod input;
pub use input::*;

mod output;
pub use output::*;

mod iterator;
pub use iterator::*;

mod frame;
pub use frame::*;

mod objects;
pub use objects::*;

mod source;
pub use source::*;

mod memory;
pub use memory::*;

mod retry;
pub use retry::*;
