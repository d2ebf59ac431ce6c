//! The syntax tree consumed by the compiler.

mod node;
pub use node::*;

mod builder;
pub use builder::*;
