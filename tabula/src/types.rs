//! The dynamic value model.

pub mod blob;
pub mod cast;
pub mod interval;
pub mod ops;

mod data_type;
pub use data_type::*;

mod object;
pub use object::*;

mod value;
pub use value::*;

pub use ops::Operation;
