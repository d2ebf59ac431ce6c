//! The execution core of an embeddable query engine.
//!
//! Programs (syntax trees built with [`ast::ProgramBuilder`]) run on an
//! [`ExecutionThread`], which compiles statements into reusable units and
//! pulls rows lazily from the registered sources.

pub mod error;

pub mod config;
pub mod types;

pub mod ast;
pub mod data;
pub mod index;

pub mod command;
pub mod compile;
pub mod functions;
pub mod select;

pub mod exec;

pub mod util;

pub use config::ExecutionOptions;
pub use error::{Error, ExecResult};
pub use exec::{ExecCtx, ExecutionThread};
pub use types::{DataType, Value};
