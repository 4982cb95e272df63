//! `nodes` crate — the `ExecutableNode` trait and built-in task operators.
//!
//! Every task the engine runs is dispatched through an [`ExecutableNode`]
//! trait object looked up by operator name.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod records;
pub mod traits;

pub use error::NodeError;
pub use records::Record;
pub use traits::{ExecutableNode, ExecutionContext};
