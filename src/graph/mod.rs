//! Resource dependency graph.
//!
//! Declarations are resolved statically into an explicit DAG:
//! - `${kind.name.output}` references inside attribute strings
//! - explicit `depends_on` addresses
//!
//! Any reference to an undeclared resource, or any cycle, rejects the whole
//! declaration set before planning.

mod builder;
mod reference;

pub use builder::{Edge, ResourceGraph, ResourceNode};
pub use reference::{Reference, ReferenceError, collect_references, interpolate};
