//! Dependency analysis
//!
//! - [`dependency`]: object graph, complexity classification, cycle-tolerant ordering
//! - [`circular`]: mutually-referencing table pairs whose FKs are deferred
//! - [`blueprint`]: per-table context documents

pub mod blueprint;
pub mod circular;
pub mod dependency;

pub use blueprint::{BlueprintSet, TableBlueprint};
pub use circular::{CircularFkSet, TablePair};
pub use dependency::{
    topological_sort, validate_references, Complexity, DependencyEdge, DependencyGraph,
    DependencyNode, EdgeType, NodeType,
};
