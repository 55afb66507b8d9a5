//! The shared document tree: an id-keyed arena of ordered nodes.
//!
//! Every pipeline stage mutates this structure in place and must leave it
//! consistent; [`DocumentTree::verify`] re-checks the invariants on demand.

pub mod node;
pub mod tree;

pub use node::Node;
pub use tree::DocumentTree;
