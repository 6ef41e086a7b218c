//! Lakestack — resource graph compiler for lakehouse stacks.
//!
//! Expands a declarative stack into a flat resource graph, resolves
//! dependencies between resources and between pipeline nodes, and emits
//! Pulumi YAML or Terraform JSON from the same graph.

pub mod backends;
pub mod cli;
pub mod core;
pub mod resources;
