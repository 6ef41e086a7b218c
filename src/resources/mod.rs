//! Resource declarations, one module per family.
//!
//! Every top-level declaration implements `Expand`: it yields its primary
//! resource, then auxiliaries bound to it, then nested declarations.

pub mod access;
pub mod catalog;
pub mod compute;
pub mod identity;
pub mod job;
pub mod orchestrator;
pub mod workspace;
