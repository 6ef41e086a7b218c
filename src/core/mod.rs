//! Core compiler logic — model, expansion, resolution, pipeline graphs.

pub mod compiler;
pub mod error;
pub mod expander;
pub mod hasher;
pub mod parser;
pub mod pipeline;
pub mod reference;
pub mod resolver;
pub mod types;
