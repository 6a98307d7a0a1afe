//! Core type definitions for the code interpreter.
//!
//! Execution contracts shared by every backend live in `execution`; the
//! agent-facing tool surface types live in `tool`.

pub mod execution;
pub mod tool;

pub use execution::*;
pub use tool::*;
