//! Core traits for the code interpreter.
//!
//! Traits are organized by the seam they cover:
//! - `skills`: the agent-facing tool surface (Tool)
//! - `llm`: the upstream model service (LlmClient)

pub mod llm;
pub mod skills;

pub use llm::*;
pub use skills::*;
