#![deny(unused)]
//! Core types, traits, configuration and error definitions for the code
//! interpreter.
//!
//! This crate provides the building blocks shared by the execution backends
//! (`code_interpreter_sandbox`) and the model gateway
//! (`code_interpreter_model_gateway`).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
