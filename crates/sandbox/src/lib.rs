#![deny(unused)]
//! Code execution engine.
//!
//! Runs model-generated source code in one of two isolation backends chosen
//! once at startup, and always hands back a readable text result.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  Agent layer (CodeExecutionTool)           │
//! │    ↓ execute(code, language)               │
//! ├────────────────────────────────────────────┤
//! │  ExecutionDispatcher                       │
//! │    language check, error/panic flattening  │
//! ├─────────────────────┬──────────────────────┤
//! │  ProcessBackend     │  VmSandboxBackend    │
//! │  python -c, no env  │  workload file       │
//! │  timeout + kill     │  fd 1 capture        │
//! │                     │    ↓                 │
//! │                     │  SandboxRuntime      │
//! │                     │  (lazy, built once)  │
//! └─────────────────────┴──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use code_interpreter_sandbox::{CodeExecutionTool, ExecutionDispatcher};
//!
//! let dispatcher = Arc::new(ExecutionDispatcher::from_config(&config.execution)?);
//! let tool = CodeExecutionTool::new(dispatcher.clone());
//!
//! let text = dispatcher.execute("print(2 + 2)", Some("python")).await;
//! ```

pub mod capture;
pub mod dispatcher;
pub mod output;
pub mod process;
pub mod runtime;
pub mod tools;
pub mod vm;

pub use capture::StdoutCapture;
pub use dispatcher::{Backend, ExecutionDispatcher, VmSandboxState};
pub use output::{truncate_output, MAX_OUTPUT_BYTES, TRUNCATION_MARKER};
pub use process::{ProcessBackend, KILL_GRACE_PERIOD, PIPE_DRAIN_PERIOD, PROCESS_LANGUAGES};
pub use runtime::{
    CommandSandboxFactory, CommandSandboxRuntime, MockRun, MockSandboxFactory, MockSandboxRuntime,
    SandboxId, SandboxOutcome, SandboxRuntime, SandboxRuntimeFactory, SandboxSettings,
    SeenWorkload, RUNTIME_CACHE_DIR,
};
pub use tools::{ClearSandboxCacheTool, CodeExecutionTool};
pub use vm::{map_outcome, VmSandboxBackend, CAPTURE_DIR, VM_LANGUAGES, WORKLOAD_DIR};
