//! Interpreter configuration.
//!
//! Values are resolved once, at tool construction. Layering follows the usual
//! order: built-in defaults, then `config/default`, `config/{INTERPRETER_ENV}`
//! and `config/local` files (all optional), then `INTERPRETER__*` environment
//! variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{BackendKind, Language};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct InterpreterConfig {
    pub execution: ExecutionConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Which backend runs submitted code.
    pub backend: BackendKind,
    /// Wall-clock budget for the process backend.
    pub timeout_secs: u64,
    /// Absolute path of the interpreter used by the process backend.
    pub python_path: PathBuf,
    pub vm_sandbox: VmSandboxConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Process,
            timeout_secs: 30,
            python_path: PathBuf::from("/usr/bin/python3"),
            vm_sandbox: VmSandboxConfig::default(),
        }
    }
}

impl ExecutionConfig {
    /// Reject values no backend could honour.
    pub fn validate(&self) -> crate::Result<()> {
        if self.timeout_secs == 0 {
            return Err(crate::Error::invalid_request(
                "execution.timeout_secs must be a positive number of seconds",
            ));
        }
        if !self.python_path.is_absolute() {
            return Err(crate::Error::invalid_request(format!(
                "execution.python_path must be absolute, got '{}'",
                self.python_path.display()
            )));
        }
        if let Some(runtime) = &self.vm_sandbox.runtime_path {
            if !runtime.is_absolute() {
                return Err(crate::Error::invalid_request(format!(
                    "execution.vm_sandbox.runtime_path must be absolute, got '{}'",
                    runtime.display()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct VmSandboxConfig {
    /// Default language when a call does not name one.
    pub language: Language,
    /// Directory the sandbox runtime writes its logs to.
    pub log_dir: PathBuf,
    /// Scratch directory for workload and capture files.
    pub scratch_dir: PathBuf,
    /// Executable of the external sandbox runtime.
    pub runtime_path: Option<PathBuf>,
    /// Extra arguments passed before the workload path.
    pub runtime_args: Vec<String>,
}

impl Default for VmSandboxConfig {
    fn default() -> Self {
        Self {
            language: Language::JavaScript,
            log_dir: std::env::temp_dir(),
            scratch_dir: std::env::temp_dir(),
            runtime_path: None,
            runtime_args: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub min_wait_secs: f64,
    pub max_wait_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            min_wait_secs: 1.0,
            max_wait_secs: 60.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable logs.
    pub json_logs: bool,
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
}

impl InterpreterConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("INTERPRETER_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(Config::try_from(&InterpreterConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map INTERPRETER__EXECUTION__TIMEOUT_SECS=10 to execution.timeout_secs
            .add_source(
                Environment::with_prefix("INTERPRETER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
