//! Execution dispatcher.
//!
//! The dispatcher is the boundary the agent layer talks to. It owns the
//! backend chosen at construction and turns every outcome, including errors
//! and panics raised inside a backend, into a non-empty human-readable
//! string.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OnceCell;

use code_interpreter_core::config::ExecutionConfig;
use code_interpreter_core::{BackendKind, Error, ExecutionResult, Language, Result};

use crate::process::{ProcessBackend, PROCESS_LANGUAGES};
use crate::runtime::{CommandSandboxFactory, SandboxRuntime, SandboxRuntimeFactory, SandboxSettings};
use crate::vm::{VmSandboxBackend, VM_LANGUAGES};

/// Reported when a backend panics.
const UNEXPECTED_FAILURE: &str = "Error: unexpected failure during code execution";

/// The backend selected at construction.
pub enum Backend {
    Process(ProcessBackend),
    VmSandbox(VmSandboxState),
}

/// VM-sandbox backend plus the lazily constructed runtime handle it uses.
pub struct VmSandboxState {
    backend: VmSandboxBackend,
    language: Language,
    settings: SandboxSettings,
    factory: Arc<dyn SandboxRuntimeFactory>,
    handle: OnceCell<Arc<dyn SandboxRuntime>>,
}

impl VmSandboxState {
    /// Get the runtime handle, constructing it on first use.
    ///
    /// Concurrent first callers share one construction. A failed construction
    /// is not cached, so the next call tries again.
    async fn handle(&self) -> Result<Arc<dyn SandboxRuntime>> {
        self.handle
            .get_or_try_init(|| async {
                tracing::info!(
                    log_dir = %self.settings.log_directory.display(),
                    tmp_dir = %self.settings.tmp_directory.display(),
                    "Creating sandbox runtime"
                );
                self.factory.create(&self.settings).await.map_err(|e| {
                    tracing::error!(error = %e, "Sandbox runtime construction failed");
                    e
                })
            })
            .await
            .cloned()
    }
}

/// Selects a backend once and normalizes its results.
pub struct ExecutionDispatcher {
    backend: Backend,
}

impl ExecutionDispatcher {
    /// Dispatcher running code as local subprocesses.
    pub fn process(backend: ProcessBackend) -> Self {
        Self {
            backend: Backend::Process(backend),
        }
    }

    /// Dispatcher delegating to a VM sandbox runtime built by `factory`.
    pub fn vm_sandbox(
        backend: VmSandboxBackend,
        settings: SandboxSettings,
        language: Language,
        factory: Arc<dyn SandboxRuntimeFactory>,
    ) -> Self {
        Self {
            backend: Backend::VmSandbox(VmSandboxState {
                backend,
                language,
                settings,
                factory,
                handle: OnceCell::new(),
            }),
        }
    }

    /// Build from configuration, using a [`CommandSandboxFactory`] for the
    /// VM-sandbox backend.
    pub fn from_config(config: &ExecutionConfig) -> Result<Self> {
        match (config.backend, &config.vm_sandbox.runtime_path) {
            (BackendKind::VmSandbox, Some(path)) => {
                let factory = CommandSandboxFactory::new(path, config.vm_sandbox.runtime_args.clone());
                Self::from_config_with_factory(config, Arc::new(factory))
            }
            (BackendKind::VmSandbox, None) => Err(Error::invalid_request(
                "execution.vm_sandbox.runtime_path is required for the vm-sandbox backend",
            )),
            (BackendKind::Process, _) => {
                config.validate()?;
                Ok(Self::process(ProcessBackend::from_config(config)?))
            }
        }
    }

    /// Build from configuration with an explicit sandbox runtime factory.
    pub fn from_config_with_factory(
        config: &ExecutionConfig,
        factory: Arc<dyn SandboxRuntimeFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let dispatcher = match config.backend {
            BackendKind::Process => Self::process(ProcessBackend::from_config(config)?),
            BackendKind::VmSandbox => {
                let vm = &config.vm_sandbox;
                Self::vm_sandbox(
                    VmSandboxBackend::new(&vm.scratch_dir),
                    SandboxSettings {
                        log_directory: vm.log_dir.clone(),
                        tmp_directory: vm.scratch_dir.clone(),
                    },
                    vm.language,
                    factory,
                )
            }
        };
        tracing::info!(
            backend = %dispatcher.kind(),
            language = %dispatcher.default_language(),
            "Execution dispatcher configured"
        );
        Ok(dispatcher)
    }

    pub fn kind(&self) -> BackendKind {
        match &self.backend {
            Backend::Process(_) => BackendKind::Process,
            Backend::VmSandbox(_) => BackendKind::VmSandbox,
        }
    }

    /// Language used when a call does not name one.
    pub fn default_language(&self) -> Language {
        match &self.backend {
            Backend::Process(_) => Language::Python,
            Backend::VmSandbox(state) => state.language,
        }
    }

    /// Languages accepted by the configured backend.
    pub fn supported_languages(&self) -> &'static [Language] {
        match &self.backend {
            Backend::Process(_) => PROCESS_LANGUAGES,
            Backend::VmSandbox(_) => VM_LANGUAGES,
        }
    }

    /// Run `code` and return the user-facing text. Never empty, never fails.
    pub async fn execute(&self, code: &str, language: Option<&str>) -> String {
        self.execute_detailed(code, language).await.into_text()
    }

    /// Run `code` and return the structured result. Never fails.
    pub async fn execute_detailed(&self, code: &str, language: Option<&str>) -> ExecutionResult {
        let started = Instant::now();
        let attempt = AssertUnwindSafe(self.dispatch(code, language))
            .catch_unwind()
            .await;

        let result = match attempt {
            Ok(Ok(result)) => result,
            Ok(Err(e @ Error::UnsupportedLanguage(_))) => {
                tracing::warn!(backend = %self.kind(), error = %e, "Rejected execution request");
                ExecutionResult::failure(format!("Error: {}", e))
            }
            Ok(Err(e)) => {
                tracing::error!(backend = %self.kind(), error = ?e, "Code execution failed");
                ExecutionResult::failure(format!("Error: {}", e))
            }
            Err(_) => {
                tracing::error!(backend = %self.kind(), "Backend panicked during code execution");
                ExecutionResult::failure(UNEXPECTED_FAILURE)
            }
        };

        tracing::info!(
            backend = %self.kind(),
            succeeded = result.succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Code execution finished"
        );
        result
    }

    async fn dispatch(&self, code: &str, language: Option<&str>) -> Result<ExecutionResult> {
        let language = self.resolve_language(language)?;
        match &self.backend {
            Backend::Process(backend) => backend.run(code, language).await,
            Backend::VmSandbox(state) => {
                let sandbox = state.handle().await?;
                state.backend.run(code, language, sandbox.as_ref()).await
            }
        }
    }

    fn resolve_language(&self, requested: Option<&str>) -> Result<Language> {
        let Some(name) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(self.default_language());
        };
        name.parse::<Language>().map_err(|_| {
            Error::unsupported_language(format!(
                "Unsupported language '{}'. The {} backend supports: {}",
                name,
                self.kind(),
                self.supported_languages()
                    .iter()
                    .map(Language::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }

    /// The VM sandbox runtime handle, constructed on first use.
    pub async fn sandbox(&self) -> Result<Arc<dyn SandboxRuntime>> {
        match &self.backend {
            Backend::Process(_) => Err(Error::invalid_request(
                "The process backend does not use a sandbox runtime",
            )),
            Backend::VmSandbox(state) => state.handle().await,
        }
    }

    /// Ask the sandbox runtime to drop its cached state.
    pub async fn clear_cache(&self) -> String {
        match &self.backend {
            Backend::Process(_) => {
                "Cache clearing is only available with the vm-sandbox backend.".to_string()
            }
            Backend::VmSandbox(state) => match state.handle.get() {
                None => "No sandbox runtime has been created yet; nothing to clear.".to_string(),
                Some(handle) => match handle.clear_cache().await {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to clear sandbox cache");
                        format!("Error: failed to clear sandbox cache: {}", e)
                    }
                },
            },
        }
    }
}
