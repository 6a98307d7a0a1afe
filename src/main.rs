#![deny(unused)]
//! code-interpreter - run one snippet through the configured backend.
//!
//! Configuration comes from `config/*` files and `INTERPRETER__*` variables;
//! command-line flags override both. The execution result goes to stdout,
//! logs go to stderr.

mod telemetry;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use code_interpreter_core::config::{ExecutionConfig, InterpreterConfig};
use code_interpreter_core::{BackendKind, Language};
use code_interpreter_sandbox::{CommandSandboxFactory, ExecutionDispatcher, SandboxRuntimeFactory};

#[derive(Parser, Debug)]
#[clap(
    name = "code-interpreter",
    version,
    about = "Execute source code in an isolated backend and print its output"
)]
struct Cli {
    #[clap(long, short, help = "Language of the code (python, javascript, c, cpp, py, js)")]
    lang: Option<Language>,

    #[clap(long, short, conflicts_with = "file", help = "Source code to execute")]
    code: Option<String>,

    #[clap(long, short, help = "Read the source code from a file")]
    file: Option<PathBuf>,

    #[clap(long, short, env = "INTERPRETER_BACKEND", help = "Backend: process or vm-sandbox")]
    backend: Option<BackendKind>,

    #[clap(long, short, help = "Timeout in seconds for the process backend")]
    timeout: Option<u64>,

    #[clap(long, help = "Absolute path of the sandbox runtime executable")]
    runtime: Option<PathBuf>,

    #[clap(short, long, action = clap::ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut config = InterpreterConfig::load()?;
    telemetry::configure_tracing(&config.logging, cli.verbose)?;

    tracing::info!("Starting code-interpreter v{}", env!("CARGO_PKG_VERSION"));

    apply_overrides(&mut config.execution, &cli);
    fall_back_when_unavailable(&mut config.execution);

    let (code, inferred) = match (&cli.code, &cli.file) {
        (Some(code), _) => (code.clone(), None),
        (None, Some(path)) => {
            let code = tokio::fs::read_to_string(path).await?;
            let inferred = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(|ext| ext.parse::<Language>().ok());
            (code, inferred)
        }
        (None, None) => anyhow::bail!("either --code or --file is required"),
    };
    let language = cli.lang.or(inferred);

    let dispatcher = ExecutionDispatcher::from_config(&config.execution)?;
    let language = language.map(|l| l.as_str());
    let result = dispatcher.execute_detailed(&code, language).await;

    let succeeded = result.succeeded;
    println!("{}", result.into_text());
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_overrides(execution: &mut ExecutionConfig, cli: &Cli) {
    if let Some(backend) = cli.backend {
        execution.backend = backend;
    }
    if let Some(timeout) = cli.timeout {
        execution.timeout_secs = timeout;
    }
    if let Some(runtime) = &cli.runtime {
        execution.vm_sandbox.runtime_path = Some(runtime.clone());
    }
}

/// Switch to the process backend when the sandbox runtime cannot be used here.
fn fall_back_when_unavailable(execution: &mut ExecutionConfig) {
    if execution.backend != BackendKind::VmSandbox {
        return;
    }
    let available = execution
        .vm_sandbox
        .runtime_path
        .as_ref()
        .map(|path| CommandSandboxFactory::new(path, Vec::new()).is_available())
        .unwrap_or(false);
    if !available {
        tracing::warn!(
            runtime = ?execution.vm_sandbox.runtime_path,
            "Sandbox runtime not available, falling back to the process backend"
        );
        execution.backend = BackendKind::Process;
    }
}
