//! Sandbox integration tests.
//!
//! Tests the full pipeline: Tool → ExecutionDispatcher → VmSandboxBackend →
//! SandboxRuntime (MockSandboxRuntime or a shell-backed CommandSandboxRuntime).
//!
//! The VM path redirects the process-wide file descriptor 1. Anything else
//! writing to stdout while a capture is open would land in the capture, so
//! every scenario touching fd 1 runs sequentially inside the single test
//! function at the bottom of this file.

use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::os::fd::AsFd;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use code_interpreter_core::traits::Tool;
use code_interpreter_core::{Error, Language, Result};
use code_interpreter_sandbox::{
    CodeExecutionTool, CommandSandboxFactory, ExecutionDispatcher, MockRun, MockSandboxFactory,
    MockSandboxRuntime, SandboxOutcome, SandboxRuntime, SandboxRuntimeFactory, SandboxSettings,
    StdoutCapture, VmSandboxBackend,
};

// =============================================================================
// Helpers
// =============================================================================

fn settings(dir: &Path) -> SandboxSettings {
    SandboxSettings {
        log_directory: dir.join("logs"),
        tmp_directory: dir.to_path_buf(),
    }
}

fn vm_dispatcher(
    dir: &Path,
    language: Language,
    factory: Arc<dyn SandboxRuntimeFactory>,
) -> ExecutionDispatcher {
    ExecutionDispatcher::vm_sandbox(VmSandboxBackend::new(dir), settings(dir), language, factory)
}

fn mock_dispatcher(dir: &Path, runs: Vec<MockRun>) -> (ExecutionDispatcher, Arc<MockSandboxRuntime>) {
    let runtime = Arc::new(MockSandboxRuntime::new(runs));
    let factory = Arc::new(MockSandboxFactory::new(runtime.clone()));
    (vm_dispatcher(dir, Language::JavaScript, factory), runtime)
}

fn workload_files(backend: &VmSandboxBackend) -> Vec<String> {
    match std::fs::read_dir(backend.workload_dir()) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Device and inode currently behind fd 1.
fn stdout_identity() -> (u64, u64) {
    let fd = std::io::stdout().as_fd().try_clone_to_owned().unwrap();
    let meta = std::fs::File::from(fd).metadata().unwrap();
    (meta.dev(), meta.ino())
}

fn write_raw_stdout(text: &str) {
    let fd = std::io::stdout().as_fd().try_clone_to_owned().unwrap();
    let mut file = std::fs::File::from(fd);
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

/// Runtime whose `run` returns an error instead of an outcome.
struct ErroringRuntime;

#[async_trait]
impl SandboxRuntime for ErroringRuntime {
    async fn run(&self, _workload: &Path) -> Result<SandboxOutcome> {
        write_raw_stdout("half-written");
        Err(Error::sandbox_unavailable("runtime crashed mid-run"))
    }
}

/// Runtime that panics while output is being captured.
struct PanickingRuntime;

#[async_trait]
impl SandboxRuntime for PanickingRuntime {
    async fn run(&self, _workload: &Path) -> Result<SandboxOutcome> {
        write_raw_stdout("before panic");
        panic!("sandbox runtime bug");
    }
}

/// Factory handing out one fixed runtime.
struct FixedFactory(Arc<dyn SandboxRuntime>);

#[async_trait]
impl SandboxRuntimeFactory for FixedFactory {
    async fn create(&self, _settings: &SandboxSettings) -> Result<Arc<dyn SandboxRuntime>> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// 1. Capture guard
// =============================================================================

async fn capture_guard_roundtrip(dir: &Path) {
    let before = stdout_identity();

    let capture = StdoutCapture::begin(dir).await.unwrap();
    assert_ne!(stdout_identity(), before, "fd 1 should point at the capture file");
    write_raw_stdout("  captured text \n");
    let text = capture.finish().unwrap();

    assert_eq!(text, "captured text");
    assert_eq!(stdout_identity(), before, "fd 1 should be restored");

    // Dropping without finishing restores too.
    let capture = StdoutCapture::begin(dir).await.unwrap();
    write_raw_stdout("discarded");
    drop(capture);
    assert_eq!(stdout_identity(), before);

    let leftovers: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("stdout_"))
        .collect();
    assert!(leftovers.is_empty(), "capture files should be removed");
}

// =============================================================================
// 2. JavaScript through the mock runtime
// =============================================================================

async fn javascript_prints_result(dir: &Path) {
    let (dispatcher, runtime) = mock_dispatcher(dir, vec![MockRun::printing("4\n")]);

    let output = dispatcher
        .execute("console.log(2+2)", Some("javascript"))
        .await;
    assert_eq!(output, "4");

    let seen = runtime.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].source, "console.log(2+2)");
    let name = seen[0].path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("workload_"), "unexpected name {}", name);
    assert!(name.ends_with(".js"), "unexpected name {}", name);
    assert!(seen[0].path.starts_with(dir.join("workloads")));
}

async fn language_picks_extension(dir: &Path) {
    let (dispatcher, runtime) = mock_dispatcher(
        dir,
        vec![MockRun::printing("c"), MockRun::printing("cpp"), MockRun::printing("py")],
    );

    dispatcher.execute("int main(){}", Some("c")).await;
    dispatcher.execute("int main(){}", Some("c++")).await;
    dispatcher.execute("print(1)", Some("py")).await;

    let extensions: Vec<_> = runtime
        .seen()
        .iter()
        .map(|w| w.path.extension().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(extensions, vec!["c", "cpp", "py"]);
}

// =============================================================================
// 3. Sequential calls never share output
// =============================================================================

async fn sequential_calls_do_not_bleed(dir: &Path) {
    let (dispatcher, _) = mock_dispatcher(
        dir,
        vec![MockRun::printing("line one\nline two\n"), MockRun::printing("third")],
    );

    let first = dispatcher.execute("a()", None).await;
    let second = dispatcher.execute("b()", None).await;

    assert_eq!(first, "line one\nline two");
    assert_eq!(second, "third");
}

// =============================================================================
// 4. Result mapping
// =============================================================================

async fn silent_run_reports_completion(dir: &Path) {
    let (dispatcher, _) = mock_dispatcher(dir, vec![MockRun::default()]);
    let output = dispatcher.execute("let x = 1;", None).await;
    assert_eq!(output, "Execution completed successfully.");

    // An exhausted script behaves like a silent success.
    let output = dispatcher.execute("let y = 2;", None).await;
    assert_eq!(output, "Execution completed successfully.");
}

async fn failures_are_reported(dir: &Path) {
    let (dispatcher, _) = mock_dispatcher(
        dir,
        vec![
            MockRun::failing(Some("ReferenceError: y is not defined")),
            MockRun::failing(None),
        ],
    );

    let result = dispatcher.execute_detailed("y", None).await;
    assert!(!result.succeeded);
    assert_eq!(result.output, "Execution failed: ReferenceError: y is not defined");

    let output = dispatcher.execute("y", None).await;
    assert_eq!(output, "Execution failed: Unknown error");
}

// =============================================================================
// 5. Workload cleanup on every path
// =============================================================================

async fn workloads_are_always_removed(dir: &Path) {
    let backend = VmSandboxBackend::new(dir);
    let before = stdout_identity();

    let runtime = MockSandboxRuntime::new(vec![MockRun::printing("ok"), MockRun::failing(Some("bad"))]);
    backend.run("ok()", Language::JavaScript, &runtime).await.unwrap();
    assert!(workload_files(&backend).is_empty(), "after success");

    backend.run("bad()", Language::JavaScript, &runtime).await.unwrap();
    assert!(workload_files(&backend).is_empty(), "after failure");

    let err = backend
        .run("crash()", Language::JavaScript, &ErroringRuntime)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("runtime crashed mid-run"));
    assert!(workload_files(&backend).is_empty(), "after runtime error");
    assert_eq!(stdout_identity(), before, "fd 1 restored after runtime error");
}

async fn runtime_error_is_flattened(dir: &Path) {
    let dispatcher = vm_dispatcher(
        dir,
        Language::JavaScript,
        Arc::new(FixedFactory(Arc::new(ErroringRuntime))),
    );
    let output = dispatcher.execute("x()", None).await;
    assert!(output.starts_with("Error: "));
    assert!(output.contains("runtime crashed mid-run"));
}

async fn runtime_panic_is_contained(dir: &Path) {
    let before = stdout_identity();
    let dispatcher = vm_dispatcher(
        dir,
        Language::Python,
        Arc::new(FixedFactory(Arc::new(PanickingRuntime))),
    );

    let output = dispatcher.execute("boom()", None).await;
    assert_eq!(output, "Error: unexpected failure during code execution");
    assert_eq!(stdout_identity(), before, "fd 1 restored after panic");
    assert!(workload_files(&VmSandboxBackend::new(dir)).is_empty());

    // The capture lock was released by the unwinding guard.
    let capture = StdoutCapture::begin(dir).await.unwrap();
    assert_eq!(capture.finish().unwrap(), "");
}

// =============================================================================
// 6. Lazy runtime construction
// =============================================================================

async fn runtime_is_built_once_under_concurrency(dir: &Path) {
    let runtime = Arc::new(MockSandboxRuntime::new(
        (0..6).map(|i| MockRun::printing(format!("run {}", i))).collect(),
    ));
    let factory = Arc::new(MockSandboxFactory::new(runtime.clone()));
    let dispatcher = Arc::new(vm_dispatcher(dir, Language::JavaScript, factory.clone()));
    assert_eq!(factory.created(), 0, "nothing is built before the first call");

    let calls = (0..6).map(|_| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.execute("work()", None).await })
    });
    let mut outputs: Vec<String> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    outputs.sort();

    assert_eq!(factory.created(), 1);
    assert_eq!(factory.attempts(), 1);
    assert_eq!(runtime.seen().len(), 6);
    let expected: Vec<String> = (0..6).map(|i| format!("run {}", i)).collect();
    assert_eq!(outputs, expected);
}

async fn failed_construction_is_retried(dir: &Path) {
    let runtime = Arc::new(MockSandboxRuntime::new(vec![MockRun::printing("up")]));
    let factory = Arc::new(MockSandboxFactory::new(runtime).failing_first(1));
    let dispatcher = vm_dispatcher(dir, Language::JavaScript, factory.clone());

    let first = dispatcher.execute("go()", None).await;
    assert!(first.contains("mock runtime failed to start"));

    let second = dispatcher.execute("go()", None).await;
    assert_eq!(second, "up");
    assert_eq!(factory.attempts(), 2);
    assert_eq!(factory.created(), 1);
}

async fn clear_cache_reaches_runtime(dir: &Path) {
    let (dispatcher, runtime) = mock_dispatcher(dir, vec![MockRun::printing("x")]);
    assert!(dispatcher.clear_cache().await.contains("nothing to clear"));

    dispatcher.execute("x", None).await;
    assert_eq!(dispatcher.clear_cache().await, "Sandbox cache cleared.");
    assert_eq!(runtime.cache_clears(), 1);
}

// =============================================================================
// 7. Tool surface
// =============================================================================

async fn tool_reports_vm_results(dir: &Path) {
    let (dispatcher, _) = mock_dispatcher(
        dir,
        vec![MockRun::printing("hello"), MockRun::failing(Some("SyntaxError"))],
    );
    let tool = CodeExecutionTool::new(Arc::new(dispatcher));

    let enum_values = tool.parameters()["properties"]["language"]["enum"].clone();
    assert_eq!(enum_values, json!(["python", "javascript", "c", "cpp"]));

    let ok = tool
        .execute(json!({"code": "console.log('hello')", "language": "javascript"}))
        .await
        .unwrap();
    assert!(ok.success);
    assert_eq!(ok.content, "hello");
    assert_eq!(ok.data.unwrap()["backend"], "vm-sandbox");

    let failed = tool.execute(json!({"code": "console.log("})).await.unwrap();
    assert!(!failed.success);
    assert_eq!(failed.content, "Execution failed: SyntaxError");
}

// =============================================================================
// 8. Real child processes writing to the inherited stdout
// =============================================================================

async fn command_runtime_output_is_captured(dir: &Path) {
    if !Path::new("/bin/sh").is_file() {
        return;
    }
    let factory = Arc::new(CommandSandboxFactory::new("/bin/sh", Vec::new()));
    // The shell ignores the file extension; the workload is a shell script.
    let dispatcher = vm_dispatcher(dir, Language::JavaScript, factory);

    let output = dispatcher.execute("echo $((2+2))", None).await;
    assert_eq!(output, "4");

    let output = dispatcher.execute("echo oops >&2; exit 1", None).await;
    assert_eq!(output, "Execution failed: oops");
}

async fn node_runtime_output_is_captured(dir: &Path) {
    let node = Path::new("/usr/bin/node");
    if !node.is_file() {
        return;
    }
    let factory = Arc::new(CommandSandboxFactory::new(node, Vec::new()));
    let dispatcher = vm_dispatcher(dir, Language::JavaScript, factory);

    let output = dispatcher.execute("console.log(2+2)", Some("js")).await;
    assert_eq!(output, "4");
}

// =============================================================================
// 9. Process backend alongside
// =============================================================================

async fn process_backend_scenarios() {
    let python = Path::new("/usr/bin/python3");
    let dispatcher = ExecutionDispatcher::process(
        code_interpreter_sandbox::ProcessBackend::new(python, 1).unwrap(),
    );

    let rejected = dispatcher.execute("console.log(2+2)", Some("javascript")).await;
    assert!(rejected.contains("javascript"));
    assert!(rejected.contains("vm-sandbox"));

    if !python.is_file() {
        return;
    }
    assert_eq!(dispatcher.execute("print(2+2)", Some("python")).await.trim(), "4");

    let timed_out = dispatcher.execute("import time; time.sleep(10)", None).await;
    assert!(timed_out.contains("timed out"));
    assert!(timed_out.contains("1s"));
}

// =============================================================================
// Runner
// =============================================================================

#[tokio::test]
async fn test_execution_pipeline() {
    let scratch = tempfile::tempdir().unwrap();
    let fresh = || tempfile::tempdir_in(scratch.path()).unwrap();

    capture_guard_roundtrip(fresh().path()).await;
    javascript_prints_result(fresh().path()).await;
    language_picks_extension(fresh().path()).await;
    sequential_calls_do_not_bleed(fresh().path()).await;
    silent_run_reports_completion(fresh().path()).await;
    failures_are_reported(fresh().path()).await;
    workloads_are_always_removed(fresh().path()).await;
    runtime_error_is_flattened(fresh().path()).await;
    runtime_panic_is_contained(fresh().path()).await;
    runtime_is_built_once_under_concurrency(fresh().path()).await;
    failed_construction_is_retried(fresh().path()).await;
    clear_cache_reaches_runtime(fresh().path()).await;
    tool_reports_vm_results(fresh().path()).await;
    command_runtime_output_is_captured(fresh().path()).await;
    node_runtime_output_is_captured(fresh().path()).await;
    process_backend_scenarios().await;
}
