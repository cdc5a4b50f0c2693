mod compiler;
mod interpreter;
mod limits;
mod scratch;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::EngineConfig,
    models::{FailureKind, Job, Language, Outcome, SandboxLimits},
};

pub use compiler::CppExecutor;
pub use interpreter::{JavaScriptExecutor, PythonExecutor};
pub use limits::{BoundedOutput, ExitKind, MemoryEnforcement, run_bounded};
pub use scratch::ScratchDir;

/// One sandboxed execution strategy.
///
/// `run` returns `Ok` with a classified outcome for anything the submitted
/// code did, including crashes and timeouts. `Err` is reserved for
/// infrastructure faults (missing interpreter, scratch setup failure) that
/// the worker handles at the queue level.
#[async_trait]
pub trait Executor: Send + Sync {
    fn language(&self) -> Language;
    async fn run(&self, job: &Job, limits: &SandboxLimits) -> anyhow::Result<Outcome>;
}

pub fn executor_for(language: Language, config: &EngineConfig) -> Arc<dyn Executor> {
    match language {
        Language::Python => Arc::new(PythonExecutor::new(config.python_bin.clone())),
        Language::JavaScript => Arc::new(JavaScriptExecutor::new(config.node_bin.clone())),
        Language::Cpp => Arc::new(CppExecutor::new(config.cxx_bin.clone())),
    }
}

/// Shared run-phase classification.
///
/// `stderr_is_error` applies the interpreter contract: diagnostics on stderr
/// mean the program failed even when the exit code is zero. Compiled
/// binaries keep the exit code as the only verdict.
pub(crate) fn classify_run(
    output: &BoundedOutput,
    wall_clock_ms: u64,
    stderr_is_error: bool,
) -> Outcome {
    match output.exit {
        ExitKind::TimedOut => Outcome::failure(
            FailureKind::TimeoutError,
            format!("wall clock limit of {wall_clock_ms}ms exceeded"),
        ),
        // A signal death alone is not memory evidence; ordinary crashes
        // (null dereference, abort) arrive the same way. Only out-of-memory
        // diagnostics on stderr attribute the kill to the ceiling.
        ExitKind::Signaled(signal) if looks_like_oom(&output.stderr) => Outcome::failure(
            FailureKind::ResourceError,
            format!("terminated by signal {signal} under the memory ceiling"),
        ),
        ExitKind::Signaled(signal) => Outcome::failure(
            FailureKind::RuntimeError,
            format!("terminated by signal {signal}: {}", output.stderr.trim()),
        ),
        ExitKind::Exited(code) if code != 0 => {
            let kind = if looks_like_oom(&output.stderr) {
                FailureKind::ResourceError
            } else {
                FailureKind::RuntimeError
            };
            Outcome::failure(
                kind,
                format!("exited with code {code}: {}", output.stderr.trim()),
            )
        }
        ExitKind::Exited(_) if stderr_is_error && !output.stderr.trim().is_empty() => {
            Outcome::failure(FailureKind::RuntimeError, output.stderr.trim().to_string())
        }
        ExitKind::Exited(_) => Outcome::Success {
            stdout: output.stdout.clone(),
        },
    }
}

fn looks_like_oom(stderr: &str) -> bool {
    stderr.contains("MemoryError")
        || stderr.contains("bad_alloc")
        || stderr.contains("heap out of memory")
        || stderr.contains("Cannot allocate memory")
}
