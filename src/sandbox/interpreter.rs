use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    models::{Job, Language, Outcome, SandboxLimits},
    sandbox::{Executor, MemoryEnforcement, ScratchDir, classify_run, run_bounded},
};

/// Subprocess-interpreter executor for Python.
///
/// The source is written into the job's scratch directory and the
/// interpreter is invoked with an explicit argv on that file. `-I` runs the
/// interpreter isolated: no user site-packages, no environment-derived
/// paths, no current-directory imports.
pub struct PythonExecutor {
    bin: String,
}

impl PythonExecutor {
    pub fn new(bin: String) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl Executor for PythonExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn run(&self, job: &Job, limits: &SandboxLimits) -> anyhow::Result<Outcome> {
        let scratch = ScratchDir::create(job.id).await?;
        let source_path = scratch.file("main.py");
        tokio::fs::write(&source_path, job.source.as_bytes())
            .await
            .context("failed to write source to scratch")?;

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-I").arg(&source_path);
        cmd.current_dir(scratch.path());

        let output = run_bounded(
            cmd,
            limits,
            Duration::from_millis(limits.wall_clock_ms),
            MemoryEnforcement::Rlimit,
        )
        .await
        .with_context(|| format!("python interpreter `{}` unavailable", self.bin))?;
        Ok(classify_run(&output, limits.wall_clock_ms, true))
    }
}

/// Subprocess executor for JavaScript.
///
/// There is no embedded engine here; node runs in its own process so a
/// runaway script can be process-group killed like any other job.
/// `--print` evaluates the source and writes the final expression value to
/// stdout, so `1/0` resolves to `Infinity` rather than an error. The source
/// travels as a single argv element, never through a shell.
///
/// V8 reserves multi-gigabyte virtual regions before user code runs, so an
/// `RLIMIT_AS` ceiling kills node at startup. The memory ceiling goes on
/// the argv as `--max-old-space-size` instead.
pub struct JavaScriptExecutor {
    bin: String,
}

impl JavaScriptExecutor {
    pub fn new(bin: String) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl Executor for JavaScriptExecutor {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    async fn run(&self, job: &Job, limits: &SandboxLimits) -> anyhow::Result<Outcome> {
        let scratch = ScratchDir::create(job.id).await?;

        let mut cmd = Command::new(&self.bin);
        cmd.arg(v8_heap_flag(limits));
        cmd.arg("--print").arg(&job.source);
        cmd.current_dir(scratch.path());

        let output = run_bounded(
            cmd,
            limits,
            Duration::from_millis(limits.wall_clock_ms),
            MemoryEnforcement::RuntimeManaged,
        )
        .await
        .with_context(|| format!("node runtime `{}` unavailable", self.bin))?;
        Ok(classify_run(&output, limits.wall_clock_ms, true))
    }
}

fn v8_heap_flag(limits: &SandboxLimits) -> String {
    let heap_mib = (limits.memory_bytes >> 20).max(16);
    format!("--max-old-space-size={heap_mib}")
}

#[cfg(test)]
mod tests {
    use super::{JavaScriptExecutor, PythonExecutor, v8_heap_flag};
    use crate::{
        models::{FailureKind, Job, Language, Outcome, SandboxLimits, now_ms},
        sandbox::Executor,
    };
    use uuid::Uuid;

    fn job(language: Language, source: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            language,
            source: source.to_string(),
            submitted_at_ms: now_ms(),
            deliveries: 1,
        }
    }

    fn limits() -> SandboxLimits {
        SandboxLimits {
            wall_clock_ms: 4000,
            compile_wall_clock_ms: 10_000,
            memory_bytes: 512 << 20,
            max_output_bytes: 16 * 1024,
            allow_network: false,
        }
    }

    #[test]
    fn javascript_heap_ceiling_goes_on_the_argv() {
        let flag = v8_heap_flag(&limits());
        assert_eq!(flag, "--max-old-space-size=512");
    }

    #[tokio::test]
    #[ignore = "requires python3 on PATH"]
    async fn python_success_captures_stdout() {
        let executor = PythonExecutor::new("python3".to_string());
        let outcome = executor
            .run(&job(Language::Python, "print(2+2)"), &limits())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Success {
                stdout: "4\n".to_string()
            }
        );
    }

    #[tokio::test]
    #[ignore = "requires python3 on PATH"]
    async fn python_exception_is_a_runtime_error() {
        let executor = PythonExecutor::new("python3".to_string());
        let outcome = executor
            .run(&job(Language::Python, "raise ValueError('boom')"), &limits())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::RuntimeError,
                ..
            }
        ));
    }

    #[tokio::test]
    #[ignore = "requires node on PATH"]
    async fn javascript_division_by_zero_is_infinity_not_an_error() {
        let executor = JavaScriptExecutor::new("node".to_string());
        let outcome = executor
            .run(&job(Language::JavaScript, "1/0"), &limits())
            .await
            .unwrap();
        match outcome {
            Outcome::Success { stdout } => assert_eq!(stdout.trim(), "Infinity"),
            other => panic!("expected success, got {other:?}"),
        }
    }
}
