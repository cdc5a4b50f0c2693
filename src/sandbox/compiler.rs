use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    models::{FailureKind, Job, Language, Outcome, SandboxLimits},
    sandbox::{Executor, ExitKind, MemoryEnforcement, ScratchDir, classify_run, run_bounded},
};

/// Compile-then-run executor for C++.
///
/// Source and the compiled artifact both live in the per-job scratch
/// directory, so concurrent jobs never share filenames and the scratch guard
/// reclaims everything on any exit path. The compiler runs under its own
/// wall clock; only the produced binary runs under the job's.
pub struct CppExecutor {
    bin: String,
}

impl CppExecutor {
    pub fn new(bin: String) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl Executor for CppExecutor {
    fn language(&self) -> Language {
        Language::Cpp
    }

    async fn run(&self, job: &Job, limits: &SandboxLimits) -> anyhow::Result<Outcome> {
        let scratch = ScratchDir::create(job.id).await?;
        let source_path = scratch.file("main.cpp");
        let binary_path = scratch.file("main");
        tokio::fs::write(&source_path, job.source.as_bytes())
            .await
            .context("failed to write source to scratch")?;

        let mut compile = Command::new(&self.bin);
        compile
            .arg(&source_path)
            .args(["-O2", "-o"])
            .arg(&binary_path);
        compile.current_dir(scratch.path());

        let compiled = run_bounded(
            compile,
            limits,
            Duration::from_millis(limits.compile_wall_clock_ms),
            MemoryEnforcement::Rlimit,
        )
        .await
        .with_context(|| format!("compiler `{}` unavailable", self.bin))?;

        match compiled.exit {
            ExitKind::Exited(0) => {}
            ExitKind::TimedOut => {
                return Ok(Outcome::failure(
                    FailureKind::CompileError,
                    format!(
                        "compilation exceeded the {}ms limit",
                        limits.compile_wall_clock_ms
                    ),
                ));
            }
            ExitKind::Exited(code) => {
                return Ok(Outcome::failure(
                    FailureKind::CompileError,
                    format!(
                        "compiler exited with code {code}: {}",
                        compiled.stderr.trim()
                    ),
                ));
            }
            ExitKind::Signaled(signal) => {
                return Ok(Outcome::failure(
                    FailureKind::CompileError,
                    format!("compiler terminated by signal {signal}"),
                ));
            }
        }

        let mut run = Command::new(&binary_path);
        run.current_dir(scratch.path());
        let output = run_bounded(
            run,
            limits,
            Duration::from_millis(limits.wall_clock_ms),
            MemoryEnforcement::Rlimit,
        )
        .await
        .context("failed to start compiled binary")?;
        Ok(classify_run(&output, limits.wall_clock_ms, false))
    }
}

#[cfg(test)]
mod tests {
    use super::CppExecutor;
    use crate::{
        models::{FailureKind, Job, Language, Outcome, SandboxLimits, now_ms},
        sandbox::Executor,
    };
    use uuid::Uuid;

    fn job(source: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            language: Language::Cpp,
            source: source.to_string(),
            submitted_at_ms: now_ms(),
            deliveries: 1,
        }
    }

    fn limits(wall_clock_ms: u64) -> SandboxLimits {
        SandboxLimits {
            wall_clock_ms,
            compile_wall_clock_ms: 30_000,
            memory_bytes: 1 << 30,
            max_output_bytes: 16 * 1024,
            allow_network: false,
        }
    }

    #[tokio::test]
    #[ignore = "requires g++ on PATH"]
    async fn compiles_runs_and_captures_stdout() {
        let executor = CppExecutor::new("g++".to_string());
        let source = r#"#include <cstdio>
int main() { std::printf("4\n"); return 0; }"#;
        let outcome = executor.run(&job(source), &limits(4000)).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Success {
                stdout: "4\n".to_string()
            }
        );
    }

    #[tokio::test]
    #[ignore = "requires g++ on PATH"]
    async fn syntax_error_is_a_compile_error() {
        let executor = CppExecutor::new("g++".to_string());
        let outcome = executor
            .run(&job("int main( { not c++ }"), &limits(4000))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::CompileError,
                ..
            }
        ));
    }

    #[tokio::test]
    #[ignore = "requires g++ on PATH"]
    async fn null_dereference_is_a_runtime_error() {
        let executor = CppExecutor::new("g++".to_string());
        let outcome = executor
            .run(&job("int main(){int*p=0;return *p;}"), &limits(4000))
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
    #[ignore = "requires g++ on PATH"]
    async fn infinite_loop_times_out() {
        let executor = CppExecutor::new("g++".to_string());
        let outcome = executor
            .run(&job("int main(){while(1);}"), &limits(200))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::TimeoutError,
                ..
            }
        ));
    }
}
