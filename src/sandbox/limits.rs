use std::{process::Stdio, time::Duration};

use anyhow::Context;
use tokio::{io::AsyncReadExt, process::Command};

use crate::models::SandboxLimits;

/// PATH handed to sandboxed commands after `env_clear`; nothing from the
/// host environment leaks into the child.
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const SCRATCH_FILE_SIZE_LIMIT: u64 = 64 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

/// How the memory ceiling is imposed on the child.
///
/// `Rlimit` caps the address space with `RLIMIT_AS`. Runtimes like V8
/// reserve multi-gigabyte virtual regions at startup and die under any
/// realistic address-space cap before user code runs; those executors pass
/// `RuntimeManaged` and put the ceiling on the argv (e.g. node's
/// `--max-old-space-size`) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEnforcement {
    Rlimit,
    RuntimeManaged,
}

#[derive(Debug)]
pub struct BoundedOutput {
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a fully-specified argv under the job's resource ceilings and a hard
/// wall clock.
///
/// The child gets its own session (so the whole process group can be killed
/// on expiry), `RLIMIT_AS` at the memory ceiling, no core dumps, a capped
/// scratch file size, and a best-effort network-namespace unshare. Untrusted
/// code is never interpolated into a shell line; callers build the argv.
pub async fn run_bounded(
    mut cmd: Command,
    limits: &SandboxLimits,
    wall_clock: Duration,
    memory: MemoryEnforcement,
) -> anyhow::Result<BoundedOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.env_clear();
    cmd.env("PATH", SANDBOX_PATH);
    confine(&mut cmd, limits, memory);

    let mut child = cmd.spawn().context("failed to spawn sandboxed command")?;
    let pid = child.id();

    let stdout = child.stdout.take().context("missing stdout pipe")?;
    let stderr = child.stderr.take().context("missing stderr pipe")?;
    let cap = limits.max_output_bytes;
    let stdout_task = tokio::spawn(async move { read_capped(stdout, cap).await });
    let stderr_task = tokio::spawn(async move { read_capped(stderr, cap).await });

    let exit = match tokio::time::timeout(wall_clock, child.wait()).await {
        Ok(Ok(status)) => exit_kind(status),
        Ok(Err(err)) => return Err(err).context("sandboxed command wait failed"),
        Err(_) => {
            // Kill the whole session: the direct child and anything it spawned.
            if let Some(pid) = pid {
                unsafe {
                    libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
                }
            }
            let _ = child.kill().await;
            ExitKind::TimedOut
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(BoundedOutput {
        exit,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    })
}

fn exit_kind(status: std::process::ExitStatus) -> ExitKind {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => ExitKind::Exited(code),
        None => ExitKind::Signaled(status.signal().unwrap_or(-1)),
    }
}

fn confine(cmd: &mut Command, limits: &SandboxLimits, memory: MemoryEnforcement) {
    let memory_bytes = limits.memory_bytes;
    let allow_network = limits.allow_network;
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if !allow_network {
                // Unprivileged hosts refuse this; continue with degraded
                // isolation rather than failing every execution.
                let _ = libc::unshare(libc::CLONE_NEWNET);
            }
            apply_rlimits(memory_bytes, memory)
        });
    }
}

fn apply_rlimits(memory_bytes: u64, memory: MemoryEnforcement) -> std::io::Result<()> {
    if memory == MemoryEnforcement::Rlimit {
        set_rlimit(libc::RLIMIT_AS, memory_bytes)?;
    }
    set_rlimit(libc::RLIMIT_CORE, 0)?;
    set_rlimit(libc::RLIMIT_FSIZE, SCRATCH_FILE_SIZE_LIMIT)?;
    Ok(())
}

fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

async fn read_capped<R>(mut reader: R, cap: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(cap.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < cap {
                    let remaining = cap - out.len();
                    out.extend_from_slice(&chunk[..remaining.min(n)]);
                }
            }
            Err(_) => break,
        }
    }
    out
}
