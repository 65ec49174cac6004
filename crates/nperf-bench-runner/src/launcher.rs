//! Process launching and host-side helpers.
//!
//! [`Launcher`] is the seam between the trial coordinator and the operating
//! system. [`ProcessLauncher`] spawns real processes (locally or through
//! `ssh`); tests substitute scripted doubles.

use anyhow::Context;
use async_trait::async_trait;
use nperf_bench_core::{
    BenchError, ExecutionTarget, LaunchError, MeasurementRecord, RecordError, Role,
};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::Invocation;

/// Deadline for the remote reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of a process that exited on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code (0 = success, -1 = terminated by signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock time from spawn to exit in milliseconds.
    pub duration_ms: u64,
}

impl ProcessExit {
    /// Zero exit status and no diagnostic output.
    pub fn clean(&self) -> bool {
        self.exit_code == 0 && self.stderr.trim().is_empty()
    }
}

/// Result of waiting on a process with a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(ProcessExit),
    TimedOut,
}

/// A running role process.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Wait for exit, giving up after `timeout`. The process keeps running
    /// on timeout; call [`ProcessHandle::kill`] to stop it.
    async fn wait(&mut self, timeout: Duration) -> anyhow::Result<WaitStatus>;

    /// Force-kill the process. No-op if it already exited.
    async fn kill(&mut self) -> anyhow::Result<()>;
}

/// Starts role processes and performs host-side housekeeping.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn one role process.
    async fn launch(&self, invocation: &Invocation) -> Result<Box<dyn ProcessHandle>, LaunchError>;

    /// Read the record a finished role wrote on its host.
    async fn collect_record(
        &self,
        target: &ExecutionTarget,
        path: &Path,
    ) -> Result<MeasurementRecord, RecordError>;

    /// Terminate every process bound to `port` on the target host.
    /// Returns the PIDs that were signalled.
    async fn reclaim_port(&self, port: u16, target: &ExecutionTarget) -> anyhow::Result<Vec<u32>>;

    /// Check that the target can run workloads and that `results_dir`
    /// exists there.
    async fn probe(&self, target: &ExecutionTarget, results_dir: &Path) -> Result<(), BenchError>;
}

/// [`Launcher`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, invocation: &Invocation) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        let role = invocation.role;
        let argv = invocation.command_line();
        let (exe, args) = argv
            .split_first()
            .ok_or(LaunchError::EmptyCommand { role })?;

        debug!(role = %role, command = %argv.join(" "), "spawning role process");

        let mut child = Command::new(exe)
            .args(args)
            .envs(invocation.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn { role, source })?;

        let stdout_task = child.stdout.take().map(drain);
        let stderr_task = child.stderr.take().map(drain);

        Ok(Box::new(ChildHandle {
            role,
            child,
            started: Instant::now(),
            stdout_task,
            stderr_task,
        }))
    }

    async fn collect_record(
        &self,
        target: &ExecutionTarget,
        path: &Path,
    ) -> Result<MeasurementRecord, RecordError> {
        let label = path.display().to_string();
        let bytes = match target {
            ExecutionTarget::Local => {
                tokio::fs::read(path)
                    .await
                    .map_err(|e| RecordError::Unreadable {
                        path: label.clone(),
                        reason: e.to_string(),
                    })?
            }
            ExecutionTarget::Remote { .. } => {
                let argv = target.wrap(&["cat".to_string(), label.clone()], false);
                let exit = run_to_completion(&argv, Some(PROBE_TIMEOUT))
                    .await
                    .map_err(|e| RecordError::Unreadable {
                        path: label.clone(),
                        reason: e.to_string(),
                    })?;
                if exit.exit_code != 0 {
                    return Err(RecordError::Unreadable {
                        path: label,
                        reason: exit.stderr.trim().to_string(),
                    });
                }
                exit.stdout.into_bytes()
            }
        };
        MeasurementRecord::from_csv(&label, bytes.as_slice())
    }

    async fn reclaim_port(&self, port: u16, target: &ExecutionTarget) -> anyhow::Result<Vec<u32>> {
        info!(port, target = %target, "reclaiming server port");

        let lookup = vec![
            "sudo".to_string(),
            "lsof".to_string(),
            "-i".to_string(),
            format!(":{}", port),
            "-t".to_string(),
        ];
        let lookup = match target {
            ExecutionTarget::Local => lookup,
            ExecutionTarget::Remote { host } => {
                let mut argv = vec!["ssh".to_string(), host.clone()];
                argv.extend(lookup);
                argv
            }
        };
        let listing = run_to_completion(&lookup, Some(PROBE_TIMEOUT))
            .await
            .with_context(|| format!("failed to list processes on port {}", port))?;

        let pids = parse_pids(&listing.stdout);
        for pid in &pids {
            info!(pid, port, "killing leftover process");
            let kill = match target {
                ExecutionTarget::Local => vec!["kill".to_string(), "-TERM".to_string(), pid.to_string()],
                ExecutionTarget::Remote { .. } => target.wrap(
                    &["kill".to_string(), "-9".to_string(), pid.to_string()],
                    true,
                ),
            };
            let exit = run_to_completion(&kill, Some(PROBE_TIMEOUT))
                .await
                .with_context(|| format!("failed to kill process {}", pid))?;
            if exit.exit_code != 0 {
                warn!(pid, stderr = %exit.stderr.trim(), "kill reported failure");
            }
        }
        Ok(pids)
    }

    async fn probe(&self, target: &ExecutionTarget, results_dir: &Path) -> Result<(), BenchError> {
        match target {
            ExecutionTarget::Local => {
                tokio::fs::create_dir_all(results_dir).await?;
                Ok(())
            }
            ExecutionTarget::Remote { host } => {
                let dir = nperf_bench_core::target::shell_quote(&results_dir.to_string_lossy());
                let argv = vec![
                    "ssh".to_string(),
                    host.clone(),
                    format!("mkdir -p {} && echo ok", dir),
                ];
                let unreachable_err = |reason: String| BenchError::UnreachableTarget {
                    host: host.clone(),
                    reason,
                };
                let exit = run_to_completion(&argv, Some(PROBE_TIMEOUT))
                    .await
                    .map_err(|e| unreachable_err(e.to_string()))?;
                if exit.stdout.trim() == "ok" {
                    info!(host = %host, "remote target reachable");
                    Ok(())
                } else {
                    Err(unreachable_err(exit.stderr.trim().to_string()))
                }
            }
        }
    }
}

/// Handle over a spawned child whose output is drained in the background.
struct ChildHandle {
    role: Role,
    child: Child,
    started: Instant,
    stdout_task: Option<JoinHandle<Vec<u8>>>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn wait(&mut self, timeout: Duration) -> anyhow::Result<WaitStatus> {
        let status = match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status.with_context(|| format!("failed to wait on {} process", self.role))?,
            Err(_) => return Ok(WaitStatus::TimedOut),
        };

        Ok(WaitStatus::Exited(ProcessExit {
            exit_code: status.code().unwrap_or(-1),
            stdout: collect(self.stdout_task.take()).await,
            stderr: collect(self.stderr_task.take()).await,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }))
    }

    async fn kill(&mut self) -> anyhow::Result<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }
        self.child
            .kill()
            .await
            .with_context(|| format!("failed to kill {} process", self.role))
    }
}

fn drain<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> String {
    match task {
        Some(task) => task
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default(),
        None => String::new(),
    }
}

/// Run a helper command to completion and capture its output.
pub async fn run_to_completion(
    argv: &[String],
    timeout: Option<Duration>,
) -> anyhow::Result<ProcessExit> {
    let start = Instant::now();
    let (exe, args) = argv
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("empty command"))?;

    let child = Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", exe))?;

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("{} timed out after {} seconds", exe, limit.as_secs())
            })??,
        None => child.wait_with_output().await?,
    };

    Ok(ProcessExit {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Parse one PID per line, ignoring blanks and junk.
pub fn parse_pids(listing: &str) -> Vec<u32> {
    listing
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}
