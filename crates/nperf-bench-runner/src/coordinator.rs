//! Trial coordination: one attempt, one repetition, one run.
//!
//! An attempt walks the states of [`AttemptState`]: the server is started,
//! given a fixed settle delay, then the client is started and both are
//! awaited with a shared deadline. The workload has no readiness
//! handshake, so the settle delay is the only ordering guarantee and a
//! slow server can still lose the race.
//!
//! A repetition retries failed attempts up to a fixed bound, cooling down
//! before every attempt and reclaiming the server port after every
//! failure. A run stops at the first repetition that exhausts its
//! attempts.

use chrono::{DateTime, Utc};
use nperf_bench_core::{
    ExecutionTarget, RoleTargets, Role, RunSpec, TrialOutcome, TrialSuccess,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::{record_path, Invocation};
use crate::failure_log::FailureLog;
use crate::launcher::{Launcher, ProcessExit, ProcessHandle, WaitStatus};

/// Wait between server launch and client launch.
pub const DEFAULT_SERVER_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Quiesce time before every attempt.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Added to the client's run duration to form the wait deadline.
pub const DEFAULT_DEADLINE_MARGIN: Duration = Duration::from_secs(10);

/// Attempts per repetition before it is dropped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Client parameter holding the run duration in seconds.
pub const RUN_DURATION_PARAM: &str = "time";

/// Workload default when the client sets no duration.
pub const DEFAULT_RUN_DURATION_SECS: u64 = 10;

/// Server parameter holding the listening port.
pub const PORT_PARAM: &str = "port";

/// Workload default listening port.
pub const DEFAULT_SERVER_PORT: u16 = 45001;

/// States of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    ServerStarting,
    ServerReady,
    ClientRunning,
    BothFinished,
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptState::Idle => "idle",
            AttemptState::ServerStarting => "server_starting",
            AttemptState::ServerReady => "server_ready",
            AttemptState::ClientRunning => "client_running",
            AttemptState::BothFinished => "both_finished",
            AttemptState::Succeeded => "succeeded",
            AttemptState::Failed => "failed",
            AttemptState::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Explicit configuration of the coordinator. No process-wide globals.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Workload binary path on every target.
    pub executable: PathBuf,

    /// Directory for records and failure logs.
    pub results_dir: PathBuf,

    /// Stem shared by all output files of this suite.
    pub output_stem: String,

    /// Per-role execution targets.
    pub targets: RoleTargets,

    pub settle_delay: Duration,
    pub cooldown: Duration,
    pub deadline_margin: Duration,
    pub max_attempts: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("nperf"),
            results_dir: PathBuf::from("results"),
            output_stem: "test_results".to_string(),
            targets: RoleTargets::default(),
            settle_delay: DEFAULT_SERVER_SETTLE_DELAY,
            cooldown: DEFAULT_COOLDOWN,
            deadline_margin: DEFAULT_DEADLINE_MARGIN,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// One attempt and what came of it.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub trial_id: Uuid,
    pub repetition: u32,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: TrialOutcome,
}

/// All attempts of one repetition.
#[derive(Debug, Clone)]
pub struct RepetitionReport {
    pub repetition: u32,
    pub attempts: Vec<AttemptRecord>,
}

impl RepetitionReport {
    /// The successful outcome, if the repetition produced one.
    pub fn success(&self) -> Option<&TrialSuccess> {
        self.attempts.last().and_then(|a| match &a.outcome {
            TrialOutcome::Success(success) => Some(success),
            _ => None,
        })
    }
}

/// Everything that happened while executing one run.
#[derive(Debug, Clone)]
pub struct RunExecution {
    pub test_name: String,
    pub run_name: String,
    pub repetitions: Vec<RepetitionReport>,
    /// A repetition exhausted its attempts and the rest were skipped.
    pub aborted: bool,
}

impl RunExecution {
    /// Successful outcomes in repetition order.
    pub fn successes(&self) -> impl Iterator<Item = &TrialSuccess> {
        self.repetitions.iter().filter_map(RepetitionReport::success)
    }

    pub fn successful_repetitions(&self) -> usize {
        self.successes().count()
    }

    pub fn total_attempts(&self) -> usize {
        self.repetitions.iter().map(|r| r.attempts.len()).sum()
    }
}

/// Drives paired server/client attempts.
pub struct TrialCoordinator {
    launcher: Arc<dyn Launcher>,
    settings: CoordinatorSettings,
    failure_log: FailureLog,
}

impl TrialCoordinator {
    pub fn new(launcher: Arc<dyn Launcher>, settings: CoordinatorSettings) -> Self {
        let failure_log = FailureLog::new(&settings.results_dir, &settings.output_stem);
        Self {
            launcher,
            settings,
            failure_log,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn launcher(&self) -> &Arc<dyn Launcher> {
        &self.launcher
    }

    pub fn failure_log(&self) -> &FailureLog {
        &self.failure_log
    }

    /// Wait deadline: client run duration plus the safety margin.
    pub fn deadline(&self, run: &RunSpec) -> Duration {
        let secs = run
            .client_params
            .get_u64(RUN_DURATION_PARAM)
            .unwrap_or(DEFAULT_RUN_DURATION_SECS);
        Duration::from_secs(secs).saturating_add(self.settings.deadline_margin)
    }

    /// Port the server listens on.
    pub fn server_port(run: &RunSpec) -> u16 {
        run.server_params
            .get_u64(PORT_PARAM)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    fn invocation(&self, role: Role, test: &str, run: &RunSpec, repetition: u32, attempt: u32) -> Invocation {
        Invocation {
            role,
            executable: self.settings.executable.clone(),
            params: run.params(role).clone(),
            target: self.settings.targets.for_role(role).clone(),
            test_label: test.to_string(),
            run_label: run.run_name.clone(),
            record_path: record_path(
                &self.settings.results_dir,
                &self.settings.output_stem,
                role,
                test,
                &run.run_name,
                repetition,
                attempt,
            ),
        }
    }

    /// Execute every repetition of a run.
    pub async fn execute_run(&self, test: &str, run: &RunSpec) -> RunExecution {
        info!(test = %test, run = %run.run_name, repetitions = run.repetitions, "starting run");

        let mut repetitions = Vec::new();
        let mut aborted = false;

        for repetition in 1..=run.repetitions {
            info!(
                test = %test,
                run = %run.run_name,
                "repetition {}/{}",
                repetition,
                run.repetitions
            );
            let report = self.run_repetition(test, run, repetition).await;
            let exhausted = report.success().is_none();
            repetitions.push(report);

            if exhausted {
                error!(
                    test = %test,
                    run = %run.run_name,
                    repetition,
                    max_attempts = self.settings.max_attempts,
                    "maximum number of failed attempts reached, skipping remaining repetitions"
                );
                aborted = true;
                break;
            }
        }

        RunExecution {
            test_name: test.to_string(),
            run_name: run.run_name.clone(),
            repetitions,
            aborted,
        }
    }

    /// Execute one repetition, retrying up to the attempt bound.
    pub async fn run_repetition(&self, test: &str, run: &RunSpec, repetition: u32) -> RepetitionReport {
        let mut attempts = Vec::new();

        for attempt in 1..=self.settings.max_attempts.max(1) {
            debug!(cooldown_ms = self.settings.cooldown.as_millis() as u64, "waiting for system under test to settle");
            tokio::time::sleep(self.settings.cooldown).await;

            let started_at = Utc::now();
            let clock = Instant::now();
            let trial_id = Uuid::new_v4();
            let outcome = self.run_attempt(trial_id, test, run, repetition, attempt).await;

            let succeeded = outcome.is_success();
            if succeeded {
                info!(test = %test, run = %run.run_name, repetition, attempt, "attempt succeeded");
            } else {
                warn!(
                    test = %test,
                    run = %run.run_name,
                    repetition,
                    attempt,
                    outcome = outcome.label(),
                    "attempt failed"
                );
            }

            attempts.push(AttemptRecord {
                trial_id,
                repetition,
                attempt,
                started_at,
                duration_ms: clock.elapsed().as_millis() as u64,
                outcome,
            });

            if succeeded {
                break;
            }
            self.reclaim_server_port(run).await;
        }

        RepetitionReport {
            repetition,
            attempts,
        }
    }

    /// Execute a single attempt.
    pub async fn run_attempt(
        &self,
        trial_id: Uuid,
        test: &str,
        run: &RunSpec,
        repetition: u32,
        attempt: u32,
    ) -> TrialOutcome {
        let server_inv = self.invocation(Role::Server, test, run, repetition, attempt);
        let client_inv = self.invocation(Role::Client, test, run, repetition, attempt);
        let deadline = self.deadline(run);
        let step = |state: AttemptState| {
            debug!(%trial_id, test = %test, run = %run.run_name, repetition, attempt, state = %state, "attempt transition");
        };

        step(AttemptState::Idle);
        step(AttemptState::ServerStarting);
        let mut server = match self.launcher.launch(&server_inv).await {
            Ok(handle) => handle,
            Err(e) => {
                step(AttemptState::Failed);
                return TrialOutcome::LaunchFailed {
                    role: Role::Server,
                    reason: e.to_string(),
                };
            }
        };

        tokio::time::sleep(self.settings.settle_delay).await;
        step(AttemptState::ServerReady);

        let mut client = match self.launcher.launch(&client_inv).await {
            Ok(handle) => handle,
            Err(e) => {
                kill_quietly(Role::Server, &mut *server).await;
                step(AttemptState::Failed);
                return TrialOutcome::LaunchFailed {
                    role: Role::Client,
                    reason: e.to_string(),
                };
            }
        };
        step(AttemptState::ClientRunning);

        let (server_status, client_status) =
            tokio::join!(server.wait(deadline), client.wait(deadline));
        step(AttemptState::BothFinished);

        let (server_exit, client_exit) = match (server_status, client_status) {
            (Ok(WaitStatus::Exited(s)), Ok(WaitStatus::Exited(c))) => (s, c),
            (server_status, client_status) => {
                let server_timed_out = matches!(server_status, Ok(WaitStatus::TimedOut));
                let client_timed_out = matches!(client_status, Ok(WaitStatus::TimedOut));
                kill_quietly(Role::Server, &mut *server).await;
                kill_quietly(Role::Client, &mut *client).await;

                if server_timed_out || client_timed_out {
                    for (role, status) in [(Role::Server, &server_status), (Role::Client, &client_status)] {
                        if let Ok(WaitStatus::Exited(exit)) = status {
                            self.record_failure(trial_id, test, run, role, exit).await;
                        }
                    }
                    let role = if server_timed_out { Role::Server } else { Role::Client };
                    error!(%trial_id, role = %role, deadline_s = deadline.as_secs(), "process did not finish before deadline");
                    step(AttemptState::TimedOut);
                    return TrialOutcome::Timeout { role };
                }

                let reason = [server_status.err(), client_status.err()]
                    .into_iter()
                    .flatten()
                    .map(|e| format!("{:#}", e))
                    .collect::<Vec<_>>()
                    .join("; ");
                step(AttemptState::Failed);
                return TrialOutcome::Incomplete { reason };
            }
        };

        let mut failure = None;
        for (role, exit) in [(Role::Server, &server_exit), (Role::Client, &client_exit)] {
            if let Some(diagnostics) = self.record_failure(trial_id, test, run, role, exit).await {
                failure.get_or_insert(TrialOutcome::ProcessError {
                    role,
                    stderr: diagnostics,
                });
            }
        }
        if let Some(outcome) = failure {
            step(AttemptState::Failed);
            return outcome;
        }

        let server_record = self
            .launcher
            .collect_record(&server_inv.target, &server_inv.record_path)
            .await;
        let client_record = self
            .launcher
            .collect_record(&client_inv.target, &client_inv.record_path)
            .await;

        match (server_record, client_record) {
            (Ok(server), Ok(client)) => {
                step(AttemptState::Succeeded);
                TrialOutcome::Success(TrialSuccess { server, client })
            }
            (Err(e), _) | (_, Err(e)) => {
                step(AttemptState::Failed);
                TrialOutcome::Incomplete {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Append the diagnostics of a role that exited unclean to its failure
    /// log. Returns them, or `None` for a clean exit.
    async fn record_failure(
        &self,
        trial_id: Uuid,
        test: &str,
        run: &RunSpec,
        role: Role,
        exit: &ProcessExit,
    ) -> Option<String> {
        if exit.clean() {
            return None;
        }
        let diagnostics = diagnostics_of(exit);
        error!(%trial_id, role = %role, exit_code = exit.exit_code, stderr = %diagnostics.trim(), "role process failed");
        if let Err(e) = self
            .failure_log
            .append(role, test, &run.run_name, run.params(role), &diagnostics)
            .await
        {
            warn!(error = %e, "could not write failure log");
        }
        Some(diagnostics)
    }

    async fn reclaim_server_port(&self, run: &RunSpec) {
        let port = Self::server_port(run);
        let target: &ExecutionTarget = &self.settings.targets.server;
        match self.launcher.reclaim_port(port, target).await {
            Ok(pids) if !pids.is_empty() => info!(port, reaped = pids.len(), "reclaimed server port"),
            Ok(_) => debug!(port, "no leftover process on server port"),
            Err(e) => warn!(port, error = %e, "failed to reclaim server port"),
        }
    }
}

fn diagnostics_of(exit: &ProcessExit) -> String {
    if exit.stderr.trim().is_empty() {
        format!("exited with code {}\n", exit.exit_code)
    } else {
        exit.stderr.clone()
    }
}

async fn kill_quietly(role: Role, handle: &mut dyn ProcessHandle) {
    if let Err(e) = handle.kill().await {
        warn!(role = %role, error = %e, "failed to kill process");
    }
}
