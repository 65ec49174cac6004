//! nperf-bench runner
//!
//! Executes expanded suites: launches paired server/client processes,
//! retries failed attempts, reduces repetitions and feeds a result sink.

pub mod command;
pub mod coordinator;
pub mod failure_log;
pub mod launcher;
pub mod pipeline;
pub mod preflight;
pub mod sink;

pub use command::{record_path, Invocation};
pub use coordinator::{
    AttemptRecord, AttemptState, CoordinatorSettings, RepetitionReport, RunExecution,
    TrialCoordinator, DEFAULT_COOLDOWN, DEFAULT_DEADLINE_MARGIN, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_SERVER_PORT, DEFAULT_SERVER_SETTLE_DELAY,
};
pub use failure_log::FailureLog;
pub use launcher::{Launcher, ProcessExit, ProcessHandle, ProcessLauncher, WaitStatus};
pub use pipeline::{BenchPipeline, RunSummary, SuiteReport};
pub use sink::{MemorySink, ResultSink, RunRow};
