//! Suite execution: pre-flight, every run in order, aggregation, sink.

use nperf_bench_core::{Aggregator, RunResult, TestSuite, TrialSuccess};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::coordinator::{RunExecution, TrialCoordinator};
use crate::preflight;
use crate::sink::{ResultSink, RunRow};

/// Per-run summary kept after the suite finishes.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub test_name: String,
    pub run_name: String,
    pub requested_repetitions: u32,
    pub successful_repetitions: usize,
    pub attempts: usize,
    pub aborted: bool,

    /// Metric of the chosen sample; `None` when the run was dropped.
    pub chosen_metric: Option<f64>,
}

impl RunSummary {
    pub fn retained(&self) -> bool {
        self.chosen_metric.is_some()
    }
}

/// Result of a complete suite execution.
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub suite_digest: String,
    pub runs: Vec<RunSummary>,
    pub duration_ms: u64,
}

impl SuiteReport {
    /// Runs that produced a result row.
    pub fn retained_count(&self) -> usize {
        self.runs.iter().filter(|r| r.retained()).count()
    }

    /// Runs dropped for lack of usable data.
    pub fn dropped_count(&self) -> usize {
        self.runs.iter().filter(|r| !r.retained()).count()
    }

    pub fn total_attempts(&self) -> usize {
        self.runs.iter().map(|r| r.attempts).sum()
    }
}

/// Drives a whole suite through a [`TrialCoordinator`].
pub struct BenchPipeline {
    coordinator: TrialCoordinator,
    aggregator: Aggregator,
}

impl BenchPipeline {
    pub fn new(coordinator: TrialCoordinator, aggregator: Aggregator) -> Self {
        Self {
            coordinator,
            aggregator,
        }
    }

    pub fn coordinator(&self) -> &TrialCoordinator {
        &self.coordinator
    }

    /// Execute every run of `suite` and hand retained results to `sink`.
    ///
    /// Only an unreachable target found during pre-flight aborts the suite;
    /// a run without usable data is logged and skipped.
    pub async fn run(&self, suite: &TestSuite, sink: &mut dyn ResultSink) -> anyhow::Result<SuiteReport> {
        let start = Instant::now();
        let settings = self.coordinator.settings();

        preflight::check_targets(
            self.coordinator.launcher().as_ref(),
            &settings.targets,
            &settings.results_dir,
        )
        .await?;

        info!(
            suite = %suite.short_digest(),
            tests = suite.tests.len(),
            runs = suite.run_count(),
            "starting benchmark suite"
        );

        let mut runs = Vec::new();
        for test in &suite.tests {
            info!(test = %test.name, "executing test");
            for run in &test.runs {
                let execution = self.coordinator.execute_run(&test.name, run).await;
                let result = self.aggregate(&execution);

                let chosen_metric = match &result {
                    RunResult::Chosen {
                        outcome,
                        kept_samples,
                        discarded_samples,
                    } => {
                        let metric = outcome.server.data_rate_gbit;
                        info!(
                            test = %test.name,
                            run = %run.run_name,
                            kept = kept_samples,
                            discarded = discarded_samples,
                            data_rate_gbit = metric,
                            "run result retained"
                        );
                        sink.accept(RunRow {
                            test_name: test.name.clone(),
                            run_name: run.run_name.clone(),
                            suite_digest: suite.digest.clone(),
                            repetitions: run.repetitions,
                            successful_repetitions: execution.successful_repetitions(),
                            kept_samples: *kept_samples,
                            discarded_samples: *discarded_samples,
                            client_params: run.client_params.clone(),
                            server_params: run.server_params.clone(),
                            chosen: outcome.clone(),
                        })?;
                        Some(metric)
                    }
                    RunResult::NoSuccessfulAttempt => {
                        error!(test = %test.name, run = %run.run_name, "run dropped, no usable result");
                        None
                    }
                };

                runs.push(RunSummary {
                    test_name: test.name.clone(),
                    run_name: run.run_name.clone(),
                    requested_repetitions: run.repetitions,
                    successful_repetitions: execution.successful_repetitions(),
                    attempts: execution.total_attempts(),
                    aborted: execution.aborted,
                    chosen_metric,
                });
            }
        }

        sink.finish()?;

        let report = SuiteReport {
            suite_digest: suite.digest.clone(),
            runs,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            retained = report.retained_count(),
            dropped = report.dropped_count(),
            attempts = report.total_attempts(),
            duration_ms = report.duration_ms,
            "benchmark suite finished"
        );
        Ok(report)
    }

    fn aggregate(&self, execution: &RunExecution) -> RunResult {
        let successes: Vec<TrialSuccess> = execution.successes().cloned().collect();
        if successes.is_empty() {
            return RunResult::NoSuccessfulAttempt;
        }
        match self.aggregator.reduce(&successes) {
            Ok(selection) => RunResult::Chosen {
                outcome: selection.chosen.clone(),
                kept_samples: selection.kept,
                discarded_samples: selection.discarded,
            },
            Err(e) => {
                warn!(
                    test = %execution.test_name,
                    run = %execution.run_name,
                    error = %e,
                    "aggregation failed"
                );
                RunResult::NoSuccessfulAttempt
            }
        }
    }
}
