//! Destination for aggregated run results.

use nperf_bench_core::{ParamMap, TrialSuccess};
use serde::Serialize;

/// One retained run, as handed to a [`ResultSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRow {
    pub test_name: String,
    pub run_name: String,
    pub suite_digest: String,

    /// Requested repetitions.
    pub repetitions: u32,
    pub successful_repetitions: usize,
    pub kept_samples: usize,
    pub discarded_samples: usize,

    pub client_params: ParamMap,
    pub server_params: ParamMap,

    /// Representative sample chosen by aggregation.
    pub chosen: TrialSuccess,
}

/// Receives one row per retained run, in execution order.
pub trait ResultSink: Send {
    fn accept(&mut self, row: RunRow) -> anyhow::Result<()>;

    /// Called once after the last run.
    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory sink. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<RunRow>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for MemorySink {
    fn accept(&mut self, row: RunRow) -> anyhow::Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.finished = true;
        Ok(())
    }
}
