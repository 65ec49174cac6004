//! nperf-bench core
//!
//! Domain model for driving repeated nperf throughput trials:
//! - [`suite`]: expand a layered configuration into concrete runs
//! - [`params`]: tagged parameter values and their flag rendering
//! - [`target`]: local/remote execution targets
//! - [`record`]: measurement records and per-attempt outcomes
//! - [`aggregate`]: outlier-aware median selection

pub mod aggregate;
pub mod error;
pub mod params;
pub mod record;
pub mod suite;
pub mod target;
pub mod telemetry;

pub use aggregate::{Aggregator, Selection, DEFAULT_Z_SCORE_THRESHOLD};
pub use error::{BenchError, ConfigError, LaunchError, RecordError, Result};
pub use params::{ParamMap, ParamValue};
pub use record::{Measured, MeasurementRecord, Role, RunResult, TrialOutcome, TrialSuccess};
pub use suite::{RunSpec, TestSpec, TestSuite};
pub use target::{ExecutionTarget, RoleTargets};
pub use telemetry::init_tracing;
