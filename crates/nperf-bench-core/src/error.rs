//! Error taxonomy for benchmark orchestration.

use crate::record::Role;

/// Errors produced while expanding a suite configuration.
///
/// Every variant is fatal: the suite is rejected before any process starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration document must be an object")]
    NotAnObject,

    #[error("configuration defines no tests")]
    NoTests,

    #[error("test {test}: expected an object")]
    InvalidTest { test: String },

    #[error("test {test} run {run}: expected an object")]
    InvalidRun { test: String, run: String },

    #[error("test {test} run {run}: missing {role} block")]
    MissingRoleBlock {
        test: String,
        run: String,
        role: Role,
    },

    #[error("{scope}: parameters must be an object")]
    InvalidParameters { scope: String },

    #[error("{scope}: repetitions must be a positive integer, got {value}")]
    InvalidRepetitions { scope: String, value: String },

    #[error("{scope}: parameter {key} has unsupported value {value}")]
    UnsupportedValue {
        scope: String,
        key: String,
        value: String,
    },
}

/// Errors produced while starting a role process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("{role} command line is empty")]
    EmptyCommand { role: Role },

    #[error("failed to spawn {role} process: {source}")]
    Spawn {
        role: Role,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced while reading a measurement record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("measurement record at {path} could not be read: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("measurement record at {path} has no data rows")]
    Empty { path: String },

    #[error("measurement record parse error: {0}")]
    Csv(#[from] csv::Error),
}

/// Umbrella error for orchestration.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("record error: {0}")]
    Record(#[from] RecordError),

    #[error("insufficient data: {usable} usable measurement(s) out of {total}")]
    InsufficientData { usable: usize, total: usize },

    #[error("remote target {host} is unreachable: {reason}")]
    UnreachableTarget { host: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRoleBlock {
            test: "mtu".to_string(),
            run: "1472".to_string(),
            role: Role::Server,
        };
        let msg = err.to_string();
        assert!(msg.contains("mtu"));
        assert!(msg.contains("1472"));
        assert!(msg.contains("server"));
    }

    #[test]
    fn test_config_error_wraps_into_bench_error() {
        let err: BenchError = ConfigError::NoTests.into();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[test]
    fn test_insufficient_data_display() {
        let err = BenchError::InsufficientData {
            usable: 0,
            total: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("0 usable"));
        assert!(msg.contains("out of 3"));
    }

    #[test]
    fn test_unreachable_target_display() {
        let err = BenchError::UnreachableTarget {
            host: "bench-02".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("bench-02"));
        assert!(err.to_string().contains("connection refused"));
    }
}
