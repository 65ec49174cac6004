//! Measurement records and per-attempt trial outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

use crate::error::RecordError;

/// One of the two cooperating workload processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Server,
    Client,
}

impl Role {
    /// Subcommand understood by the workload binary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record persisted by the workload binary for one role of one attempt.
///
/// Column names follow the workload's CSV header. Absent columns default
/// so that records from older binaries still parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeasurementRecord {
    pub label_test: Option<String>,
    pub label_run: Option<String>,
    pub amount_threads: u64,
    pub amount_used_ports: u64,
    /// Seconds.
    pub test_runtime_length: f64,
    pub datagram_size: u64,
    pub packet_buffer_size: u64,
    pub exchange_function: String,
    pub io_model: String,
    pub total_data_gbyte: f64,
    pub amount_datagrams: u64,
    pub amount_data_bytes: u64,
    pub amount_reordered_datagrams: u64,
    pub amount_duplicated_datagrams: u64,
    pub amount_omitted_datagrams: i64,
    pub amount_syscalls: u64,
    pub data_rate_gbit: f64,
    pub packet_loss: f64,
    pub nonblocking: bool,
    pub ip_fragmentation: bool,
    pub gso: bool,
    pub gro: bool,
}

impl MeasurementRecord {
    /// Parse a CSV record. When the file holds several rows the last one wins.
    pub fn from_csv<R: Read>(path: &str, reader: R) -> Result<Self, RecordError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut last = None;
        for row in rdr.deserialize::<MeasurementRecord>() {
            last = Some(row?);
        }
        last.ok_or_else(|| RecordError::Empty {
            path: path.to_string(),
        })
    }

    /// Flatten into `(column, value)` pairs in declaration order.
    pub fn columns(&self) -> Result<Vec<(String, String)>, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let mut columns = Vec::new();
        if let serde_json::Value::Object(fields) = value {
            for (key, field) in fields {
                let rendered = match field {
                    serde_json::Value::Null => String::new(),
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                columns.push((key, rendered));
            }
        }
        Ok(columns)
    }
}

/// Both records of a successful attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialSuccess {
    pub server: MeasurementRecord,
    pub client: MeasurementRecord,
}

/// Scalar a sample is ranked by during aggregation.
pub trait Measured {
    fn metric(&self) -> f64;
}

impl Measured for f64 {
    fn metric(&self) -> f64 {
        *self
    }
}

impl Measured for TrialSuccess {
    /// Receiver-side throughput in Gbit/s.
    fn metric(&self) -> f64 {
        self.server.data_rate_gbit
    }
}

/// Outcome of one attempt. Created once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Success(TrialSuccess),
    ProcessError { role: Role, stderr: String },
    Timeout { role: Role },
    Incomplete { reason: String },
    LaunchFailed { role: Role, reason: String },
}

impl TrialOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TrialOutcome::Success(_))
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            TrialOutcome::Success(_) => "succeeded",
            TrialOutcome::ProcessError { .. } => "failed",
            TrialOutcome::Timeout { .. } => "timed_out",
            TrialOutcome::Incomplete { .. } => "incomplete",
            TrialOutcome::LaunchFailed { .. } => "launch_failed",
        }
    }
}

/// Retained result of a run after aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Chosen {
        outcome: TrialSuccess,
        kept_samples: usize,
        discarded_samples: usize,
    },
    NoSuccessfulAttempt,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "label_test,label_run,amount_threads,amount_used_ports,test_runtime_length,datagram_size,packet_buffer_size,exchange_function,io_model,total_data_gbyte,amount_datagrams,amount_data_bytes,amount_reordered_datagrams,amount_duplicated_datagrams,amount_omitted_datagrams,amount_syscalls,data_rate_gbit,packet_loss,nonblocking,ip_fragmentation,gso,gro";

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Server.as_str(), "server");
        assert_eq!(Role::Client.to_string(), "client");
    }

    #[test]
    fn test_parse_full_record() {
        let csv = format!(
            "{}\nmtu,1472,1,1,10.0,1472,1472,normal,select,11.5,8400000,12364800000,3,0,12,8400000,9.2,0.01,true,false,false,false\n",
            HEADER
        );
        let record = MeasurementRecord::from_csv("server.csv", csv.as_bytes()).unwrap();
        assert_eq!(record.label_test.as_deref(), Some("mtu"));
        assert_eq!(record.datagram_size, 1472);
        assert_eq!(record.exchange_function, "normal");
        assert_eq!(record.amount_omitted_datagrams, 12);
        assert!((record.data_rate_gbit - 9.2).abs() < f64::EPSILON);
        assert!(record.nonblocking);
        assert!(!record.gso);
    }

    #[test]
    fn test_parse_partial_record_defaults() {
        let csv = "data_rate_gbit,packet_loss\n4.5,0.2\n";
        let record = MeasurementRecord::from_csv("client.csv", csv.as_bytes()).unwrap();
        assert!((record.data_rate_gbit - 4.5).abs() < f64::EPSILON);
        assert_eq!(record.amount_threads, 0);
        assert!(record.label_run.is_none());
    }

    #[test]
    fn test_parse_takes_last_row() {
        let csv = "data_rate_gbit\n1.0\n2.0\n3.0\n";
        let record = MeasurementRecord::from_csv("r.csv", csv.as_bytes()).unwrap();
        assert!((record.data_rate_gbit - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_empty_record() {
        let err = MeasurementRecord::from_csv("r.csv", HEADER.as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::Empty { .. }));
    }

    #[test]
    fn test_parse_malformed_record() {
        let csv = "data_rate_gbit\nfast\n";
        let err = MeasurementRecord::from_csv("r.csv", csv.as_bytes()).unwrap_err();
        assert!(matches!(err, RecordError::Csv(_)));
    }

    #[test]
    fn test_columns_follow_declaration_order() {
        let record = MeasurementRecord {
            data_rate_gbit: 7.25,
            io_model: "poll".to_string(),
            ..Default::default()
        };
        let columns = record.columns().unwrap();
        assert_eq!(columns[0], ("label_test".to_string(), String::new()));
        assert_eq!(columns[2].0, "amount_threads");
        let rate = columns.iter().find(|(k, _)| k == "data_rate_gbit").unwrap();
        assert_eq!(rate.1, "7.25");
        let io = columns.iter().find(|(k, _)| k == "io_model").unwrap();
        assert_eq!(io.1, "poll");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(TrialOutcome::Timeout { role: Role::Server }.label(), "timed_out");
        assert_eq!(
            TrialOutcome::Incomplete {
                reason: "no record".to_string()
            }
            .label(),
            "incomplete"
        );
        let success = TrialOutcome::Success(TrialSuccess {
            server: MeasurementRecord::default(),
            client: MeasurementRecord::default(),
        });
        assert!(success.is_success());
        assert_eq!(success.label(), "succeeded");
    }

    #[test]
    fn test_trial_metric_uses_server_rate() {
        let trial = TrialSuccess {
            server: MeasurementRecord {
                data_rate_gbit: 8.0,
                ..Default::default()
            },
            client: MeasurementRecord {
                data_rate_gbit: 9.5,
                ..Default::default()
            },
        };
        assert!((trial.metric() - 8.0).abs() < f64::EPSILON);
    }
}
