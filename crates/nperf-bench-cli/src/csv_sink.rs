//! CSV result sink: one row per retained run.
//!
//! Parameter columns depend on every run of the suite, so rows are
//! buffered and the file is written on [`ResultSink::finish`].

use anyhow::{Context, Result};
use csv::Writer;
use nperf_bench_core::{ParamMap, ParamValue, Role};
use nperf_bench_runner::{ResultSink, RunRow};
use std::path::{Path, PathBuf};
use tracing::info;

const FIXED_COLUMNS: [&str; 6] = [
    "test_name",
    "run_name",
    "suite_digest",
    "repetitions",
    "successful_repetitions",
    "kept_samples",
];

pub struct CsvSink {
    path: PathBuf,
    rows: Vec<RunRow>,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rows: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut wtr = Writer::from_path(&self.path)?;

        let client_keys = key_union(self.rows.iter().map(|r| &r.client_params));
        let server_keys = key_union(self.rows.iter().map(|r| &r.server_params));
        let field_names: Vec<String> = match self.rows.first() {
            Some(row) => row
                .chosen
                .server
                .columns()?
                .into_iter()
                .map(|(name, _)| name)
                .collect(),
            None => Vec::new(),
        };

        let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
        header.extend(client_keys.iter().map(|k| format!("{}.{}", Role::Client, k)));
        header.extend(server_keys.iter().map(|k| format!("{}.{}", Role::Server, k)));
        for role in [Role::Server, Role::Client] {
            header.extend(field_names.iter().map(|f| format!("{}.{}", role, f)));
        }
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![
                row.test_name.clone(),
                row.run_name.clone(),
                row.suite_digest.clone(),
                row.repetitions.to_string(),
                row.successful_repetitions.to_string(),
                row.kept_samples.to_string(),
            ];
            record.extend(client_keys.iter().map(|k| cell(row.client_params.get(k))));
            record.extend(server_keys.iter().map(|k| cell(row.server_params.get(k))));
            for measurement in [&row.chosen.server, &row.chosen.client] {
                record.extend(measurement.columns()?.into_iter().map(|(_, value)| value));
            }
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }
}

impl ResultSink for CsvSink {
    fn accept(&mut self, row: RunRow) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.write()
            .with_context(|| format!("failed to write results to {}", self.path.display()))?;
        info!(path = %self.path.display(), rows = self.rows.len(), "results written");
        Ok(())
    }
}

/// Keys of all maps in first-seen order.
fn key_union<'a>(maps: impl Iterator<Item = &'a ParamMap>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for map in maps {
        for key in map.keys() {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
    }
    keys
}

fn cell(value: Option<&ParamValue>) -> String {
    match value {
        None => String::new(),
        Some(ParamValue::Absent) => "false".to_string(),
        Some(ParamValue::Present) => "true".to_string(),
        Some(ParamValue::Value(v)) => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nperf_bench_core::{MeasurementRecord, TrialSuccess};

    fn row(run: &str, client: &[(&str, ParamValue)], rate: f64) -> RunRow {
        let mut client_params = ParamMap::new();
        for (k, v) in client {
            client_params.insert(*k, v.clone());
        }
        let mut server_params = ParamMap::new();
        server_params.insert("port", ParamValue::Value("45001".to_string()));
        RunRow {
            test_name: "gso".to_string(),
            run_name: run.to_string(),
            suite_digest: "abc".to_string(),
            repetitions: 3,
            successful_repetitions: 3,
            kept_samples: 2,
            discarded_samples: 1,
            client_params,
            server_params,
            chosen: TrialSuccess {
                server: MeasurementRecord {
                    data_rate_gbit: rate,
                    ..MeasurementRecord::default()
                },
                client: MeasurementRecord::default(),
            },
        }
    }

    #[test]
    fn test_header_is_union_of_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("results.csv");
        let mut sink = CsvSink::new(&path);

        sink.accept(row("off", &[("time", ParamValue::Value("10".into()))], 9.5))
            .unwrap();
        sink.accept(row(
            "on",
            &[
                ("with-gso", ParamValue::Present),
                ("time", ParamValue::Value("10".into())),
            ],
            12.25,
        ))
        .unwrap();
        sink.finish().unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(&header[..6], &FIXED_COLUMNS.map(String::from));
        assert_eq!(header[6], "client.time");
        assert_eq!(header[7], "client.with-gso");
        assert_eq!(header[8], "server.port");
        assert!(header.contains(&"server.data_rate_gbit".to_string()));
        assert!(header.contains(&"client.data_rate_gbit".to_string()));

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][1], "off");
        assert_eq!(&rows[0][7], "");
        assert_eq!(&rows[1][7], "true");

        let rate_col = header.iter().position(|h| h == "server.data_rate_gbit").unwrap();
        assert_eq!(&rows[1][rate_col], "12.25");
    }

    #[test]
    fn test_empty_suite_writes_fixed_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let mut sink = CsvSink::new(&path);
        sink.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents.trim_end(),
            "test_name,run_name,suite_digest,repetitions,successful_repetitions,kept_samples"
        );
    }
}
