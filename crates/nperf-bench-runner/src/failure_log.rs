//! Per-role diagnostic log for failed attempts.

use anyhow::Context;
use chrono::Utc;
use nperf_bench_core::{ParamMap, Role};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Appends diagnostic output of failed roles to `<dir>/<role>-<stem>.log`.
#[derive(Debug, Clone)]
pub struct FailureLog {
    dir: PathBuf,
    stem: String,
}

impl FailureLog {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    /// Log file of one role.
    pub fn path(&self, role: Role) -> PathBuf {
        self.dir.join(format!("{}-{}.log", role, self.stem))
    }

    /// Append one entry tagged with the owning test and run.
    pub async fn append(
        &self,
        role: Role,
        test: &str,
        run: &str,
        params: &ParamMap,
        diagnostics: &str,
    ) -> anyhow::Result<PathBuf> {
        let path = self.path(role);
        let entry = format_entry(test, run, params, diagnostics);
        append_to(&path, &entry)
            .await
            .with_context(|| format!("failed to append to {}", path.display()))?;
        Ok(path)
    }
}

fn format_entry(test: &str, run: &str, params: &ParamMap, diagnostics: &str) -> String {
    let mut entry = format!(
        "Test: {} Run: {} At: {}\nConfig: {}\n{}",
        test,
        run,
        Utc::now().to_rfc3339(),
        params,
        diagnostics
    );
    if !entry.ends_with('\n') {
        entry.push('\n');
    }
    entry
}

async fn append_to(path: &Path, entry: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(entry.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use nperf_bench_core::ParamValue;

    #[test]
    fn test_log_path_per_role() {
        let log = FailureLog::new("results", "gso-10-18-12:00");
        assert_eq!(
            log.path(Role::Server),
            PathBuf::from("results/server-gso-10-18-12:00.log")
        );
        assert_eq!(
            log.path(Role::Client),
            PathBuf::from("results/client-gso-10-18-12:00.log")
        );
    }

    #[test]
    fn test_entry_format() {
        let mut params = ParamMap::new();
        params.insert("port", ParamValue::Value("45001".to_string()));
        let entry = format_entry("gso", "on", &params, "bind failed");
        assert!(entry.starts_with("Test: gso Run: on At: "));
        assert!(entry.contains("\nConfig: --port 45001\n"));
        assert!(entry.ends_with("bind failed\n"));
    }

    #[tokio::test]
    async fn test_append_accumulates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = FailureLog::new(dir.path(), "suite");

        log.append(Role::Server, "t", "r1", &ParamMap::new(), "first\n")
            .await
            .expect("append");
        let path = log
            .append(Role::Server, "t", "r2", &ParamMap::new(), "second")
            .await
            .expect("append");

        let contents = std::fs::read_to_string(path).expect("read");
        assert!(contents.contains("Run: r1"));
        assert!(contents.contains("first\n"));
        assert!(contents.contains("Run: r2"));
        assert!(contents.ends_with("second\n"));
        assert!(!log.path(Role::Client).exists());
    }
}
