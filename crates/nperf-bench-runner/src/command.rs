//! Role command lines for the workload binary.

use nperf_bench_core::{ExecutionTarget, ParamMap, Role};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Output-format selector making the workload persist its own record.
pub const OUTPUT_FORMAT_FLAG: &str = "--output-format=file";

/// Log filter forced on the workload so diagnostics stay out of its output.
pub const WORKLOAD_LOG_LEVEL: &str = "error";

/// Agent socket forwarded to remote transports.
pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

/// Everything needed to start one role of one attempt.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Invocation {
    /// Role to start.
    pub role: Role,

    /// Path to the workload binary on the target host.
    pub executable: PathBuf,

    /// Resolved parameters for this role.
    pub params: ParamMap,

    /// Where the process runs.
    pub target: ExecutionTarget,

    /// Test label passed through to the record.
    pub test_label: String,

    /// Run label passed through to the record.
    pub run_label: String,

    /// Where the workload writes its measurement record.
    pub record_path: PathBuf,
}

impl Invocation {
    /// Workload command line before any remote wrapping.
    pub fn workload_argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.executable.to_string_lossy().to_string(),
            self.role.as_str().to_string(),
            OUTPUT_FORMAT_FLAG.to_string(),
            format!("--output-file-path={}", self.record_path.display()),
            format!("--label-test={}", self.test_label),
            format!("--label-run={}", self.run_label),
        ];
        argv.extend(self.params.to_flags());
        argv
    }

    /// Command line actually spawned. Remote servers run under `sudo`.
    pub fn command_line(&self) -> Vec<String> {
        self.target
            .wrap(&self.workload_argv(), self.role == Role::Server)
    }

    /// Environment overrides for the spawned process.
    pub fn environment(&self) -> Vec<(String, String)> {
        environment_with(std::env::var(SSH_AUTH_SOCK).ok())
    }
}

fn environment_with(auth_sock: Option<String>) -> Vec<(String, String)> {
    let mut env = vec![("RUST_LOG".to_string(), WORKLOAD_LOG_LEVEL.to_string())];
    if let Some(sock) = auth_sock {
        env.push((SSH_AUTH_SOCK.to_string(), sock));
    }
    env
}

/// Record path for one role of one attempt.
///
/// `<dir>/<role>-<stem>-<test>-<run>-r<repetition>-a<attempt>.csv`
pub fn record_path(
    dir: &Path,
    stem: &str,
    role: Role,
    test: &str,
    run: &str,
    repetition: u32,
    attempt: u32,
) -> PathBuf {
    dir.join(format!(
        "{}-{}-{}-{}-r{}-a{}.csv",
        role,
        sanitize(stem),
        sanitize(test),
        sanitize(run),
        repetition,
        attempt
    ))
}

/// Replace characters that are awkward in file names.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
