//! Suite document and YAML wrapper loading.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use nperf_bench_core::{ExecutionTarget, RoleTargets, TestSuite};
use nperf_bench_runner::CoordinatorSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Results file name that asks for a generated, timestamped name.
pub const DEFAULT_RESULTS_FILE: &str = "test_results.csv";

pub const DEFAULT_NPERF_BIN: &str = "/opt/nperf/target/release/nperf";

pub const DEFAULT_RESULTS_DIR: &str = "results";

/// Read and expand a JSON suite document.
pub fn load_suite(path: &Path) -> Result<TestSuite> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&contents)
        .with_context(|| format!("config file {} is not valid JSON", path.display()))?;
    let suite = TestSuite::expand(&document)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(suite)
}

/// YAML wrapper document. Remote hosts can only be set here.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct WrapperConfig {
    pub nperf_bin: Option<PathBuf>,
    pub results_file: Option<String>,
    pub config_file: Option<PathBuf>,
    pub ssh_client: Option<String>,
    pub ssh_server: Option<String>,
    pub results_dir: Option<PathBuf>,
}

impl WrapperConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read wrapper file {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("invalid wrapper file {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

/// Fully resolved options of one `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchOptions {
    pub config_file: PathBuf,
    pub nperf_bin: PathBuf,
    pub results_dir: PathBuf,
    pub results_file: String,
    pub targets: RoleTargets,
}

impl BenchOptions {
    /// Options from command-line arguments. Both roles run locally.
    pub fn from_args(
        config_file: PathBuf,
        results_file: Option<&str>,
        nperf_bin: PathBuf,
        results_dir: PathBuf,
        now: DateTime<Local>,
    ) -> Self {
        let results_file = resolve_results_file(results_file, &config_file, now);
        Self {
            config_file,
            nperf_bin,
            results_dir,
            results_file,
            targets: RoleTargets::default(),
        }
    }

    /// Options from a wrapper document. Wrapper values take precedence
    /// over the command-line values passed in.
    pub fn from_wrapper(
        wrapper: WrapperConfig,
        nperf_bin: PathBuf,
        results_dir: PathBuf,
        now: DateTime<Local>,
    ) -> Result<Self> {
        let config_file = wrapper
            .config_file
            .context("wrapper file does not name a config_file")?;
        let results_file = resolve_results_file(wrapper.results_file.as_deref(), &config_file, now);
        Ok(Self {
            config_file,
            nperf_bin: wrapper.nperf_bin.unwrap_or(nperf_bin),
            results_dir: wrapper.results_dir.unwrap_or(results_dir),
            results_file,
            targets: RoleTargets {
                server: ExecutionTarget::from_host(wrapper.ssh_server),
                client: ExecutionTarget::from_host(wrapper.ssh_client),
            },
        })
    }

    /// Where the per-run CSV is written.
    pub fn results_path(&self) -> PathBuf {
        self.results_dir.join(&self.results_file)
    }

    /// Stem shared by record files and failure logs.
    pub fn output_stem(&self) -> String {
        Path::new(&self.results_file)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.results_file.clone())
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            executable: self.nperf_bin.clone(),
            results_dir: self.results_dir.clone(),
            output_stem: self.output_stem(),
            targets: self.targets.clone(),
            ..CoordinatorSettings::default()
        }
    }
}

/// Explicit names are kept; the default name becomes
/// `<config-stem>-<MM-DD-HH:MM>.csv`.
pub fn resolve_results_file(requested: Option<&str>, config_file: &Path, now: DateTime<Local>) -> String {
    match requested {
        Some(name) if name != DEFAULT_RESULTS_FILE => name.to_string(),
        _ => {
            let stem = config_file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "results".to_string());
            format!("{}-{}.csv", stem, now.format("%m-%d-%H:%M"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 18, 9, 5, 0).unwrap()
    }

    #[test]
    fn test_default_results_file_is_timestamped() {
        let name = resolve_results_file(None, Path::new("configs/gso.json"), now());
        assert_eq!(name, "gso-10-18-09:05.csv");

        let name = resolve_results_file(Some(DEFAULT_RESULTS_FILE), Path::new("gso.json"), now());
        assert_eq!(name, "gso-10-18-09:05.csv");
    }

    #[test]
    fn test_explicit_results_file_kept() {
        let name = resolve_results_file(Some("nightly.csv"), Path::new("gso.json"), now());
        assert_eq!(name, "nightly.csv");
    }

    #[test]
    fn test_wrapper_overrides_and_targets() {
        let wrapper = WrapperConfig::from_yaml_str(
            "nperf_bin: /usr/local/bin/nperf\n\
             config_file: configs/gro.json\n\
             ssh_server: bench-srv\n\
             ssh_client: bench-cli\n",
        )
        .unwrap();
        let options = BenchOptions::from_wrapper(
            wrapper,
            PathBuf::from(DEFAULT_NPERF_BIN),
            PathBuf::from(DEFAULT_RESULTS_DIR),
            now(),
        )
        .unwrap();

        assert_eq!(options.nperf_bin, PathBuf::from("/usr/local/bin/nperf"));
        assert_eq!(options.results_dir, PathBuf::from("results"));
        assert_eq!(options.results_file, "gro-10-18-09:05.csv");
        assert_eq!(options.targets.server.host(), Some("bench-srv"));
        assert_eq!(options.targets.client.host(), Some("bench-cli"));
        assert_eq!(options.output_stem(), "gro-10-18-09:05");
    }

    #[test]
    fn test_wrapper_requires_config_file() {
        let wrapper = WrapperConfig::from_yaml_str("ssh_server: bench-srv\n").unwrap();
        let err = BenchOptions::from_wrapper(wrapper, PathBuf::new(), PathBuf::new(), now()).unwrap_err();
        assert!(err.to_string().contains("config_file"));
    }

    #[test]
    fn test_args_run_locally() {
        let options = BenchOptions::from_args(
            PathBuf::from("gso.json"),
            Some("out.csv"),
            PathBuf::from("nperf"),
            PathBuf::from("/tmp/res"),
            now(),
        );
        assert_eq!(options.targets, RoleTargets::default());
        assert_eq!(options.results_path(), PathBuf::from("/tmp/res/out.csv"));

        let settings = options.coordinator_settings();
        assert_eq!(settings.output_stem, "out");
        assert_eq!(settings.max_attempts, 3);
    }

    #[test]
    fn test_load_suite_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_suite(&path).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_load_suite_expands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        std::fs::write(
            &path,
            r#"{"t": {"r": {"client": {"time": 1}, "server": {}}}}"#,
        )
        .unwrap();
        let suite = load_suite(&path).unwrap();
        assert_eq!(suite.run_count(), 1);
    }
}
