//! Suite expansion: layered configuration to concrete runs.
//!
//! The document has three tiers. Top-level `parameters` apply to every
//! run, a test's `parameters` apply to its runs, and each run carries a
//! `client` and `server` block. Later tiers override earlier ones.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ConfigError;
use crate::params::ParamMap;
use crate::record::Role;

/// Key holding shared parameters at the global and test tiers.
pub const PARAMETERS_KEY: &str = "parameters";

/// Key holding the repetition count at any tier.
pub const REPETITIONS_KEY: &str = "repetitions";

/// Repetitions used when no tier sets one.
pub const DEFAULT_REPETITIONS: u32 = 1;

/// A fully resolved run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSpec {
    pub run_name: String,
    pub repetitions: u32,
    pub client_params: ParamMap,
    pub server_params: ParamMap,
}

impl RunSpec {
    pub fn params(&self, role: Role) -> &ParamMap {
        match role {
            Role::Server => &self.server_params,
            Role::Client => &self.client_params,
        }
    }
}

/// A named test and its runs, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSpec {
    pub name: String,
    pub runs: Vec<RunSpec>,
}

/// Expanded suite. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSuite {
    pub tests: Vec<TestSpec>,
    /// SHA-256 over the resolved suite, hex encoded.
    pub digest: String,
}

impl TestSuite {
    /// Expand a configuration document.
    pub fn expand(document: &Value) -> Result<Self, ConfigError> {
        let root = document.as_object().ok_or(ConfigError::NotAnObject)?;

        let mut global = parameters_block("global", root.get(PARAMETERS_KEY))?;
        let global_reps = take_repetitions("global", &mut global)?;
        let global_params = ParamMap::from_json_object("global", &global)?;
        debug!(params = %global_params, "resolved global parameters");

        let mut tests = Vec::new();
        for (test_name, test_value) in root {
            if test_name == PARAMETERS_KEY {
                continue;
            }
            let test = expand_test(test_name, test_value, &global_params, global_reps)?;
            tests.push(test);
        }

        if tests.is_empty() {
            return Err(ConfigError::NoTests);
        }

        let digest = compute_suite_digest(&tests);
        Ok(Self { tests, digest })
    }

    /// Total number of runs across all tests.
    pub fn run_count(&self) -> usize {
        self.tests.iter().map(|t| t.runs.len()).sum()
    }

    /// First 12 characters of the digest.
    pub fn short_digest(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

fn expand_test(
    test_name: &str,
    test_value: &Value,
    global_params: &ParamMap,
    global_reps: Option<u32>,
) -> Result<TestSpec, ConfigError> {
    let test_obj = test_value.as_object().ok_or_else(|| ConfigError::InvalidTest {
        test: test_name.to_string(),
    })?;

    let scope = format!("test {}", test_name);
    let mut test_block = parameters_block(&scope, test_obj.get(PARAMETERS_KEY))?;
    let test_reps = take_repetitions(&scope, &mut test_block)?;
    let test_params = ParamMap::from_json_object(&scope, &test_block)?;

    let mut runs = Vec::new();
    for (run_name, run_value) in test_obj {
        if run_name == PARAMETERS_KEY {
            continue;
        }
        let run_obj = run_value.as_object().ok_or_else(|| ConfigError::InvalidRun {
            test: test_name.to_string(),
            run: run_name.to_string(),
        })?;

        let run_scope = format!("test {} run {}", test_name, run_name);
        let run_reps = match run_obj.get(REPETITIONS_KEY) {
            Some(value) => Some(parse_repetitions(&run_scope, value)?),
            None => None,
        };

        let client = role_block(test_name, run_name, run_obj, Role::Client)?;
        let server = role_block(test_name, run_name, run_obj, Role::Server)?;

        let run = RunSpec {
            run_name: run_name.clone(),
            repetitions: run_reps
                .or(test_reps)
                .or(global_reps)
                .unwrap_or(DEFAULT_REPETITIONS),
            client_params: ParamMap::layered(global_params, &[&test_params, &client]),
            server_params: ParamMap::layered(global_params, &[&test_params, &server]),
        };
        debug!(
            test = %test_name,
            run = %run.run_name,
            repetitions = run.repetitions,
            client = %run.client_params,
            server = %run.server_params,
            "resolved run"
        );
        runs.push(run);
    }

    Ok(TestSpec {
        name: test_name.to_string(),
        runs,
    })
}

fn parameters_block(scope: &str, value: Option<&Value>) -> Result<Map<String, Value>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(ConfigError::InvalidParameters {
            scope: scope.to_string(),
        }),
    }
}

fn take_repetitions(scope: &str, block: &mut Map<String, Value>) -> Result<Option<u32>, ConfigError> {
    match block.remove(REPETITIONS_KEY) {
        Some(value) => parse_repetitions(scope, &value).map(Some),
        None => Ok(None),
    }
}

fn parse_repetitions(scope: &str, value: &Value) -> Result<u32, ConfigError> {
    value
        .as_u64()
        .filter(|n| *n >= 1)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidRepetitions {
            scope: scope.to_string(),
            value: value.to_string(),
        })
}

fn role_block(
    test: &str,
    run: &str,
    run_obj: &Map<String, Value>,
    role: Role,
) -> Result<ParamMap, ConfigError> {
    let missing = || ConfigError::MissingRoleBlock {
        test: test.to_string(),
        run: run.to_string(),
        role,
    };
    let block = run_obj.get(role.as_str()).ok_or_else(missing)?;
    let scope = format!("test {} run {} {}", test, run, role);
    match block {
        Value::Object(map) => ParamMap::from_json_object(&scope, map),
        _ => Err(ConfigError::InvalidParameters { scope }),
    }
}

/// Deterministic digest over resolved test/run names and parameters.
fn compute_suite_digest(tests: &[TestSpec]) -> String {
    let mut hasher = Sha256::new();
    for test in tests {
        hasher.update(test.name.as_bytes());
        hasher.update(b"\0");
        for run in &test.runs {
            hasher.update(run.run_name.as_bytes());
            hasher.update(b"\0");
            hasher.update(run.repetitions.to_le_bytes());
            hasher.update(run.client_params.to_string().as_bytes());
            hasher.update(b"\0");
            hasher.update(run.server_params.to_string().as_bytes());
            hasher.update(b"\0");
        }
    }
    hex::encode(hasher.finalize())
}
