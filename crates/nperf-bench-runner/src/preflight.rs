//! Reachability checks run before the first trial.

use nperf_bench_core::{BenchError, RoleTargets};
use std::path::Path;
use tracing::{error, info};

use crate::launcher::Launcher;

/// Probe every distinct target once. Any failure is fatal to the suite.
///
/// The local results directory is always prepared, remote targets are
/// probed in server, client order and each gets the results directory
/// created on its side.
pub async fn check_targets(
    launcher: &dyn Launcher,
    targets: &RoleTargets,
    results_dir: &Path,
) -> Result<(), BenchError> {
    tokio::fs::create_dir_all(results_dir).await?;

    for target in targets.remotes() {
        info!(target = %target, "checking remote target");
        if let Err(e) = launcher.probe(target, results_dir).await {
            error!(target = %target, error = %e, "remote target failed pre-flight check");
            return Err(e);
        }
    }
    Ok(())
}
