//! Course upgrade: refreshes the test catalog, docs and baselines.
//!
//! Runs whenever the catalog reports the course as not ready, typically
//! after new course images were published.

use crate::orchestrator::Runner;
use crate::store::{ArtifactStore, StoreMode};
use gradebox_core::{Error, Result};
use tracing::{info, warn};

/// Stops retrying the upgrade after `max_failures` consecutive failures.
#[derive(Debug, Clone)]
pub struct UpgradeGate {
    max_failures: u32,
    failures: u32,
}

impl UpgradeGate {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            failures: 0,
        }
    }

    pub fn should_attempt(&self) -> bool {
        self.failures < self.max_failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Returns the number of consecutive failures.
    pub fn record_failure(&mut self) -> u32 {
        self.failures += 1;
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Runner {
    /// Rebuild the course and record reference runs as baselines.
    ///
    /// Returns the number of tests in the refreshed catalog. The course is
    /// only marked ready once every baseline was stored.
    pub async fn upgrade_course(&mut self) -> Result<usize> {
        let sandbox = self.deps.sandbox.clone();

        if self.settings.pull_images {
            info!("Pulling course images");
            sandbox.pull_images().await?;
        }

        let tests = sandbox.build_meta().await?;
        self.deps.catalog.update_tests(&tests).await?;
        info!(tests = tests.len(), "Test catalog updated");

        sandbox
            .build_docs(&self.settings.web_url, &self.settings.docs_url)
            .await?;
        info!("Docs built");

        let result = self.run_baselines().await;
        if let Err(e) = self.scratch.clear() {
            warn!(error = %e, "Failed to clear scratch directory");
        }
        let stored = result?;
        info!(baselines = stored, "Baselines stored");

        self.deps.catalog.set_ready(true).await?;
        Ok(tests.len())
    }

    async fn run_baselines(&mut self) -> Result<usize> {
        let sandbox = self.deps.sandbox.clone();
        self.scratch.clear()?;
        sandbox.build_baseline(&mut self.scratch).await?;

        let collected = tempfile::tempdir()?;
        let built = self.scratch.collect_artifacts(collected.path())?;
        if built.is_empty() {
            return Err(Error::ExecutionFailed(
                "baseline build produced no artifacts".to_string(),
            ));
        }

        let mut store = ArtifactStore::prepare(
            "baseline",
            built,
            self.deps.lookup.as_ref(),
            StoreMode::Baseline,
        )
        .await?;
        store
            .execute(sandbox.as_ref(), &mut self.scratch, &self.settings.policy)
            .await;

        let runs = store.baseline_runs()?;
        self.deps.lookup.submit_runs(&runs).await?;
        Ok(runs.len())
    }
}
