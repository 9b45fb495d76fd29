//! Runner loop: claims one task per tick and grades it.
//!
//! A tick first makes sure the course is set up (see [`crate::upgrade`]),
//! then claims at most one task, builds the submitted tests, resolves every
//! artifact through the [`ArtifactStore`] and reports the stages back to the
//! queue and the code host.

use crate::dispatch;
use crate::store::{ArtifactStore, StoreMode};
use crate::ticker::Ticker;
use crate::upgrade::UpgradeGate;
use gradebox_config::GradeboxConfig;
use gradebox_core::baseline::BaselinePolicy;
use gradebox_core::catalog::CourseCatalog;
use gradebox_core::check::{CodeHost, Conclusion};
use gradebox_core::run::ResultLookup;
use gradebox_core::sandbox::Sandbox;
use gradebox_core::scratch::ScratchDir;
use gradebox_core::storage::ObjectStore;
use gradebox_core::task::{ClaimedTask, FinishOutcome, TaskQueue};
use gradebox_core::{Result, Stage, TaskId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Collaborators the runner talks to.
#[derive(Clone)]
pub struct RunnerDeps {
    pub queue: Arc<dyn TaskQueue>,
    pub sandbox: Arc<dyn Sandbox>,
    pub lookup: Arc<dyn ResultLookup>,
    pub catalog: Arc<dyn CourseCatalog>,
    pub code_host: Arc<dyn CodeHost>,
    pub objects: Arc<dyn ObjectStore>,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub poll_interval: Duration,
    /// Lifetime of the archive URL handed to the builder.
    pub presign_ttl: Duration,
    pub policy: BaselinePolicy,
    pub pull_images: bool,
    pub web_url: String,
    pub docs_url: String,
    pub max_upgrade_failures: u32,
}

/// The settings of a default configuration.
impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&GradeboxConfig::default())
    }
}

impl RunnerSettings {
    pub fn from_config(config: &GradeboxConfig) -> Self {
        Self {
            poll_interval: config.runner.poll_interval,
            presign_ttl: config.storage.presign_ttl,
            policy: config.baseline,
            pull_images: config.images.pull,
            web_url: config.runner.web_url.clone(),
            docs_url: config.runner.docs_url.clone(),
            max_upgrade_failures: config.upgrade.max_failures,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to claim.
    Idle,
    Processed {
        task: TaskId,
        conclusion: Conclusion,
        outcome: FinishOutcome,
    },
    /// Course set up with this many tests.
    Upgraded { tests: usize },
    /// Course setup failed; `attempts` consecutive failures so far.
    UpgradeFailed { attempts: u32 },
}

pub struct Runner {
    pub(crate) deps: RunnerDeps,
    pub(crate) settings: RunnerSettings,
    pub(crate) scratch: ScratchDir,
    pub(crate) gate: UpgradeGate,
}

impl Runner {
    pub fn new(deps: RunnerDeps, settings: RunnerSettings, scratch: ScratchDir) -> Self {
        let gate = UpgradeGate::new(settings.max_upgrade_failures);
        Self {
            deps,
            settings,
            scratch,
            gate,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Poll until `shutdown` resolves. A tick in progress always completes.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        info!(
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Starting runner"
        );
        let mut ticker = Ticker::new(self.settings.poll_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(TickOutcome::Idle) => {}
                Ok(outcome) => info!(?outcome, "Tick finished"),
                Err(e) => error!(error = %e, "Tick failed"),
            }
        }

        info!("Runner stopped");
    }

    /// Set the course up if needed, then grade at most one task.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if !self.deps.catalog.is_ready().await? {
            if self.gate.should_attempt() {
                return Ok(match self.upgrade_course().await {
                    Ok(tests) => {
                        self.gate.record_success();
                        info!(tests, "Course upgraded");
                        TickOutcome::Upgraded { tests }
                    }
                    Err(e) => {
                        let attempts = self.gate.record_failure();
                        error!(error = %e, attempts, "Course upgrade failed");
                        TickOutcome::UpgradeFailed { attempts }
                    }
                });
            }
            warn!("Course is not ready, grading without a fresh upgrade");
        } else {
            self.gate.reset();
        }

        let Some(task) = self.deps.queue.dequeue().await? else {
            return Ok(TickOutcome::Idle);
        };
        self.process(task).await
    }

    /// Grade a claimed task and report its stages.
    pub async fn process(&mut self, task: ClaimedTask) -> Result<TickOutcome> {
        let reference = task.reference();
        info!(task = %reference, id = %task.id, "Processing task");

        if let Err(e) = dispatch::start_check_run(self.deps.code_host.as_ref(), &task).await {
            warn!(task = %reference, error = %e, "Failed to mark check run in progress");
        }

        let mut stages = Vec::new();
        if let Err(e) = self.grade(&task, &mut stages).await {
            error!(task = %reference, error = %e, "Grading failed");
            stages.push(Stage::system_error(None));
        }
        if let Err(e) = self.scratch.clear() {
            warn!(task = %reference, error = %e, "Failed to clear scratch directory");
        }

        let conclusion = Conclusion::from_stages(&stages);
        let outcome = self.deps.queue.finish(task.id, task.claim_id, &stages).await?;
        match outcome {
            FinishOutcome::Finished => {
                let completed =
                    dispatch::complete_check_run(self.deps.code_host.as_ref(), &task, &stages)
                        .await;
                if let Err(e) = completed {
                    error!(task = %reference, error = %e, "Failed to complete check run");
                }
                info!(task = %reference, ?conclusion, stages = stages.len(), "Task finished");
            }
            FinishOutcome::AlreadyChecked | FinishOutcome::Superseded => {
                warn!(task = %reference, ?outcome, "Results discarded");
            }
        }

        Ok(TickOutcome::Processed {
            task: task.id,
            conclusion,
            outcome,
        })
    }

    async fn grade(&mut self, task: &ClaimedTask, stages: &mut Vec<Stage>) -> Result<()> {
        let reference = task.reference();
        let url = dispatch::publish_archive(
            self.deps.code_host.as_ref(),
            self.deps.objects.as_ref(),
            task,
            self.settings.presign_ttl,
        )
        .await?;

        let report = self.deps.sandbox.build_tests(&url, &mut self.scratch).await;
        info!(task = %reference, exit_code = ?report.exit_code, "Tests built");
        stages.extend(report.stages);

        // Artifacts run even when some builds failed.
        let collected = tempfile::tempdir()?;
        let built = self.scratch.collect_artifacts(collected.path())?;
        let mut store = ArtifactStore::prepare(
            reference.as_str(),
            built,
            self.deps.lookup.as_ref(),
            StoreMode::Grading,
        )
        .await?;

        for stage in stages.iter_mut() {
            if let Some(test) = stage.built_test() {
                if store.is_cached(test) {
                    stage.cached = true;
                }
            }
        }

        store
            .execute(
                self.deps.sandbox.as_ref(),
                &mut self.scratch,
                &self.settings.policy,
            )
            .await;
        stages.extend(store.stages(&self.settings.policy));

        let fresh = store.fresh_runs();
        if !fresh.is_empty() {
            if let Err(e) = self.deps.lookup.submit_runs(&fresh).await {
                warn!(task = %reference, error = %e, "Failed to cache runs");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeCatalog, FakeCodeHost, FakeLookup, FakeObjectStore, FakeQueue, FakeSandbox,
    };
    use gradebox_core::check::CheckStatus;
    use gradebox_core::run::{Run, RunStatus};
    use gradebox_core::sandbox::BuildReport;
    use gradebox_core::scratch::hash_file;
    use gradebox_core::stage::SYSTEM_ERROR_MESSAGE;
    use tempfile::TempDir;

    struct Harness {
        queue: Arc<FakeQueue>,
        sandbox: Arc<FakeSandbox>,
        lookup: Arc<FakeLookup>,
        catalog: Arc<FakeCatalog>,
        code_host: Arc<FakeCodeHost>,
        objects: Arc<FakeObjectStore>,
        _dir: TempDir,
        runner: Runner,
    }

    fn claimed() -> ClaimedTask {
        ClaimedTask {
            id: TaskId::new(),
            claim_id: uuid::Uuid::now_v7(),
            commit_id: 7,
            login: "alice".to_string(),
            repository: "stdlib".to_string(),
            commit: "abc123".to_string(),
            installation_id: 42,
            check_run_id: 1001,
        }
    }

    fn harness(
        queue: FakeQueue,
        sandbox: FakeSandbox,
        lookup: FakeLookup,
        catalog: FakeCatalog,
        code_host: FakeCodeHost,
    ) -> Harness {
        let queue = Arc::new(queue);
        let sandbox = Arc::new(sandbox);
        let lookup = Arc::new(lookup);
        let catalog = Arc::new(catalog);
        let code_host = Arc::new(code_host);
        let objects = Arc::new(FakeObjectStore::default());
        let dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchDir::new(dir.path().join("scratch"), "gradebox-data");
        scratch.clear().unwrap();

        let deps = RunnerDeps {
            queue: queue.clone(),
            sandbox: sandbox.clone(),
            lookup: lookup.clone(),
            catalog: catalog.clone(),
            code_host: code_host.clone(),
            objects: objects.clone(),
        };
        let settings = RunnerSettings {
            poll_interval: Duration::from_millis(10),
            presign_ttl: Duration::from_secs(600),
            web_url: "https://course.test".to_string(),
            docs_url: "https://docs.test".to_string(),
            ..Default::default()
        };
        Harness {
            queue,
            sandbox,
            lookup,
            catalog,
            code_host,
            objects,
            _dir: dir,
            runner: Runner::new(deps, settings, scratch),
        }
    }

    fn build_ok(tests: &[&str]) -> BuildReport {
        BuildReport {
            exit_code: Some(0),
            stages: tests
                .iter()
                .map(|t| Stage::new(format!("build::{}", t), RunStatus::Success))
                .collect(),
        }
    }

    fn baseline_run(test: &str, score: u64) -> Run {
        let mut run = Run::new(format!("ref-{}", test), test, RunStatus::Success).with_score(score);
        run.baseline = true;
        run
    }

    fn hash_of(content: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, content).unwrap();
        hash_file(&path).unwrap()
    }

    #[test]
    fn test_default_settings_match_default_config() {
        let settings = RunnerSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(3));
        assert_eq!(settings.presign_ttl, Duration::from_secs(600));
        assert_eq!(settings.max_upgrade_failures, 3);
        assert!(!settings.pull_images);
    }

    #[tokio::test]
    async fn test_stale_claim_does_not_complete_check_run() {
        let current = claimed();
        let stale = ClaimedTask {
            claim_id: uuid::Uuid::now_v7(),
            ..current.clone()
        };
        let sandbox = FakeSandbox::default().with_build(build_ok(&[]), &[]);
        let mut h = harness(
            FakeQueue::default().with_task(current),
            sandbox,
            FakeLookup::default(),
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );

        let outcome = h.runner.process(stale).await.unwrap();

        assert!(matches!(
            outcome,
            TickOutcome::Processed {
                outcome: FinishOutcome::Superseded,
                ..
            }
        ));
        assert!(h.queue.finished().is_empty());
        let updates = h.code_host.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CheckStatus::InProgress);
    }

    #[tokio::test]
    async fn test_grades_claimed_task() {
        let sandbox = FakeSandbox::default()
            .with_build(build_ok(&["sum"]), &[("sum", "sum-binary")])
            .with_perf("sum", 950);
        let lookup = FakeLookup::default()
            .with_run(baseline_run("sum", 1000));
        let mut h = harness(
            FakeQueue::default().with_task(claimed()),
            sandbox,
            lookup,
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );

        let outcome = h.runner.tick().await.unwrap();

        let TickOutcome::Processed {
            conclusion,
            outcome,
            ..
        } = outcome
        else {
            panic!("expected a processed task, got {:?}", outcome);
        };
        assert_eq!(conclusion, Conclusion::Success);
        assert_eq!(outcome, FinishOutcome::Finished);

        assert_eq!(h.objects.keys(), vec!["alice/stdlib/abc123.zip"]);
        assert_eq!(
            h.sandbox.calls(),
            vec![
                "build:https://s3.test/alice/stdlib/abc123.zip?expires=600",
                "unit:sum",
                "perf:sum",
            ]
        );

        let finished = h.queue.finished();
        assert_eq!(finished.len(), 1);
        let names: Vec<&str> = finished[0].1.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build::sum", "test::sum"]);
        assert!(finished[0].1[1].output.contains("95.0%"));

        let submitted = h.lookup.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].score, 950);
        assert!(!submitted[0].baseline);

        let updates = h.code_host.updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].status, CheckStatus::InProgress);
        assert_eq!(updates[1].status, CheckStatus::Completed);
        assert_eq!(updates[1].conclusion, Some(Conclusion::Success));
        assert_eq!(updates[1].output.as_ref().unwrap().title, "Success");
    }

    #[tokio::test]
    async fn test_idle_without_tasks() {
        let mut h = harness(
            FakeQueue::default(),
            FakeSandbox::default(),
            FakeLookup::default(),
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );
        assert_eq!(h.runner.tick().await.unwrap(), TickOutcome::Idle);
        assert!(h.sandbox.calls().is_empty());
    }

    #[tokio::test]
    async fn test_archive_failure_reports_system_error() {
        let mut h = harness(
            FakeQueue::default().with_task(claimed()),
            FakeSandbox::default(),
            FakeLookup::default(),
            FakeCatalog::ready(),
            FakeCodeHost::failing_archive(),
        );

        h.runner.tick().await.unwrap();

        let finished = h.queue.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].1, vec![Stage::system_error(None)]);
        assert!(h.sandbox.calls().is_empty());

        let updates = h.code_host.updates();
        let completed = updates.last().unwrap();
        assert_eq!(completed.conclusion, Some(Conclusion::Failure));
        let output = completed.output.as_ref().unwrap();
        assert_eq!(output.title, "Failed: system");
        assert!(output.summary.contains(SYSTEM_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_cached_artifacts_are_marked_and_not_rerun() {
        let content = "sum-binary";
        let cached = Run::new(hash_of(content), "other", RunStatus::Success).with_score(900);
        let lookup = FakeLookup::default()
            .with_run(cached)
            .with_run(baseline_run("sum", 1000));
        let sandbox = FakeSandbox::default()
            .with_build(build_ok(&["sum", "sort"]), &[("sum", content), ("sort", "sort-binary")])
            .with_failure("sort", "FAIL: TestSort");
        let mut h = harness(
            FakeQueue::default().with_task(claimed()),
            sandbox,
            lookup,
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );

        h.runner.tick().await.unwrap();

        assert!(!h.sandbox.calls().contains(&"unit:sum".to_string()));
        assert!(h.sandbox.calls().contains(&"unit:sort".to_string()));

        let stages = &h.queue.finished()[0].1;
        let by_name = |name: &str| stages.iter().find(|s| s.name == name).unwrap();
        assert!(by_name("build::sum").cached);
        assert!(!by_name("build::sort").cached);
        assert!(by_name("test::sum").cached);
        assert_eq!(by_name("test::sort").status, RunStatus::Failure);

        let update = h.code_host.updates().pop().unwrap();
        assert_eq!(update.conclusion, Some(Conclusion::Failure));
        assert_eq!(update.output.unwrap().title, "Failed: test::sort");

        let submitted: Vec<String> = h.lookup.submitted().into_iter().map(|r| r.test).collect();
        assert_eq!(submitted, vec!["sort"]);
    }

    #[tokio::test]
    async fn test_failed_build_still_runs_artifacts() {
        let report = BuildReport {
            exit_code: Some(2),
            stages: vec![
                Stage::new("build::sum", RunStatus::Success),
                Stage::new("build::sort", RunStatus::Failure).with_output("syntax error"),
            ],
        };
        let sandbox = FakeSandbox::default()
            .with_build(report, &[("sum", "sum-binary")])
            .with_perf("sum", 1000);
        let lookup = FakeLookup::default()
            .with_run(baseline_run("sum", 1000));
        let mut h = harness(
            FakeQueue::default().with_task(claimed()),
            sandbox,
            lookup,
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );

        h.runner.tick().await.unwrap();

        let stages = &h.queue.finished()[0].1;
        let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build::sum", "build::sort", "test::sum"]);
        assert!(stages[2].is_success());
    }

    #[tokio::test]
    async fn test_submit_failure_does_not_fail_task() {
        let sandbox = FakeSandbox::default()
            .with_build(build_ok(&["sum"]), &[("sum", "sum-binary")])
            .with_perf("sum", 1000);
        let lookup = FakeLookup::default().failing_submit();
        let mut h = harness(
            FakeQueue::default().with_task(claimed()),
            sandbox,
            lookup,
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );

        h.runner.tick().await.unwrap();

        let stages = &h.queue.finished()[0].1;
        assert_eq!(stages.len(), 2);
        assert!(stages.iter().all(|s| s.name != "system"));
    }

    #[tokio::test]
    async fn test_scratch_is_cleared_after_task() {
        let sandbox = FakeSandbox::default()
            .with_build(build_ok(&["sum"]), &[("sum", "sum-binary")])
            .with_perf("sum", 1000);
        let mut h = harness(
            FakeQueue::default().with_task(claimed()),
            sandbox,
            FakeLookup::default(),
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );

        h.runner.tick().await.unwrap();

        let left: Vec<_> = std::fs::read_dir(h.runner.scratch.path()).unwrap().collect();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut h = harness(
            FakeQueue::default().with_task(claimed()),
            FakeSandbox::default(),
            FakeLookup::default(),
            FakeCatalog::ready(),
            FakeCodeHost::default(),
        );

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        tokio::time::timeout(Duration::from_secs(5), h.runner.run(shutdown))
            .await
            .unwrap();

        assert_eq!(h.queue.finished().len(), 1);
        assert!(h.catalog.tests().is_empty());
    }
}
