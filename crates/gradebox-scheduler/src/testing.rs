//! In-memory collaborators for scheduler tests.

use async_trait::async_trait;
use bytes::Bytes;
use gradebox_core::catalog::{CourseCatalog, Test};
use gradebox_core::check::{CheckRunUpdate, CodeHost, NewCheckRun};
use gradebox_core::run::{ResultLookup, Run, RunStatus};
use gradebox_core::sandbox::{BuildReport, Sandbox, SandboxError, UnitResult};
use gradebox_core::scratch::{BuiltArtifact, ScratchDir};
use gradebox_core::storage::ObjectStore;
use gradebox_core::task::{ClaimedTask, EnqueueOutcome, EnqueueRequest, FinishOutcome, TaskQueue};
use gradebox_core::{Error, Result, Stage, TaskId};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// Scratch directory populated with `<test>.test` files and the artifacts
/// collected from it.
pub fn built_artifacts(files: &[(&str, &str)]) -> (TempDir, ScratchDir, Vec<BuiltArtifact>) {
    let dir = tempfile::tempdir().unwrap();
    let mut scratch = ScratchDir::new(dir.path().join("scratch"), "gradebox-data");
    scratch.clear().unwrap();
    for (test, content) in files {
        std::fs::write(scratch.path().join(format!("{}.test", test)), content).unwrap();
    }
    let built = scratch.collect_artifacts(&dir.path().join("artifacts")).unwrap();
    scratch.clear().unwrap();
    (dir, scratch, built)
}

fn write_artifacts(scratch: &mut ScratchDir, files: &[(String, String)]) {
    scratch.clear().unwrap();
    for (test, content) in files {
        std::fs::write(scratch.path().join(format!("{}.test", test)), content).unwrap();
    }
}

#[derive(Default)]
pub struct FakeLookup {
    runs: Mutex<HashMap<String, Run>>,
    baselines: Mutex<HashMap<String, Run>>,
    submitted: Mutex<Vec<Run>>,
    baseline_lookups: Mutex<usize>,
    fail_submit: bool,
}

impl FakeLookup {
    /// Store a run; baseline runs also become their test's baseline.
    pub fn with_run(self, run: Run) -> Self {
        if run.baseline {
            self.baselines
                .lock()
                .unwrap()
                .insert(run.test.clone(), run.clone());
        }
        self.runs.lock().unwrap().insert(run.hash.clone(), run);
        self
    }

    pub fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub fn submitted(&self) -> Vec<Run> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn baseline_lookups(&self) -> usize {
        *self.baseline_lookups.lock().unwrap()
    }
}

#[async_trait]
impl ResultLookup for FakeLookup {
    async fn get_runs(&self, hashes: &[String]) -> Result<HashMap<String, Run>> {
        let runs = self.runs.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|h| runs.get(h).map(|r| (h.clone(), r.clone())))
            .collect())
    }

    async fn get_baselines(&self, tests: &[String]) -> Result<HashMap<String, Run>> {
        *self.baseline_lookups.lock().unwrap() += 1;
        let baselines = self.baselines.lock().unwrap();
        Ok(tests
            .iter()
            .filter_map(|t| baselines.get(t).map(|r| (t.clone(), r.clone())))
            .collect())
    }

    async fn submit_runs(&self, runs: &[Run]) -> Result<()> {
        if self.fail_submit {
            return Err(Error::Database("connection reset".to_string()));
        }
        self.submitted.lock().unwrap().extend_from_slice(runs);
        let mut stored = self.runs.lock().unwrap();
        let mut baselines = self.baselines.lock().unwrap();
        for run in runs {
            stored.entry(run.hash.clone()).or_insert_with(|| run.clone());
            if run.baseline {
                baselines.insert(run.test.clone(), run.clone());
            }
        }
        Ok(())
    }
}

/// Sandbox with per-test scripted outcomes. Unscripted tests pass their
/// unit tests and have no perf data.
#[derive(Default)]
pub struct FakeSandbox {
    perf: HashMap<String, u64>,
    failures: HashMap<String, String>,
    launch_errors: Vec<String>,
    build: Option<BuildReport>,
    build_files: Vec<(String, String)>,
    baseline_files: Vec<(String, String)>,
    meta: Vec<Test>,
    fail_meta: bool,
    calls: Mutex<Vec<String>>,
    listings: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeSandbox {
    pub fn with_perf(mut self, test: &str, cycles: u64) -> Self {
        self.perf.insert(test.to_string(), cycles);
        self
    }

    pub fn with_failure(mut self, test: &str, output: &str) -> Self {
        self.failures.insert(test.to_string(), output.to_string());
        self
    }

    pub fn with_launch_error(mut self, test: &str) -> Self {
        self.launch_errors.push(test.to_string());
        self
    }

    /// Build that writes `files` and reports `report`.
    pub fn with_build(mut self, report: BuildReport, files: &[(&str, &str)]) -> Self {
        self.build = Some(report);
        self.build_files = owned(files);
        self
    }

    pub fn with_baseline(mut self, tests: Vec<Test>, files: &[(&str, &str)]) -> Self {
        self.meta = tests;
        self.baseline_files = owned(files);
        self
    }

    pub fn failing_meta(mut self) -> Self {
        self.fail_meta = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Scratch contents seen by each unit-test invocation.
    pub fn scratch_listings(&self) -> Vec<(String, Vec<String>)> {
        self.listings.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn owned(files: &[(&str, &str)]) -> Vec<(String, String)> {
    files
        .iter()
        .map(|(t, c)| (t.to_string(), c.to_string()))
        .collect()
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn pull_images(&self) -> std::result::Result<(), SandboxError> {
        self.record("pull".to_string());
        Ok(())
    }

    async fn build_tests(&self, archive_url: &str, scratch: &mut ScratchDir) -> BuildReport {
        self.record(format!("build:{}", archive_url));
        write_artifacts(scratch, &self.build_files);
        self.build.clone().unwrap_or(BuildReport {
            exit_code: Some(0),
            stages: vec![Stage::new("build", RunStatus::Success)],
        })
    }

    async fn run_unit_test(
        &self,
        test: &str,
        scratch: &ScratchDir,
    ) -> std::result::Result<UnitResult, SandboxError> {
        self.record(format!("unit:{}", test));
        let mut files: Vec<String> = std::fs::read_dir(scratch.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        self.listings
            .lock()
            .unwrap()
            .push((test.to_string(), files));

        if self.launch_errors.iter().any(|t| t == test) {
            return Err(SandboxError::Launch("image not found".to_string()));
        }
        Ok(match self.failures.get(test) {
            Some(output) => UnitResult {
                status: RunStatus::Failure,
                output: output.clone(),
            },
            None => UnitResult {
                status: RunStatus::Success,
                output: String::new(),
            },
        })
    }

    async fn run_perf(
        &self,
        test: &str,
        _scratch: &ScratchDir,
    ) -> std::result::Result<u64, SandboxError> {
        self.record(format!("perf:{}", test));
        self.perf
            .get(test)
            .copied()
            .ok_or(SandboxError::NoPerfData)
    }

    async fn build_baseline(
        &self,
        scratch: &mut ScratchDir,
    ) -> std::result::Result<(), SandboxError> {
        self.record("baseline".to_string());
        write_artifacts(scratch, &self.baseline_files);
        Ok(())
    }

    async fn build_meta(&self) -> std::result::Result<Vec<Test>, SandboxError> {
        self.record("meta".to_string());
        if self.fail_meta {
            return Err(SandboxError::Malformed("meta stages: EOF".to_string()));
        }
        Ok(self.meta.clone())
    }

    async fn build_docs(
        &self,
        web_url: &str,
        docs_url: &str,
    ) -> std::result::Result<(), SandboxError> {
        self.record(format!("docs:{}:{}", web_url, docs_url));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    ready: Mutex<bool>,
    tests: Mutex<Vec<Test>>,
}

impl FakeCatalog {
    pub fn ready() -> Self {
        Self {
            ready: Mutex::new(true),
            ..Default::default()
        }
    }

    pub fn tests(&self) -> Vec<Test> {
        self.tests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CourseCatalog for FakeCatalog {
    async fn is_ready(&self) -> Result<bool> {
        Ok(*self.ready.lock().unwrap())
    }

    async fn set_ready(&self, ready: bool) -> Result<()> {
        *self.ready.lock().unwrap() = ready;
        Ok(())
    }

    async fn update_tests(&self, tests: &[Test]) -> Result<()> {
        *self.tests.lock().unwrap() = tests.to_vec();
        Ok(())
    }

    async fn list_tests(&self) -> Result<Vec<Test>> {
        Ok(self.tests())
    }
}

/// Queue holding claimable tasks and recording finishes.
#[derive(Default)]
pub struct FakeQueue {
    pending: Mutex<VecDeque<ClaimedTask>>,
    known: Mutex<Vec<ClaimedTask>>,
    finished: Mutex<Vec<(TaskId, Vec<Stage>)>>,
}

impl FakeQueue {
    pub fn with_task(self, task: ClaimedTask) -> Self {
        self.known.lock().unwrap().push(task.clone());
        self.pending.lock().unwrap().push_back(task);
        self
    }

    pub fn finished(&self) -> Vec<(TaskId, Vec<Stage>)> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskQueue for FakeQueue {
    async fn enqueue(&self, _request: &EnqueueRequest) -> Result<EnqueueOutcome> {
        Ok(EnqueueOutcome::Duplicate)
    }

    async fn dequeue(&self) -> Result<Option<ClaimedTask>> {
        Ok(self.pending.lock().unwrap().pop_front())
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<ClaimedTask>> {
        Ok(self
            .known
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == task_id)
            .cloned())
    }

    async fn finish(
        &self,
        task_id: TaskId,
        claim_id: Uuid,
        stages: &[Stage],
    ) -> Result<FinishOutcome> {
        let current = self
            .known
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.id == task_id && t.claim_id == claim_id);
        if !current {
            return Ok(FinishOutcome::Superseded);
        }
        self.finished
            .lock()
            .unwrap()
            .push((task_id, stages.to_vec()));
        Ok(FinishOutcome::Finished)
    }
}

#[derive(Default)]
pub struct FakeCodeHost {
    updates: Mutex<Vec<CheckRunUpdate>>,
    fail_archive: bool,
}

impl FakeCodeHost {
    pub fn failing_archive() -> Self {
        Self {
            fail_archive: true,
            ..Default::default()
        }
    }

    pub fn updates(&self) -> Vec<CheckRunUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn archive(
        &self,
        _installation_id: i64,
        owner: &str,
        repo: &str,
        commit: &str,
    ) -> Result<Bytes> {
        if self.fail_archive {
            return Err(Error::CodeHost("archive: 502 Bad Gateway".to_string()));
        }
        Ok(Bytes::from(format!("{}/{}@{}", owner, repo, commit)))
    }

    async fn create_check_run(
        &self,
        _installation_id: i64,
        _owner: &str,
        _repo: &str,
        _check_run: &NewCheckRun,
    ) -> Result<i64> {
        Ok(1)
    }

    async fn update_check_run(
        &self,
        _installation_id: i64,
        _owner: &str,
        _repo: &str,
        update: &CheckRunUpdate,
    ) -> Result<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl FakeObjectStore {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        Ok(format!("https://s3.test/{}?expires={}", key, ttl.as_secs()))
    }
}
