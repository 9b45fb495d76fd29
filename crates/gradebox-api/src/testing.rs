//! In-memory collaborators for route tests.

use crate::state::{ApiSettings, AppState};
use async_trait::async_trait;
use bytes::Bytes;
use gradebox_core::catalog::{CourseCatalog, Test};
use gradebox_core::check::{CheckRunUpdate, CodeHost, NewCheckRun};
use gradebox_core::run::{ResultLookup, Run};
use gradebox_core::storage::ObjectStore;
use gradebox_core::task::{
    ClaimedTask, EnqueueOutcome, EnqueueRequest, FinishOutcome, TaskQueue,
};
use gradebox_core::{Error, Result, Stage, TaskId};
use gradebox_db::{DbResult, NewUser, User, UserRepo};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
pub struct Fakes {
    pub queue: Arc<MemQueue>,
    pub runs: Arc<MemRuns>,
    pub catalog: Arc<MemCatalog>,
    pub users: Arc<MemUsers>,
    pub code_host: Arc<MemCodeHost>,
    pub objects: Arc<MemObjects>,
}

impl Fakes {
    pub fn state(&self, settings: ApiSettings) -> AppState {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://gradebox@localhost/gradebox")
            .unwrap();
        AppState {
            pool,
            queue: self.queue.clone(),
            runs: self.runs.clone(),
            catalog: self.catalog.clone(),
            users: self.users.clone(),
            code_host: self.code_host.clone(),
            objects: self.objects.clone(),
            settings: Arc::new(settings),
        }
    }
}

pub fn claimed(commit: &str) -> ClaimedTask {
    ClaimedTask {
        id: TaskId::new(),
        claim_id: uuid::Uuid::now_v7(),
        commit_id: 7,
        login: "alice".to_string(),
        repository: "stdlib".to_string(),
        commit: commit.to_string(),
        installation_id: 42,
        check_run_id: 1001,
    }
}

#[derive(Default)]
pub struct MemQueue {
    pub pending: Mutex<Vec<ClaimedTask>>,
    pub known: Mutex<Vec<ClaimedTask>>,
    pub enqueued: Mutex<Vec<EnqueueRequest>>,
    pub finished: Mutex<Vec<(TaskId, Vec<Stage>)>>,
}

impl MemQueue {
    pub fn push(&self, task: ClaimedTask) {
        self.known.lock().unwrap().push(task.clone());
        self.pending.lock().unwrap().push(task);
    }
}

#[async_trait]
impl TaskQueue for MemQueue {
    async fn enqueue(&self, request: &EnqueueRequest) -> Result<EnqueueOutcome> {
        let mut enqueued = self.enqueued.lock().unwrap();
        if enqueued.contains(request) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        enqueued.push(request.clone());
        Ok(EnqueueOutcome::Enqueued {
            task_id: TaskId::new(),
            commit_id: enqueued.len() as i64,
        })
    }

    async fn dequeue(&self) -> Result<Option<ClaimedTask>> {
        let mut pending = self.pending.lock().unwrap();
        Ok(if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        })
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
        let mut finished = self.finished.lock().unwrap();
        if finished.iter().any(|(id, _)| *id == task_id) {
            return Ok(FinishOutcome::AlreadyChecked);
        }
        finished.push((task_id, stages.to_vec()));
        Ok(FinishOutcome::Finished)
    }
}

#[derive(Default)]
pub struct MemRuns {
    pub runs: Mutex<HashMap<String, Run>>,
}

#[async_trait]
impl ResultLookup for MemRuns {
    async fn get_runs(&self, hashes: &[String]) -> Result<HashMap<String, Run>> {
        let runs = self.runs.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|h| runs.get(h).map(|r| (h.clone(), r.clone())))
            .collect())
    }

    async fn get_baselines(&self, tests: &[String]) -> Result<HashMap<String, Run>> {
        let runs = self.runs.lock().unwrap();
        Ok(runs
            .values()
            .filter(|r| r.baseline && tests.contains(&r.test))
            .map(|r| (r.test.clone(), r.clone()))
            .collect())
    }

    async fn submit_runs(&self, runs: &[Run]) -> Result<()> {
        let mut stored = self.runs.lock().unwrap();
        for run in runs {
            stored.entry(run.hash.clone()).or_insert_with(|| run.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemCatalog {
    pub ready: Mutex<bool>,
    pub tests: Mutex<Vec<Test>>,
}

#[async_trait]
impl CourseCatalog for MemCatalog {
    async fn is_ready(&self) -> Result<bool> {
        Ok(*self.ready.lock().unwrap())
    }

    async fn set_ready(&self, ready: bool) -> Result<()> {
        *self.ready.lock().unwrap() = ready;
        Ok(())
    }

    async fn update_tests(&self, tests: &[Test]) -> Result<()> {
        if tests.iter().any(|t| t.name.is_empty()) {
            return Err(Error::InvalidInput("test name cannot be empty".to_string()));
        }
        *self.tests.lock().unwrap() = tests.to_vec();
        Ok(())
    }

    async fn list_tests(&self) -> Result<Vec<Test>> {
        Ok(self.tests.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemUsers {
    pub users: Mutex<Vec<User>>,
}

impl MemUsers {
    pub fn add(&self, id: i64, github_id: i64, login: &str, repository_id: i64) {
        self.users.lock().unwrap().push(User {
            id,
            github_id,
            login: login.to_string(),
            repository_id,
            repository_name: "stdlib".to_string(),
            installation_id: 42,
            created_at: chrono::Utc::now(),
        });
    }
}

#[async_trait]
impl UserRepo for MemUsers {
    async fn create(&self, user: &NewUser) -> DbResult<User> {
        let mut users = self.users.lock().unwrap();
        let created = User {
            id: users.len() as i64 + 1,
            github_id: user.github_id,
            login: user.login.clone(),
            repository_id: user.repository_id,
            repository_name: user.repository_name.clone(),
            installation_id: user.installation_id,
            created_at: chrono::Utc::now(),
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn find_by_github(&self, github_id: i64, repository_id: i64) -> DbResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.github_id == github_id && u.repository_id == repository_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemCodeHost {
    pub created: Mutex<Vec<(i64, String, String, NewCheckRun)>>,
    pub updates: Mutex<Vec<CheckRunUpdate>>,
    pub fail_archive: Mutex<bool>,
}

#[async_trait]
impl CodeHost for MemCodeHost {
    async fn archive(
        &self,
        _installation_id: i64,
        owner: &str,
        repo: &str,
        commit: &str,
    ) -> Result<Bytes> {
        if *self.fail_archive.lock().unwrap() {
            return Err(Error::CodeHost("archive: 502 Bad Gateway".to_string()));
        }
        Ok(Bytes::from(format!("{}/{}@{}", owner, repo, commit)))
    }

    async fn create_check_run(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        check_run: &NewCheckRun,
    ) -> Result<i64> {
        let mut created = self.created.lock().unwrap();
        created.push((
            installation_id,
            owner.to_string(),
            repo.to_string(),
            check_run.clone(),
        ));
        Ok(1000 + created.len() as i64)
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
pub struct MemObjects {
    pub keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for MemObjects {
    async fn upload(&self, key: &str, _data: Bytes) -> Result<()> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        Ok(format!("https://s3.test/{}?expires={}", key, ttl.as_secs()))
    }
}
