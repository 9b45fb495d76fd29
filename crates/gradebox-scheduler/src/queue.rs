//! Task queue implementation using PostgreSQL.

use async_trait::async_trait;
use gradebox_core::task::{ClaimedTask, EnqueueOutcome, EnqueueRequest, FinishOutcome, TaskQueue};
use gradebox_core::{Error, Result, Stage, TaskId};
use gradebox_db::{DbError, DbResult, test_ids};
use sqlx::PgPool;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, sqlx::FromRow)]
struct ClaimRecord {
    id: uuid::Uuid,
    claim_id: uuid::Uuid,
    commit_id: i64,
    login: String,
    repository: String,
    commit: String,
    installation_id: i64,
    check_run_id: i64,
}

impl From<ClaimRecord> for ClaimedTask {
    fn from(record: ClaimRecord) -> Self {
        ClaimedTask {
            id: TaskId::from(record.id),
            claim_id: record.claim_id,
            commit_id: record.commit_id,
            login: record.login,
            repository: record.repository,
            commit: record.commit,
            installation_id: record.installation_id,
            check_run_id: record.check_run_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FinishRecord {
    status: String,
    claim_id: uuid::Uuid,
    commit_id: i64,
    is_checked: bool,
}

/// Task queue backed by PostgreSQL.
#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
    claim_ttl: Option<Duration>,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_ttl: None,
        }
    }

    /// Let executing tasks older than `ttl` be claimed again.
    pub fn with_claim_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.claim_ttl = ttl;
        self
    }

    async fn enqueue_commit(&self, request: &EnqueueRequest) -> DbResult<EnqueueOutcome> {
        let mut tx = self.pool.begin().await?;

        // A conflicting row with the same check run is a redelivery: no row
        // comes back and nothing changes.
        let commit_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO commits (user_id, commit, check_run_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, commit) DO UPDATE
            SET check_run_id = EXCLUDED.check_run_id, is_checked = FALSE
            WHERE commits.check_run_id IS DISTINCT FROM EXCLUDED.check_run_id
            RETURNING id
            "#,
        )
        .bind(request.user_id)
        .bind(&request.commit)
        .bind(request.check_run_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(commit_id) = commit_id else {
            return Ok(EnqueueOutcome::Duplicate);
        };

        let task_id = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO tasks (id, commit_id, claim_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (commit_id) DO UPDATE
            SET status = 'enqueued', created_at = NOW(), started_at = NULL, finished_at = NULL
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(commit_id)
        .bind(uuid::Uuid::now_v7())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM checks WHERE commit_id = $1")
            .bind(commit_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(EnqueueOutcome::Enqueued {
            task_id: TaskId::from(task_id),
            commit_id,
        })
    }

    /// Claim the oldest eligible task.
    /// Uses SKIP LOCKED so concurrent runners never claim the same row. Each
    /// claim gets a new `claim_id`, so a lapsed claim cannot finish the task.
    async fn claim(&self) -> DbResult<Option<ClaimedTask>> {
        let ttl_secs = self.claim_ttl.map(|ttl| ttl.as_secs_f64());
        let record = sqlx::query_as::<_, ClaimRecord>(
            r#"
            WITH claimed AS (
                UPDATE tasks
                SET status = 'executing', claim_id = $2, started_at = NOW(), finished_at = NULL
                WHERE id = (
                    SELECT id FROM tasks
                    WHERE status = 'enqueued'
                       OR ($1::DOUBLE PRECISION IS NOT NULL
                           AND status = 'executing'
                           AND started_at < NOW() - make_interval(secs => $1::DOUBLE PRECISION))
                    ORDER BY created_at, id
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING id, claim_id, commit_id
            )
            SELECT claimed.id, claimed.claim_id, claimed.commit_id, u.login, u.repository_name AS repository,
                   c.commit, u.installation_id, c.check_run_id
            FROM claimed
            JOIN commits AS c ON c.id = claimed.commit_id
            JOIN users AS u ON u.id = c.user_id
            "#,
        )
        .bind(ttl_secs)
        .bind(uuid::Uuid::now_v7())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(ClaimedTask::from))
    }

    async fn find(&self, task_id: TaskId) -> DbResult<Option<ClaimedTask>> {
        let record = sqlx::query_as::<_, ClaimRecord>(
            r#"
            SELECT t.id, t.claim_id, t.commit_id, u.login, u.repository_name AS repository,
                   c.commit, u.installation_id, c.check_run_id
            FROM tasks AS t
            JOIN commits AS c ON c.id = t.commit_id
            JOIN users AS u ON u.id = c.user_id
            WHERE t.id = $1
            "#,
        )
        .bind(task_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(ClaimedTask::from))
    }

    async fn finish_task(
        &self,
        task_id: TaskId,
        claim_id: uuid::Uuid,
        stages: &[Stage],
    ) -> DbResult<FinishOutcome> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, FinishRecord>(
            r#"
            SELECT t.status::TEXT AS status, t.claim_id, c.id AS commit_id, c.is_checked
            FROM tasks AS t JOIN commits AS c ON c.id = t.commit_id
            WHERE t.id = $1
            FOR UPDATE OF t, c
            "#,
        )
        .bind(task_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("task {}", task_id)))?;

        if record.claim_id != claim_id {
            return Ok(FinishOutcome::Superseded);
        }
        if record.is_checked {
            return Ok(FinishOutcome::AlreadyChecked);
        }
        if record.status != "executing" {
            return Ok(FinishOutcome::Superseded);
        }

        let mut names: Vec<String> = stages.iter().filter_map(|s| s.test.clone()).collect();
        names.sort();
        names.dedup();
        let ids = test_ids(&mut *tx, &names).await?;

        let mut test_col = Vec::with_capacity(stages.len());
        let mut name_col = Vec::with_capacity(stages.len());
        let mut status_col = Vec::with_capacity(stages.len());
        let mut output_col = Vec::with_capacity(stages.len());
        let mut cached_col = Vec::with_capacity(stages.len());
        for stage in stages {
            let test_id = match stage.test.as_deref().filter(|t| !t.is_empty()) {
                Some(test) => match ids.get(test) {
                    Some(id) => Some(*id),
                    None => {
                        debug!(stage = %stage.name, test = %test, "Dropping stage for unknown test");
                        continue;
                    }
                },
                None => None,
            };
            test_col.push(test_id);
            name_col.push(stage.name.clone());
            status_col.push(stage.status.as_str().to_string());
            output_col.push(stage.output.clone());
            cached_col.push(stage.cached);
        }

        sqlx::query(
            r#"
            INSERT INTO checks (commit_id, test_id, name, status, output, is_cached)
            SELECT $1, * FROM UNNEST($2::BIGINT[], $3::TEXT[], $4::TEXT[], $5::TEXT[], $6::BOOLEAN[])
            "#,
        )
        .bind(record.commit_id)
        .bind(&test_col)
        .bind(&name_col)
        .bind(&status_col)
        .bind(&output_col)
        .bind(&cached_col)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE commits SET is_checked = TRUE WHERE id = $1")
            .bind(record.commit_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE tasks SET status = 'finished', finished_at = NOW() WHERE id = $1")
            .bind(task_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(FinishOutcome::Finished)
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, request: &EnqueueRequest) -> Result<EnqueueOutcome> {
        Ok(self.enqueue_commit(request).await?)
    }

    async fn dequeue(&self) -> Result<Option<ClaimedTask>> {
        Ok(self.claim().await?)
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<ClaimedTask>> {
        Ok(self.find(task_id).await?)
    }

    async fn finish(
        &self,
        task_id: TaskId,
        claim_id: uuid::Uuid,
        stages: &[Stage],
    ) -> Result<FinishOutcome> {
        self.finish_task(task_id, claim_id, stages)
            .await
            .map_err(Error::from)
    }
}
