//! Run cache repository.
//!
//! Runs are keyed by artifact hash and inserted with insert-or-ignore
//! semantics. The only mutation allowed on an existing row is moving the
//! baseline flag when a new baseline is submitted for its test.

use async_trait::async_trait;
use gradebox_core::run::{ResultLookup, Run, RunStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;

use super::catalog::test_ids;
use crate::{DbError, DbResult};

/// A run row joined with its test name.
#[derive(Debug, Clone, sqlx::FromRow)]
struct RunRecord {
    hash: String,
    status: String,
    output: String,
    score: i64,
    test: String,
    is_baseline: bool,
}

impl TryFrom<RunRecord> for Run {
    type Error = DbError;

    fn try_from(record: RunRecord) -> DbResult<Run> {
        let status: RunStatus = record.status.parse().map_err(DbError::InvalidData)?;
        let score = u64::try_from(record.score)
            .map_err(|_| DbError::InvalidData(format!("negative score for {}", record.hash)))?;
        Ok(Run {
            hash: record.hash,
            test: record.test,
            status,
            output: record.output,
            score,
            baseline: record.is_baseline,
        })
    }
}

/// Filter for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub hashes: Vec<String>,
    pub baseline: Option<bool>,
}

/// PostgreSQL run cache.
#[derive(Clone)]
pub struct PgRunRepo {
    pool: PgPool,
}

impl PgRunRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs with one of the given hashes, optionally filtered by baseline flag.
    pub async fn list(&self, filter: &RunFilter) -> DbResult<Vec<Run>> {
        let records = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT r.hash, r.status, r.output, r.score, t.name AS test, r.is_baseline
            FROM runs AS r JOIN tests AS t ON t.id = r.test_id
            WHERE r.hash = ANY($1) AND ($2::BOOLEAN IS NULL OR r.is_baseline = $2)
            ORDER BY r.id
            "#,
        )
        .bind(&filter.hashes)
        .bind(filter.baseline)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Run::try_from).collect()
    }

    /// Current baseline for each named test.
    pub async fn baselines(&self, tests: &[String]) -> DbResult<HashMap<String, Run>> {
        let records = sqlx::query_as::<_, RunRecord>(
            r#"
            SELECT r.hash, r.status, r.output, r.score, t.name AS test, r.is_baseline
            FROM runs AS r JOIN tests AS t ON t.id = r.test_id
            WHERE r.is_baseline AND t.name = ANY($1)
            ORDER BY r.id
            "#,
        )
        .bind(tests)
        .fetch_all(&self.pool)
        .await?;

        // Later rows win, so the newest baseline is kept if several survived.
        let mut baselines = HashMap::new();
        for record in records {
            let run = Run::try_from(record)?;
            baselines.insert(run.test.clone(), run);
        }
        Ok(baselines)
    }

    /// Store runs in one transaction.
    ///
    /// Existing hashes are left untouched, except that a baseline submission
    /// promotes the stored run. A new baseline demotes older baselines of
    /// the same test. Runs for unknown tests are stored without a test.
    pub async fn insert(&self, runs: &[Run]) -> DbResult<()> {
        if runs.is_empty() {
            return Ok(());
        }

        let mut names: Vec<String> = runs.iter().map(|r| r.test.clone()).collect();
        names.sort();
        names.dedup();

        let mut tx = self.pool.begin().await?;
        let ids = test_ids(&mut *tx, &names).await?;

        for run in runs {
            let test_id = ids.get(&run.test).copied();
            let score = i64::try_from(run.score)
                .map_err(|_| DbError::InvalidData(format!("score too large for {}", run.hash)))?;

            sqlx::query(
                r#"
                INSERT INTO runs (hash, status, output, score, test_id, is_baseline)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (hash) DO UPDATE SET is_baseline = TRUE
                WHERE EXCLUDED.is_baseline AND NOT runs.is_baseline
                "#,
            )
            .bind(&run.hash)
            .bind(run.status.as_str())
            .bind(&run.output)
            .bind(score)
            .bind(test_id)
            .bind(run.baseline)
            .execute(&mut *tx)
            .await?;

            if let (true, Some(test_id)) = (run.baseline, test_id) {
                let demoted = sqlx::query(
                    r#"
                    UPDATE runs SET is_baseline = FALSE
                    WHERE test_id = $1 AND is_baseline AND hash <> $2
                    "#,
                )
                .bind(test_id)
                .bind(&run.hash)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if demoted > 0 {
                    debug!(test = %run.test, demoted, "Replaced baseline");
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ResultLookup for PgRunRepo {
    async fn get_runs(&self, hashes: &[String]) -> gradebox_core::Result<HashMap<String, Run>> {
        let filter = RunFilter {
            hashes: hashes.to_vec(),
            baseline: None,
        };
        let runs = self.list(&filter).await?;
        Ok(runs.into_iter().map(|r| (r.hash.clone(), r)).collect())
    }

    async fn get_baselines(&self, tests: &[String]) -> gradebox_core::Result<HashMap<String, Run>> {
        Ok(self.baselines(tests).await?)
    }

    async fn submit_runs(&self, runs: &[Run]) -> gradebox_core::Result<()> {
        Ok(self.insert(runs).await?)
    }
}
