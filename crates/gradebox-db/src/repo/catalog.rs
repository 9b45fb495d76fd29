//! Course catalog repository: tests and course readiness.

use async_trait::async_trait;
use gradebox_core::catalog::{CourseCatalog, Test};
use sqlx::{PgExecutor, PgPool};
use std::collections::HashMap;

use crate::{DbError, DbResult};

/// Default course row name.
pub const DEFAULT_COURSE: &str = "stdlib";

#[derive(Debug, Clone, sqlx::FromRow)]
struct TestRecord {
    name: String,
    description: String,
    topic: String,
    score: i64,
}

impl From<TestRecord> for Test {
    fn from(record: TestRecord) -> Self {
        Test {
            name: record.name,
            description: record.description,
            topic: record.topic,
            score: record.score,
        }
    }
}

/// Ids of the named tests that are not soft-deleted.
pub async fn test_ids<'e, E>(executor: E, names: &[String]) -> DbResult<HashMap<String, i64>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, name FROM tests WHERE name = ANY($1) AND NOT is_deleted",
    )
    .bind(names)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(id, name)| (name, id)).collect())
}

#[derive(Clone)]
pub struct PgCatalogRepo {
    pool: PgPool,
    course: String,
}

impl PgCatalogRepo {
    pub fn new(pool: PgPool) -> Self {
        Self::for_course(pool, DEFAULT_COURSE)
    }

    pub fn for_course(pool: PgPool, course: impl Into<String>) -> Self {
        Self {
            pool,
            course: course.into(),
        }
    }

    async fn ready(&self) -> DbResult<bool> {
        let ready = sqlx::query_scalar::<_, bool>("SELECT is_ready FROM courses WHERE name = $1")
            .bind(&self.course)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ready.unwrap_or(false))
    }

    async fn mark(&self, ready: bool) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO courses (name, is_ready, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE
            SET is_ready = EXCLUDED.is_ready, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&self.course)
        .bind(ready)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_tests(&self, tests: &[Test]) -> DbResult<()> {
        if let Some(test) = tests.iter().find(|t| t.name.is_empty()) {
            return Err(DbError::InvalidInput(format!(
                "test name cannot be empty (topic {:?})",
                test.topic
            )));
        }

        let mut tx = self.pool.begin().await?;
        for test in tests {
            sqlx::query(
                r#"
                INSERT INTO tests (name, description, topic, score)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (name) DO UPDATE
                SET description = EXCLUDED.description,
                    topic = EXCLUDED.topic,
                    score = EXCLUDED.score,
                    is_deleted = FALSE
                "#,
            )
            .bind(&test.name)
            .bind(&test.description)
            .bind(&test.topic)
            .bind(test.score)
            .execute(&mut *tx)
            .await?;
        }

        let names: Vec<String> = tests.iter().map(|t| t.name.clone()).collect();
        sqlx::query("UPDATE tests SET is_deleted = TRUE WHERE NOT (name = ANY($1))")
            .bind(&names)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn active_tests(&self) -> DbResult<Vec<Test>> {
        let records = sqlx::query_as::<_, TestRecord>(
            "SELECT name, description, topic, score FROM tests WHERE NOT is_deleted ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records.into_iter().map(Test::from).collect())
    }
}

#[async_trait]
impl CourseCatalog for PgCatalogRepo {
    async fn is_ready(&self) -> gradebox_core::Result<bool> {
        Ok(self.ready().await?)
    }

    async fn set_ready(&self, ready: bool) -> gradebox_core::Result<()> {
        Ok(self.mark(ready).await?)
    }

    async fn update_tests(&self, tests: &[Test]) -> gradebox_core::Result<()> {
        Ok(self.replace_tests(tests).await?)
    }

    async fn list_tests(&self) -> gradebox_core::Result<Vec<Test>> {
        Ok(self.active_tests().await?)
    }
}
