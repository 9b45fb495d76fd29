//! User repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A student together with the repository they submit from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub github_id: i64,
    pub login: String,
    pub repository_id: i64,
    pub repository_name: String,
    pub installation_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub github_id: i64,
    pub login: String,
    pub repository_id: i64,
    pub repository_name: String,
    pub installation_id: i64,
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: &NewUser) -> DbResult<User>;
    async fn find_by_github(&self, github_id: i64, repository_id: i64) -> DbResult<Option<User>>;
}

/// PostgreSQL implementation of UserRepo.
pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, user: &NewUser) -> DbResult<User> {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (github_id, login, repository_id, repository_name, installation_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (github_id, repository_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user.github_id)
        .bind(&user.login)
        .bind(user.repository_id)
        .bind(&user.repository_name)
        .bind(user.installation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DbError::Duplicate(format!(
                "user {} for repository {}",
                user.login, user.repository_name
            ))
        })?;
        Ok(created)
    }

    async fn find_by_github(&self, github_id: i64, repository_id: i64) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE github_id = $1 AND repository_id = $2",
        )
        .bind(github_id)
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
