//! Course catalog: the gradeable tests and course readiness.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A gradeable unit described by the course builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topic: String,
    /// Points awarded for passing.
    #[serde(default)]
    pub score: i64,
}

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    /// Whether a baseline exists for the current course images.
    async fn is_ready(&self) -> Result<bool>;

    async fn set_ready(&self, ready: bool) -> Result<()>;

    /// Upsert `tests` and soft-delete every test not in the list.
    async fn update_tests(&self, tests: &[Test]) -> Result<()>;

    /// Tests that are not soft-deleted, ordered by name.
    async fn list_tests(&self) -> Result<Vec<Test>>;
}
