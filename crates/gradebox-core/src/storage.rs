//! Object storage abstraction used to hand source archives to the builder.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::Result;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, key: &str, data: Bytes) -> Result<()>;

    /// Time-limited URL the sandbox can fetch `key` from.
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String>;
}
