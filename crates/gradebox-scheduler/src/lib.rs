//! Grading runner for Gradebox.
//!
//! Owns the Postgres task queue, the artifact store that resolves built
//! tests to runs, check-run reporting and the polling runner loop.
//! Tasks are claimed with `FOR UPDATE SKIP LOCKED` so several runners can
//! share one database.

pub mod dispatch;
pub mod orchestrator;
pub mod queue;
pub mod report;
pub mod store;
pub mod ticker;
pub mod upgrade;

#[cfg(test)]
mod testing;

pub use orchestrator::{Runner, RunnerDeps, RunnerSettings, TickOutcome};
pub use queue::PgTaskQueue;
pub use store::{Artifact, ArtifactStore, RunSource, StoreMode};
pub use ticker::Ticker;
pub use upgrade::UpgradeGate;
