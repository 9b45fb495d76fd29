//! Core domain types and traits for the Gradebox grading pipeline.
//!
//! This crate contains:
//! - Task identifiers and the task queue contract
//! - Runs, stages and baseline scoring
//! - Executor and sandbox traits
//! - The scratch directory shared with sandbox containers
//! - Collaborator traits (code host, object storage, course catalog)

pub mod baseline;
pub mod catalog;
pub mod check;
pub mod error;
pub mod executor;
pub mod id;
pub mod run;
pub mod sandbox;
pub mod scratch;
pub mod stage;
pub mod storage;
pub mod task;

pub use error::{Error, Result};
pub use id::TaskId;
pub use run::{Run, RunStatus};
pub use stage::Stage;
