//! HTTP API for Gradebox.
//!
//! Receives GitHub check-suite webhooks, hands tasks to remote runners and
//! exposes the run cache and the test catalog.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;

pub use state::{ApiSettings, AppState};
