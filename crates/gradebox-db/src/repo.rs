//! Repository traits and implementations.

pub mod catalog;
pub mod run;
pub mod user;

pub use catalog::{PgCatalogRepo, test_ids};
pub use run::{PgRunRepo, RunFilter};
pub use user::{NewUser, PgUserRepo, User, UserRepo};
