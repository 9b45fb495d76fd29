//! Clients for the services Gradebox collaborates with.

pub mod github;
pub mod s3;

pub use github::{GitHubClient, StaticToken, TokenSource};
pub use s3::S3ObjectStore;
