//! Reference counterpart server for local development.

pub mod routes;
pub mod storage;

pub use routes::{router, ApiError};
pub use storage::{AnimationStore, StorageError};
