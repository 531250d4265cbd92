//! Repository layer: raw SQL against the SQLite pool.

pub mod checkpoint_repo;
pub mod project_repo;

pub use checkpoint_repo::CheckpointRepo;
pub use project_repo::ProjectRepo;
