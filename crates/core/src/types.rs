/// Projects are keyed by time-ordered UUIDs (v7).
pub type ProjectId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Zero-based position of a scene within a project.
pub type SceneIndex = usize;
