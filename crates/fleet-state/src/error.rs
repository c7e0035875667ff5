//! Job and hash store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures of the job/hash store. The redb variants carry the underlying
/// message; the store never retries.
#[derive(Debug, Error)]
pub enum StateError {
    /// Creating or opening the database file (or the in-memory backend).
    #[error("cannot open job store: {0}")]
    Open(String),

    /// Beginning or committing a transaction. A failed commit leaves the
    /// previously persisted job state in place.
    #[error("job store transaction failed: {0}")]
    Transaction(String),

    /// Opening the `jobs` or `component_hashes` table.
    #[error("job store table unavailable: {0}")]
    Table(String),

    /// `get_job`, `list_jobs` or `get_component_hashes` lookups and scans.
    #[error("failed to read job store: {0}")]
    Read(String),

    /// `put_job`, `delete_job` or a hash update.
    #[error("failed to write job store: {0}")]
    Write(String),

    /// Encoding a job state or hash record as JSON.
    #[error("cannot encode record: {0}")]
    Serialize(String),

    /// A stored record no longer decodes, e.g. written by an incompatible
    /// version.
    #[error("corrupt record: {0}")]
    Deserialize(String),

    /// A deploy job's parameter bag is missing or has a bad component/sha.
    #[error("invalid job parameters: {0}")]
    InvalidParams(String),
}
