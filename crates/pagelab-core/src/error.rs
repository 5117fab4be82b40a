//! Error types for PageLab.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The job queue could not be created for a reason other than "already exists".
    #[error("queue provisioning failed: {0}")]
    QueueProvisioning(String),

    /// The job-source API was unreachable or returned an unexpected body.
    #[error("job source fetch failed: {0}")]
    JobSource(String),

    /// A dequeued job carried a URL that is not a well-formed absolute URL.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("audit engine failed: {0}")]
    AuditEngine(String),

    #[error("result delivery failed: {0}")]
    ResultDelivery(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {}", err))
    }
}
