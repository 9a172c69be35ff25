use depobs_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("failed to create job {job_name}: {reason}")]
    JobCreation { job_name: String, reason: String },

    #[error("cluster API error: {0}")]
    Cluster(String),

    #[error("job {job_name} finished as {phase}")]
    JobFailed { job_name: String, phase: String },

    #[error("gave up waiting for {what} after {attempts} polls")]
    PollExhausted { what: String, attempts: u32 },

    #[error("result delivery error: {0}")]
    Delivery(String),

    #[error("could not deserialize job results: {0}")]
    Deserialize(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("scoring error: {0}")]
    Scoring(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
