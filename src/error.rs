use thiserror::Error;
use uuid::Uuid;

use crate::llm::GenerationError;
use crate::schema::JobStatus;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid statement type. Must be one of: {valid}")]
    UnknownStatementType { given: String, valid: String },

    #[error("Financial statement not found: {0}")]
    StatementNotFound(Uuid),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    #[error("Parent organization not found: {0}")]
    ParentOrganizationNotFound(Uuid),

    #[error("Statement group not found: {0}")]
    GroupNotFound(Uuid),

    #[error("Generation job not found: {0}")]
    JobNotFound(Uuid),

    #[error("No generation process found for group {0}")]
    NoJobsForGroup(Uuid),

    #[error("Group {group_id} already has an active generation job")]
    ActiveJobExists { group_id: Uuid },

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("Invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// True for errors that correspond to a missing record rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::StatementNotFound(_)
                | LedgerError::OrganizationNotFound(_)
                | LedgerError::ParentOrganizationNotFound(_)
                | LedgerError::GroupNotFound(_)
                | LedgerError::JobNotFound(_)
                | LedgerError::NoJobsForGroup(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
