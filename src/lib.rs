//! # Koperasi Ledger
//!
//! Backend core for cooperative financial statements: uploaded spreadsheets are
//! parsed into ordered ledger entries, statements are grouped, and an LLM is asked
//! to produce a ledger with audit risk assessments for each group.
//!
//! ## Core Concepts
//!
//! - **Statement Parser**: turns a three column sheet (label, previous year, current
//!   year) into ledger entries. Rows whose value cell is `#` open a new section.
//! - **Generation Jobs**: `pending -> processing -> completed | failed`, at most one
//!   active job per group, retried with linear backoff in a background task.
//! - **Analysis**: a single statement can be reviewed by the same generator, which
//!   returns audit issues and a summary stored on the statement.
//! - **Collaborators**: storage and the LLM are reached only through the traits in
//!   [`store`] and [`llm`], so any backend can be plugged in.
//!
//! ## Example
//!
//! ```rust,ignore
//! use koperasi_ledger::*;
//! use std::sync::Arc;
//!
//! let config = AppConfig::from_env()?;
//! let store = Arc::new(MemoryStore::new(config.storage_bucket.clone()));
//! let generator = Arc::new(OpenAiClient::new(&config.openai.unwrap_or_default())?);
//!
//! let jobs = JobManager::new(store.clone(), store.clone(), generator, config.generation);
//! let handle = jobs.start_or_attach(group_id).await?;
//!
//! let view = jobs.get_status(JobQuery::Job(handle.job_id)).await?;
//! println!("{}", serde_json::to_string_pretty(&view)?);
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod groups;
pub mod ingestion;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod organizations;
pub mod response;
pub mod schema;
pub mod statements;
pub mod store;
pub mod utils;

pub use analysis::{analysis_sampling, StatementAnalyzer};
pub use config::{AppConfig, GenerationSettings, OpenAiSettings};
pub use error::{LedgerError, Result};
pub use groups::{
    DeletedGroup, GroupDetails, GroupList, GroupMember, GroupOverview, GroupService,
    GroupStatementStats, IssueTotals, SaveGroupRequest, SavedGroup,
};
pub use ingestion::*;
pub use jobs::{job_view, JobFailure, JobHandle, JobManager, JobQuery, JobStatusData, MAX_ATTEMPTS};
pub use llm::{
    ChatMessage, ChatRole, GenerationError, GenerationErrorKind, GenerationRequest,
    SamplingParams, StructureGenerator,
};
#[cfg(feature = "openai")]
pub use llm::OpenAiClient;
pub use memory::MemoryStore;
pub use organizations::{
    CreateOrganization, OrganizationDeletion, OrganizationDetails, OrganizationListing,
    OrganizationService, StatementOverview, UpdateOrganization,
};
pub use response::{ApiResponse, ResponseStatus};
pub use schema::*;
pub use statements::{
    entries_by_section, ClearSummary, ImportedStatement, StatementDeletion, StatementDetails,
    StatementService, StatementUpload,
};
pub use store::{
    BlobStorage, ContextError, GroupContext, GroupSource, GroupStatement, GroupStore, JobStore,
    OrganizationStore, StatementStore, StoredLedgerEntry,
};
pub use utils::*;
