//! Collaborator contracts for persistence and blob storage.
//!
//! The job manager and statement flows only talk to these traits. Backends are
//! constructed by the process entry point and passed in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{
    FinancialStatement, GenerationJob, GroupItem, JobStatus, LedgerEntry, Organization,
    StatementGroup, StatementStatus, StatementType,
};

/// Ledger entry as read back for a statement group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLedgerEntry {
    pub section: String,
    pub label: String,
    pub amount_current: Option<f64>,
    pub amount_previous: Option<f64>,
    pub is_total: bool,
    pub parent_section: Option<String>,
    pub sort_order: u32,
}

impl From<&LedgerEntry> for StoredLedgerEntry {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            section: entry.section.clone(),
            label: entry.label.clone(),
            amount_current: entry.amount_current,
            amount_previous: entry.amount_previous,
            is_total: entry.is_total,
            parent_section: entry.parent_section.clone(),
            sort_order: entry.sort_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatement {
    pub statement_type: StatementType,
    pub year_current: Option<i32>,
    pub year_previous: Option<i32>,
    pub entries: Vec<StoredLedgerEntry>,
}

/// Upstream data needed to generate a ledger for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupContext {
    pub organization_name: String,
    pub statements: Vec<GroupStatement>,
}

/// Failures while assembling a [`GroupContext`]. All of them are fatal for a job.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("Failed to fetch group data: group {0} not found")]
    GroupNotFound(Uuid),

    #[error("Organization data is missing or invalid")]
    OrganizationMissing,

    #[error("No statements found for processing")]
    NoStatements,

    #[error("Failed to fetch statements: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with `ActiveJobExists` when the group already has a
    /// pending or processing job.
    async fn insert_job(&self, job: &GenerationJob) -> Result<()>;

    /// Overwrite a stored job. Fails with `InvalidTransition` if the stored copy is
    /// already terminal, and `JobNotFound` if it does not exist.
    async fn update_job(&self, job: &GenerationJob) -> Result<()>;

    async fn load_job(&self, job_id: Uuid) -> Result<Option<GenerationJob>>;

    /// Newest job for the group whose status is in `statuses` (any status if empty).
    async fn latest_job_for_group(
        &self,
        group_id: Uuid,
        statuses: &[JobStatus],
    ) -> Result<Option<GenerationJob>>;
}

#[async_trait]
pub trait GroupSource: Send + Sync {
    async fn fetch_group_context(
        &self,
        group_id: Uuid,
    ) -> std::result::Result<GroupContext, ContextError>;
}

#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn insert_organization(&self, organization: &Organization) -> Result<()>;

    async fn load_organization(&self, organization_id: Uuid) -> Result<Option<Organization>>;

    /// Every organization, oldest first.
    async fn list_organizations(&self) -> Result<Vec<Organization>>;

    async fn update_organization(&self, organization: &Organization) -> Result<()>;

    /// Remove the organization with its statements, their entries and group items.
    /// Child organizations are detached, not removed.
    async fn delete_organization(&self, organization_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait StatementStore: Send + Sync {
    async fn find_statement(
        &self,
        organization_id: Uuid,
        statement_type: StatementType,
    ) -> Result<Option<FinancialStatement>>;

    async fn load_statement(&self, statement_id: Uuid) -> Result<Option<FinancialStatement>>;

    async fn load_statements(&self, statement_ids: &[Uuid]) -> Result<Vec<FinancialStatement>>;

    /// Statements of one organization, newest first.
    async fn statements_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<FinancialStatement>>;

    /// Insert or replace by id.
    async fn save_statement(&self, statement: &FinancialStatement) -> Result<()>;

    async fn set_statement_status(
        &self,
        statement_ids: &[Uuid],
        status: StatementStatus,
    ) -> Result<()>;

    async fn delete_statement(&self, statement_id: Uuid) -> Result<()>;

    /// Delete any existing entries of the statement and insert `entries`.
    async fn replace_entries(&self, statement_id: Uuid, entries: &[LedgerEntry]) -> Result<()>;

    async fn delete_entries(&self, statement_id: Uuid) -> Result<()>;

    /// Entries of the statement in sort order.
    async fn load_entries(&self, statement_id: Uuid) -> Result<Vec<LedgerEntry>>;

    /// Remove every statement and entry. Returns the number of statements removed.
    async fn clear_statements(&self) -> Result<usize>;
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn load_group(&self, group_id: Uuid) -> Result<Option<StatementGroup>>;

    async fn save_group(&self, group: &StatementGroup) -> Result<()>;

    /// Every group, newest first.
    async fn list_groups(&self) -> Result<Vec<StatementGroup>>;

    async fn group_items(&self, group_id: Uuid) -> Result<Vec<GroupItem>>;

    async fn replace_group_items(&self, group_id: Uuid, items: &[GroupItem]) -> Result<()>;

    /// Remove the group together with its items.
    async fn delete_group(&self, group_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload_blob(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    fn get_public_url(&self, path: &str) -> String;

    async fn download_blob(&self, path: &str) -> Result<Vec<u8>>;

    async fn list_blobs(&self, prefix: &str) -> Result<Vec<String>>;

    async fn remove_blobs(&self, paths: &[String]) -> Result<()>;
}
