//! In-process implementation of every collaborator trait.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::schema::{
    FinancialStatement, GenerationJob, GroupItem, JobStatus, LedgerEntry, Organization,
    StatementGroup, StatementStatus, StatementType,
};
use crate::store::*;

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    organizations: HashMap<Uuid, Organization>,
    statements: HashMap<Uuid, FinancialStatement>,
    entries: HashMap<Uuid, Vec<LedgerEntry>>,
    groups: HashMap<Uuid, StatementGroup>,
    group_items: Vec<GroupItem>,
    jobs: Vec<GenerationJob>,
    blobs: BTreeMap<String, StoredBlob>,
}

pub struct MemoryStore {
    bucket: String,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Register an active top-level organization and return its id.
    pub async fn add_organization(&self, name: impl Into<String>) -> Uuid {
        let organization = Organization::new(name);
        let id = organization.id;
        self.state
            .write()
            .await
            .organizations
            .insert(id, organization);
        id
    }

    pub async fn entries_for(&self, statement_id: Uuid) -> Vec<LedgerEntry> {
        self.state
            .read()
            .await
            .entries
            .get(&statement_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.state.read().await.blobs.get(path).cloned()
    }

    pub async fn jobs_for_group(&self, group_id: Uuid) -> Vec<GenerationJob> {
        self.state
            .read()
            .await
            .jobs
            .iter()
            .filter(|j| j.group_id == group_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_STORAGE_BUCKET)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &GenerationJob) -> Result<()> {
        let mut state = self.state.write().await;
        let conflict = job.status.is_active()
            && state
                .jobs
                .iter()
                .any(|j| j.group_id == job.group_id && j.status.is_active());
        if conflict {
            return Err(LedgerError::ActiveJobExists {
                group_id: job.group_id,
            });
        }
        state.jobs.push(job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &GenerationJob) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or(LedgerError::JobNotFound(job.id))?;

        if stored.status.is_terminal() {
            return Err(LedgerError::InvalidTransition {
                from: stored.status,
                to: job.status,
            });
        }
        *stored = job.clone();
        Ok(())
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<GenerationJob>> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn latest_job_for_group(
        &self,
        group_id: Uuid,
        statuses: &[JobStatus],
    ) -> Result<Option<GenerationJob>> {
        let state = self.state.read().await;
        // Later inserts win ties on created_at.
        let latest = state
            .jobs
            .iter()
            .filter(|j| j.group_id == group_id)
            .filter(|j| statuses.is_empty() || statuses.contains(&j.status))
            .fold(None::<&GenerationJob>, |best, j| match best {
                Some(b) if b.created_at > j.created_at => Some(b),
                _ => Some(j),
            });
        Ok(latest.cloned())
    }
}

#[async_trait]
impl GroupSource for MemoryStore {
    async fn fetch_group_context(
        &self,
        group_id: Uuid,
    ) -> std::result::Result<GroupContext, ContextError> {
        let state = self.state.read().await;
        let group = state
            .groups
            .get(&group_id)
            .ok_or(ContextError::GroupNotFound(group_id))?;

        let organization_name = group
            .organization_id
            .and_then(|id| state.organizations.get(&id))
            .map(|o| o.name.clone())
            .filter(|name| !name.trim().is_empty())
            .ok_or(ContextError::OrganizationMissing)?;

        let statements: Vec<GroupStatement> = state
            .group_items
            .iter()
            .filter(|item| item.group_id == group_id)
            .map(|item| {
                let statement = state.statements.get(&item.statement_id);
                let mut entries: Vec<StoredLedgerEntry> = state
                    .entries
                    .get(&item.statement_id)
                    .map(|es| es.iter().map(StoredLedgerEntry::from).collect())
                    .unwrap_or_default();
                entries.sort_by_key(|e| e.sort_order);
                GroupStatement {
                    statement_type: item.statement_type,
                    year_current: statement.map(|s| s.year_current),
                    year_previous: statement.map(|s| s.year_previous),
                    entries,
                }
            })
            .collect();

        if statements.is_empty() {
            return Err(ContextError::NoStatements);
        }

        Ok(GroupContext {
            organization_name,
            statements,
        })
    }
}

#[async_trait]
impl OrganizationStore for MemoryStore {
    async fn insert_organization(&self, organization: &Organization) -> Result<()> {
        self.state
            .write()
            .await
            .organizations
            .insert(organization.id, organization.clone());
        Ok(())
    }

    async fn load_organization(&self, organization_id: Uuid) -> Result<Option<Organization>> {
        Ok(self
            .state
            .read()
            .await
            .organizations
            .get(&organization_id)
            .cloned())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let state = self.state.read().await;
        let mut organizations: Vec<Organization> = state.organizations.values().cloned().collect();
        organizations.sort_by_key(|o| o.created_at);
        Ok(organizations)
    }

    async fn update_organization(&self, organization: &Organization) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .organizations
            .get_mut(&organization.id)
            .ok_or(LedgerError::OrganizationNotFound(organization.id))?;
        *stored = organization.clone();
        Ok(())
    }

    async fn delete_organization(&self, organization_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let owned: Vec<Uuid> = state
            .statements
            .values()
            .filter(|s| s.organization_id == organization_id)
            .map(|s| s.id)
            .collect();
        for id in &owned {
            state.statements.remove(id);
            state.entries.remove(id);
        }
        state.group_items.retain(|i| !owned.contains(&i.statement_id));

        for child in state.organizations.values_mut() {
            if child.parent_id == Some(organization_id) {
                child.parent_id = None;
            }
        }
        state.organizations.remove(&organization_id);
        Ok(())
    }
}

#[async_trait]
impl StatementStore for MemoryStore {
    async fn find_statement(
        &self,
        organization_id: Uuid,
        statement_type: StatementType,
    ) -> Result<Option<FinancialStatement>> {
        let state = self.state.read().await;
        Ok(state
            .statements
            .values()
            .find(|s| s.organization_id == organization_id && s.statement_type == statement_type)
            .cloned())
    }

    async fn load_statement(&self, statement_id: Uuid) -> Result<Option<FinancialStatement>> {
        Ok(self.state.read().await.statements.get(&statement_id).cloned())
    }

    async fn load_statements(&self, statement_ids: &[Uuid]) -> Result<Vec<FinancialStatement>> {
        let state = self.state.read().await;
        Ok(statement_ids
            .iter()
            .filter_map(|id| state.statements.get(id).cloned())
            .collect())
    }

    async fn statements_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<FinancialStatement>> {
        let state = self.state.read().await;
        let mut statements: Vec<FinancialStatement> = state
            .statements
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect();
        statements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(statements)
    }

    async fn save_statement(&self, statement: &FinancialStatement) -> Result<()> {
        self.state
            .write()
            .await
            .statements
            .insert(statement.id, statement.clone());
        Ok(())
    }

    async fn set_statement_status(
        &self,
        statement_ids: &[Uuid],
        status: StatementStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for id in statement_ids {
            if let Some(statement) = state.statements.get_mut(id) {
                statement.status = status;
                statement.updated_at = now;
            }
        }
        Ok(())
    }

    async fn delete_statement(&self, statement_id: Uuid) -> Result<()> {
        self.state.write().await.statements.remove(&statement_id);
        Ok(())
    }

    async fn replace_entries(&self, statement_id: Uuid, entries: &[LedgerEntry]) -> Result<()> {
        self.state
            .write()
            .await
            .entries
            .insert(statement_id, entries.to_vec());
        Ok(())
    }

    async fn delete_entries(&self, statement_id: Uuid) -> Result<()> {
        self.state.write().await.entries.remove(&statement_id);
        Ok(())
    }

    async fn load_entries(&self, statement_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let mut entries = self.entries_for(statement_id).await;
        entries.sort_by_key(|e| e.sort_order);
        Ok(entries)
    }

    async fn clear_statements(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let removed = state.statements.len();
        state.statements.clear();
        state.entries.clear();
        Ok(removed)
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn load_group(&self, group_id: Uuid) -> Result<Option<StatementGroup>> {
        Ok(self.state.read().await.groups.get(&group_id).cloned())
    }

    async fn save_group(&self, group: &StatementGroup) -> Result<()> {
        self.state
            .write()
            .await
            .groups
            .insert(group.id, group.clone());
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<StatementGroup>> {
        let state = self.state.read().await;
        let mut groups: Vec<StatementGroup> = state.groups.values().cloned().collect();
        groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(groups)
    }

    async fn group_items(&self, group_id: Uuid) -> Result<Vec<GroupItem>> {
        let state = self.state.read().await;
        Ok(state
            .group_items
            .iter()
            .filter(|i| i.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn replace_group_items(&self, group_id: Uuid, items: &[GroupItem]) -> Result<()> {
        let mut state = self.state.write().await;
        state.group_items.retain(|i| i.group_id != group_id);
        state.group_items.extend_from_slice(items);
        Ok(())
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state.group_items.retain(|i| i.group_id != group_id);
        state.groups.remove(&group_id);
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for MemoryStore {
    async fn upload_blob(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.state.write().await.blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn get_public_url(&self, path: &str) -> String {
        format!("memory://{}/{}", self.bucket, path)
    }

    async fn download_blob(&self, path: &str) -> Result<Vec<u8>> {
        self.blob(path)
            .await
            .map(|b| b.bytes)
            .ok_or_else(|| LedgerError::Storage(format!("Object not found: {}", path)))
    }

    async fn list_blobs(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .blobs
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn remove_blobs(&self, paths: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        for path in paths {
            state.blobs.remove(path);
        }
        Ok(())
    }
}
