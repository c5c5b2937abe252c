//! Statement group create-or-update, read and delete flows.

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::schema::{GroupItem, StatementGroup, StatementStatus, StatementType};
use crate::statements::{entries_by_section, StatementDetails};
use crate::store::{GroupStore, StatementStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub statement_id: Uuid,
    #[serde(rename = "type")]
    pub statement_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveGroupRequest {
    /// Present when updating an existing group.
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Defaults to the organization of the first member statement.
    pub organization_id: Option<Uuid>,
    pub statements: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGroup {
    pub group_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub statements_count: usize,
    pub statements_confirmed: bool,
    pub is_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedGroup {
    pub group_id: Uuid,
    pub name: String,
    pub statements_deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTotals {
    pub total_major_issues: u32,
    pub total_minor_issues: u32,
}

/// Counts over the member statements of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStatementStats {
    pub total: usize,
    pub by_type: BTreeMap<StatementType, usize>,
    pub by_status: BTreeMap<StatementStatus, usize>,
    pub has_issues: bool,
    /// Present only when the analyses found at least one issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<IssueTotals>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOverview {
    #[serde(flatten)]
    pub group: StatementGroup,
    pub statements: GroupStatementStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupList {
    pub total_groups: usize,
    pub groups: Vec<GroupOverview>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDetails {
    #[serde(flatten)]
    pub group: StatementGroup,
    pub statements_count: usize,
    pub statements: BTreeMap<StatementType, StatementDetails>,
}

fn validate_members(members: &[GroupMember]) -> Result<Vec<StatementType>> {
    let invalid: Vec<&str> = members
        .iter()
        .map(|m| m.statement_type.as_str())
        .filter(|t| t.parse::<StatementType>().is_err())
        .collect();
    if !invalid.is_empty() {
        return Err(LedgerError::Validation(format!(
            "Invalid statement types: {}",
            invalid.join(", ")
        )));
    }

    let types = members
        .iter()
        .map(|m| m.statement_type.parse::<StatementType>())
        .collect::<Result<Vec<_>>>()?;

    let distinct: HashSet<_> = types.iter().collect();
    if distinct.len() != types.len() {
        return Err(LedgerError::Validation(
            "Duplicate statement types are not allowed".to_string(),
        ));
    }

    let ids: HashSet<Uuid> = members.iter().map(|m| m.statement_id).collect();
    if ids.len() != members.len() {
        return Err(LedgerError::Validation(
            "Duplicate statements are not allowed".to_string(),
        ));
    }
    Ok(types)
}

#[derive(Clone)]
pub struct GroupService {
    groups: Arc<dyn GroupStore>,
    statements: Arc<dyn StatementStore>,
}

impl GroupService {
    pub fn new(groups: Arc<dyn GroupStore>, statements: Arc<dyn StatementStore>) -> Self {
        Self { groups, statements }
    }

    pub async fn save_group(&self, request: &SaveGroupRequest) -> Result<SavedGroup> {
        let name = request
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .filter(|_| !request.statements.is_empty())
            .ok_or_else(|| {
                LedgerError::Validation("Name and statements array are required".to_string())
            })?;

        let types = validate_members(&request.statements)?;

        let statement_ids: Vec<Uuid> = request.statements.iter().map(|m| m.statement_id).collect();
        let found = self.statements.load_statements(&statement_ids).await?;
        if found.len() != statement_ids.len() {
            return Err(LedgerError::Validation(
                "One or more statements not found".to_string(),
            ));
        }

        let now = Utc::now();
        let organization_id = request
            .organization_id
            .or_else(|| found.first().map(|s| s.organization_id));

        let group = match request.id {
            Some(id) => {
                let existing = self
                    .groups
                    .load_group(id)
                    .await?
                    .ok_or(LedgerError::GroupNotFound(id))?;
                StatementGroup {
                    name: name.to_string(),
                    description: request.description.clone(),
                    organization_id: organization_id.or(existing.organization_id),
                    updated_at: now,
                    ..existing
                }
            }
            None => StatementGroup {
                id: Uuid::new_v4(),
                name: name.to_string(),
                description: request.description.clone(),
                organization_id,
                created_at: now,
                updated_at: now,
            },
        };
        self.groups.save_group(&group).await?;

        let items: Vec<GroupItem> = request
            .statements
            .iter()
            .zip(types)
            .map(|(member, statement_type)| GroupItem {
                group_id: group.id,
                statement_id: member.statement_id,
                statement_type,
            })
            .collect();

        if let Err(e) = self.groups.replace_group_items(group.id, &items).await {
            error!("Failed to add statements to group {}: {}", group.id, e);
            if request.id.is_none() {
                if let Err(cleanup) = self.groups.delete_group(group.id).await {
                    error!("Failed to remove partial group {}: {}", group.id, cleanup);
                }
            }
            return Err(e);
        }

        let statements_confirmed = match self
            .statements
            .set_statement_status(&statement_ids, StatementStatus::Confirmed)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to confirm statements of group {}: {}", group.id, e);
                false
            }
        };

        info!(
            "Saved group {} with {} statements",
            group.id,
            statement_ids.len()
        );

        Ok(SavedGroup {
            group_id: group.id,
            name: group.name,
            description: group.description,
            created_at: group.created_at,
            updated_at: group.updated_at,
            statements_count: statement_ids.len(),
            statements_confirmed,
            is_update: request.id.is_some(),
        })
    }

    /// Every group, newest first, with counts over its member statements.
    pub async fn list_groups(&self) -> Result<GroupList> {
        let mut groups = Vec::new();
        for group in self.groups.list_groups().await? {
            let statements = self.member_stats(group.id).await?;
            groups.push(GroupOverview { group, statements });
        }
        Ok(GroupList {
            total_groups: groups.len(),
            groups,
        })
    }

    async fn member_stats(&self, group_id: Uuid) -> Result<GroupStatementStats> {
        let items = self.groups.group_items(group_id).await?;
        let ids: Vec<Uuid> = items.iter().map(|i| i.statement_id).collect();
        let statements = self.statements.load_statements(&ids).await?;

        let mut stats = GroupStatementStats::default();
        let mut issues = IssueTotals::default();
        for item in &items {
            let Some(statement) = statements.iter().find(|s| s.id == item.statement_id) else {
                continue;
            };
            stats.total += 1;
            *stats.by_type.entry(item.statement_type).or_insert(0) += 1;
            *stats.by_status.entry(statement.status).or_insert(0) += 1;

            if let Some(analysis) = &statement.analysis_result {
                issues.total_major_issues += analysis.summary.major_issues;
                issues.total_minor_issues += analysis.summary.minor_issues;
            }
        }

        stats.has_issues = issues != IssueTotals::default();
        stats.issues = stats.has_issues.then_some(issues);
        Ok(stats)
    }

    /// The group with each member statement keyed by type.
    pub async fn get_group(&self, group_id: Uuid) -> Result<GroupDetails> {
        let group = self
            .groups
            .load_group(group_id)
            .await?
            .ok_or(LedgerError::GroupNotFound(group_id))?;
        let items = self.groups.group_items(group_id).await?;
        let ids: Vec<Uuid> = items.iter().map(|i| i.statement_id).collect();

        let mut statements = BTreeMap::new();
        for statement in self.statements.load_statements(&ids).await? {
            let Some(item) = items.iter().find(|i| i.statement_id == statement.id) else {
                continue;
            };
            let entries = self.statements.load_entries(statement.id).await?;
            statements.insert(
                item.statement_type,
                StatementDetails {
                    statement,
                    entries: entries_by_section(entries),
                },
            );
        }

        Ok(GroupDetails {
            group,
            statements_count: statements.len(),
            statements,
        })
    }

    pub async fn delete_group(&self, group_id: Uuid) -> Result<DeletedGroup> {
        let group = self
            .groups
            .load_group(group_id)
            .await?
            .ok_or(LedgerError::GroupNotFound(group_id))?;
        let items = self.groups.group_items(group_id).await?;

        self.groups.delete_group(group_id).await?;
        info!("Deleted group {} ({} items)", group_id, items.len());

        Ok(DeletedGroup {
            group_id,
            name: group.name,
            statements_deleted: items.len(),
        })
    }
}
