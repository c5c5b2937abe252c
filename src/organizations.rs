//! Organization create, read, update and delete flows.

use chrono::{Datelike, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::schema::{
    FinancialStatement, Organization, OrganizationStatus, OrganizationType, StatementType,
};
use crate::statements::discard_blobs;
use crate::store::{BlobStorage, OrganizationStore, StatementStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOrganization {
    pub name: Option<String>,
    pub description: Option<String>,
    pub bank_account: Option<String>,
    /// Creates a child of this organization, which must itself be a parent.
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOrganization {
    pub name: Option<String>,
    pub bank_account: Option<String>,
    pub organization_type: Option<String>,
}

/// Statements of one organization with per-type counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementOverview {
    pub items: Vec<FinancialStatement>,
    pub total: usize,
    pub by_type: BTreeMap<StatementType, usize>,
    /// One flag per statement type.
    pub uploaded_documents: BTreeMap<StatementType, bool>,
}

impl StatementOverview {
    fn new(items: Vec<FinancialStatement>) -> Self {
        let mut by_type = BTreeMap::new();
        for statement in &items {
            *by_type.entry(statement.statement_type).or_insert(0) += 1;
        }
        let uploaded_documents = StatementType::ALL
            .iter()
            .map(|t| (*t, by_type.contains_key(t)))
            .collect();

        Self {
            total: items.len(),
            items,
            by_type,
            uploaded_documents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationListing {
    #[serde(flatten)]
    pub organization: Organization,
    pub statements: StatementOverview,
    pub children: Vec<OrganizationListing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationDetails {
    #[serde(flatten)]
    pub organization: Organization,
    /// Newest `year_current` among the statements, or this year when there are none.
    pub current_year: i32,
    pub parent: Option<Organization>,
    pub children: Vec<Organization>,
    pub statements: StatementOverview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationDeletion {
    pub organization_id: Uuid,
    pub statements_deleted: usize,
    pub files_deleted: Vec<String>,
}

fn required_name(name: &Option<String>) -> Result<&str> {
    name.as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| LedgerError::Validation("Organization name is required".to_string()))
}

#[derive(Clone)]
pub struct OrganizationService {
    organizations: Arc<dyn OrganizationStore>,
    statements: Arc<dyn StatementStore>,
    blobs: Arc<dyn BlobStorage>,
}

impl OrganizationService {
    pub fn new(
        organizations: Arc<dyn OrganizationStore>,
        statements: Arc<dyn StatementStore>,
        blobs: Arc<dyn BlobStorage>,
    ) -> Self {
        Self {
            organizations,
            statements,
            blobs,
        }
    }

    pub async fn create_organization(&self, request: &CreateOrganization) -> Result<Organization> {
        let name = required_name(&request.name)?;

        let organization_type = match request.parent_id {
            Some(parent_id) => {
                let parent = self
                    .organizations
                    .load_organization(parent_id)
                    .await?
                    .ok_or(LedgerError::ParentOrganizationNotFound(parent_id))?;
                if parent.organization_type != OrganizationType::Parent {
                    return Err(LedgerError::Validation(
                        "Child organizations cannot create sub-organizations".to_string(),
                    ));
                }
                OrganizationType::Child
            }
            None => OrganizationType::Parent,
        };

        let organization = Organization {
            description: request.description.clone(),
            bank_account: request.bank_account.clone(),
            organization_type,
            parent_id: request.parent_id,
            ..Organization::new(name)
        };
        self.organizations.insert_organization(&organization).await?;
        info!(
            "Created {:?} organization {}",
            organization.organization_type, organization.id
        );
        Ok(organization)
    }

    /// Active top-level organizations with their children and statements.
    pub async fn list_organizations(&self) -> Result<Vec<OrganizationListing>> {
        let all = self.organizations.list_organizations().await?;

        let mut listings = Vec::new();
        for organization in all
            .iter()
            .filter(|o| o.status == OrganizationStatus::Active && o.parent_id.is_none())
        {
            let mut children = Vec::new();
            for child in all.iter().filter(|c| c.parent_id == Some(organization.id)) {
                children.push(OrganizationListing {
                    organization: child.clone(),
                    statements: self.overview(child.id).await?,
                    children: Vec::new(),
                });
            }
            listings.push(OrganizationListing {
                organization: organization.clone(),
                statements: self.overview(organization.id).await?,
                children,
            });
        }
        Ok(listings)
    }

    pub async fn get_organization(&self, organization_id: Uuid) -> Result<OrganizationDetails> {
        let organization = self.load(organization_id).await?;

        let parent = match organization.parent_id {
            Some(parent_id) => self.organizations.load_organization(parent_id).await?,
            None => None,
        };
        let children = self
            .organizations
            .list_organizations()
            .await?
            .into_iter()
            .filter(|c| c.parent_id == Some(organization_id))
            .collect();

        let statements = self.overview(organization_id).await?;
        let current_year = statements
            .items
            .iter()
            .map(|s| s.year_current)
            .max()
            .unwrap_or_else(|| Utc::now().year());

        Ok(OrganizationDetails {
            organization,
            current_year,
            parent,
            children,
            statements,
        })
    }

    pub async fn update_organization(
        &self,
        organization_id: Uuid,
        request: &UpdateOrganization,
    ) -> Result<Organization> {
        let name = required_name(&request.name)?;
        let organization_type = request
            .organization_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(str::parse::<OrganizationType>)
            .transpose()?;

        let existing = self.load(organization_id).await?;
        let organization = Organization {
            name: name.to_string(),
            bank_account: request.bank_account.clone().filter(|b| !b.is_empty()),
            organization_type: organization_type.unwrap_or(existing.organization_type),
            updated_at: Utc::now(),
            ..existing
        };
        self.organizations.update_organization(&organization).await?;
        info!("Updated organization {}", organization_id);
        Ok(organization)
    }

    /// Delete the organization, its statements and their stored files.
    pub async fn delete_organization(&self, organization_id: Uuid) -> Result<OrganizationDeletion> {
        self.load(organization_id).await?;

        let statements = self
            .statements
            .statements_for_organization(organization_id)
            .await?;
        let files: Vec<String> = statements.iter().flat_map(|s| s.file_paths()).collect();
        discard_blobs(self.blobs.as_ref(), &files).await;

        self.organizations
            .delete_organization(organization_id)
            .await?;
        info!(
            "Deleted organization {} with {} statements",
            organization_id,
            statements.len()
        );

        Ok(OrganizationDeletion {
            organization_id,
            statements_deleted: statements.len(),
            files_deleted: files,
        })
    }

    async fn load(&self, organization_id: Uuid) -> Result<Organization> {
        self.organizations
            .load_organization(organization_id)
            .await?
            .ok_or(LedgerError::OrganizationNotFound(organization_id))
    }

    async fn overview(&self, organization_id: Uuid) -> Result<StatementOverview> {
        let statements = self
            .statements
            .statements_for_organization(organization_id)
            .await?;
        Ok(StatementOverview::new(statements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn service(store: &Arc<MemoryStore>) -> OrganizationService {
        OrganizationService::new(store.clone(), store.clone(), store.clone())
    }

    fn named(name: &str) -> CreateOrganization {
        CreateOrganization {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_child_of_child_is_rejected() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store);

        let parent = service.create_organization(&named("Induk")).await.unwrap();
        assert_eq!(parent.organization_type, OrganizationType::Parent);

        let child = service
            .create_organization(&CreateOrganization {
                parent_id: Some(parent.id),
                ..named("Cawangan")
            })
            .await
            .unwrap();
        assert_eq!(child.organization_type, OrganizationType::Child);

        let err = service
            .create_organization(&CreateOrganization {
                parent_id: Some(child.id),
                ..named("Cucu")
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Child organizations cannot create sub-organizations"
        );

        let err = service
            .create_organization(&CreateOrganization {
                parent_id: Some(Uuid::new_v4()),
                ..named("Yatim")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ParentOrganizationNotFound(_)));
    }

    #[tokio::test]
    async fn test_name_is_required() {
        let store = Arc::new(MemoryStore::default());
        let err = service(&store)
            .create_organization(&CreateOrganization::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Organization name is required");
    }

    #[tokio::test]
    async fn test_listing_nests_children_under_parents() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store);
        let parent = service.create_organization(&named("Induk")).await.unwrap();
        service
            .create_organization(&CreateOrganization {
                parent_id: Some(parent.id),
                ..named("Cawangan")
            })
            .await
            .unwrap();

        let listings = service.list_organizations().await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].organization.id, parent.id);
        assert_eq!(listings[0].children.len(), 1);
        assert_eq!(listings[0].statements.total, 0);
        assert_eq!(listings[0].statements.uploaded_documents.len(), 4);
        assert!(!listings[0].statements.uploaded_documents[&StatementType::Ledger]);
    }

    #[tokio::test]
    async fn test_update_validates_type_and_clears_bank_account() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store);
        let created = service
            .create_organization(&CreateOrganization {
                bank_account: Some("1234".to_string()),
                ..named("Lama")
            })
            .await
            .unwrap();

        let err = service
            .update_organization(
                created.id,
                &UpdateOrganization {
                    name: Some("Baru".to_string()),
                    organization_type: Some("branch".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid organization type. Must be 'parent' or 'child'"
        );

        let updated = service
            .update_organization(
                created.id,
                &UpdateOrganization {
                    name: Some("Baru".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Baru");
        assert_eq!(updated.bank_account, None);
        assert_eq!(updated.organization_type, OrganizationType::Parent);
        assert_eq!(updated.created_at, created.created_at);

        let err = service
            .update_organization(Uuid::new_v4(), &UpdateOrganization {
                name: Some("X".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_details_default_to_current_year_without_statements() {
        let store = Arc::new(MemoryStore::default());
        let service = service(&store);
        let parent = service.create_organization(&named("Induk")).await.unwrap();

        let details = service.get_organization(parent.id).await.unwrap();
        assert_eq!(details.current_year, Utc::now().year());
        assert!(details.parent.is_none());

        let err = service.get_organization(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::OrganizationNotFound(_)));
    }
}
