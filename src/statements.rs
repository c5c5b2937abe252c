//! Statement upload, deletion and status flows.

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::ingestion::{assign_statement_id, parse_statement_rows, read_statement_rows};
use crate::schema::{FinancialStatement, LedgerEntry, StatementStatus, StatementType, StoredFile};
use crate::store::{BlobStorage, StatementStore};
use crate::utils::{decode_base64_payload, extract_year};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const REFERENCE_CONTENT_TYPE: &str = "text/plain";
pub const REFERENCE_PREFIX: &str = "references";

/// Upload request as received from a caller. Files are base64, optionally with a
/// `data:...;base64,` prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementUpload {
    #[serde(rename = "type")]
    pub statement_type: String,
    pub organization_id: Option<Uuid>,
    pub state: Option<String>,
    pub audited_by: Option<String>,
    pub reviewed_by: Option<String>,
    pub year_current: Option<String>,
    pub year_previous: Option<String>,
    pub statement_file: Option<String>,
    pub reference_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedStatement {
    pub statement_id: Uuid,
    pub organization_id: Uuid,
    pub year_current: i32,
    pub year_previous: i32,
    pub statement_file: StoredFile,
    pub reference_file: Option<StoredFile>,
    pub entries_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementDeletion {
    pub statement_id: Uuid,
    pub files_deleted: Vec<String>,
    pub entries_deleted: bool,
    pub reference_files_deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearSummary {
    pub statement_files_deleted: usize,
    pub reference_files_deleted: usize,
    pub total_files_deleted: usize,
    pub statements_deleted: usize,
}

/// A statement with its entries grouped by section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementDetails {
    #[serde(flatten)]
    pub statement: FinancialStatement,
    pub entries: BTreeMap<String, Vec<LedgerEntry>>,
}

/// Group entries by section, each section in sort order.
pub fn entries_by_section(entries: Vec<LedgerEntry>) -> BTreeMap<String, Vec<LedgerEntry>> {
    let mut sections: BTreeMap<String, Vec<LedgerEntry>> = BTreeMap::new();
    for entry in entries {
        sections.entry(entry.section.clone()).or_default().push(entry);
    }
    for section in sections.values_mut() {
        section.sort_by_key(|e| e.sort_order);
    }
    sections
}

/// Best-effort removal; failures are logged and swallowed.
pub(crate) async fn discard_blobs(blobs: &dyn BlobStorage, paths: &[String]) {
    if paths.is_empty() {
        return;
    }
    debug!("Removing {} blobs", paths.len());
    if let Err(e) = blobs.remove_blobs(paths).await {
        warn!("Failed to remove files from storage, continuing: {}", e);
    }
}

struct ValidatedUpload<'a> {
    statement_type: StatementType,
    organization_id: Uuid,
    state: &'a str,
    audited_by: &'a str,
    reviewed_by: &'a str,
    year_current: i32,
    year_previous: i32,
    statement_file: &'a str,
    reference_file: Option<&'a str>,
}

fn missing(field: &str) -> LedgerError {
    LedgerError::Validation(format!("Missing required field: {}", field))
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing(field))
}

impl StatementUpload {
    fn validate(&self) -> Result<ValidatedUpload<'_>> {
        let statement_type: StatementType = self.statement_type.parse()?;

        let year_current = self.year_current.as_deref().and_then(extract_year);
        let year_previous = self.year_previous.as_deref().and_then(extract_year);
        let (Some(year_current), Some(year_previous)) = (year_current, year_previous) else {
            return Err(LedgerError::Validation(
                "Invalid year format provided".to_string(),
            ));
        };

        let organization_id = self
            .organization_id
            .ok_or_else(|| missing("organization_id"))?;

        Ok(ValidatedUpload {
            statement_type,
            organization_id,
            state: required(&self.state, "state")?,
            audited_by: required(&self.audited_by, "audited_by")?,
            reviewed_by: required(&self.reviewed_by, "reviewed_by")?,
            year_current,
            year_previous,
            statement_file: required(&self.statement_file, "statement_file")?,
            reference_file: self.reference_file.as_deref().filter(|v| !v.is_empty()),
        })
    }
}

#[derive(Clone)]
pub struct StatementService {
    statements: Arc<dyn StatementStore>,
    blobs: Arc<dyn BlobStorage>,
}

impl StatementService {
    pub fn new(statements: Arc<dyn StatementStore>, blobs: Arc<dyn BlobStorage>) -> Self {
        Self { statements, blobs }
    }

    /// Parse an uploaded workbook and store it together with its ledger entries.
    ///
    /// An existing statement of the same type for the organization is replaced in
    /// place, keeping its id.
    pub async fn import_statement(&self, upload: &StatementUpload) -> Result<ImportedStatement> {
        info!("Importing {} statement", upload.statement_type);
        let upload = upload.validate()?;

        let workbook = decode_base64_payload(upload.statement_file)?;
        let reference = upload.reference_file.map(decode_base64_payload).transpose()?;

        let rows = read_statement_rows(&workbook)?;
        let mut entries = parse_statement_rows(&rows, upload.year_current, upload.year_previous);

        let existing = self
            .statements
            .find_statement(upload.organization_id, upload.statement_type)
            .await?;

        let millis = Utc::now().timestamp_millis();
        let statement_name = format!("{}-statement.xlsx", millis);
        let statement_path = format!("{}/{}", upload.statement_type, statement_name);

        self.blobs
            .upload_blob(&statement_path, workbook, XLSX_CONTENT_TYPE)
            .await?;
        let mut uploaded = vec![statement_path.clone()];
        let statement_file = StoredFile {
            url: self.blobs.get_public_url(&statement_path),
            name: statement_name,
            path: statement_path,
        };

        let reference_file = match reference {
            Some(bytes) => {
                let name = format!("{}-reference.txt", millis);
                let path = format!("{}/{}", REFERENCE_PREFIX, name);
                if let Err(e) = self
                    .blobs
                    .upload_blob(&path, bytes, REFERENCE_CONTENT_TYPE)
                    .await
                {
                    self.discard_blobs(&uploaded).await;
                    return Err(e);
                }
                uploaded.push(path.clone());
                Some(StoredFile {
                    url: self.blobs.get_public_url(&path),
                    name,
                    path,
                })
            }
            None => None,
        };

        let now = Utc::now();
        let statement = FinancialStatement {
            id: existing.as_ref().map(|s| s.id).unwrap_or_else(Uuid::new_v4),
            organization_id: upload.organization_id,
            statement_type: upload.statement_type,
            status: StatementStatus::Draft,
            state: upload.state.to_string(),
            audited_by: upload.audited_by.to_string(),
            reviewed_by: upload.reviewed_by.to_string(),
            year_current: upload.year_current,
            year_previous: upload.year_previous,
            statement_file,
            reference_file,
            analysis_result: None,
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };

        if let Err(e) = self.statements.save_statement(&statement).await {
            error!("Failed to write statement record: {}", e);
            self.discard_blobs(&uploaded).await;
            return Err(e);
        }

        assign_statement_id(&mut entries, statement.id);
        self.statements
            .replace_entries(statement.id, &entries)
            .await?;

        if let Some(previous) = existing {
            let stale: Vec<String> = previous
                .file_paths()
                .into_iter()
                .filter(|p| !uploaded.contains(p))
                .collect();
            self.discard_blobs(&stale).await;
        }

        info!(
            "Stored statement {} with {} entries",
            statement.id,
            entries.len()
        );

        Ok(ImportedStatement {
            statement_id: statement.id,
            organization_id: statement.organization_id,
            year_current: statement.year_current,
            year_previous: statement.year_previous,
            statement_file: statement.statement_file,
            reference_file: statement.reference_file,
            entries_count: entries.len(),
        })
    }

    pub async fn delete_statement(&self, statement_id: Uuid) -> Result<StatementDeletion> {
        let statement = self
            .statements
            .load_statement(statement_id)
            .await?
            .ok_or(LedgerError::StatementNotFound(statement_id))?;

        let files = statement.file_paths();
        self.discard_blobs(&files).await;

        self.statements.delete_entries(statement_id).await?;
        self.statements.delete_statement(statement_id).await?;
        info!("Deleted statement {}", statement_id);

        Ok(StatementDeletion {
            statement_id,
            files_deleted: files,
            entries_deleted: true,
            reference_files_deleted: usize::from(statement.reference_file.is_some()),
        })
    }

    pub async fn update_status(&self, statement_id: Uuid, status: &str) -> Result<FinancialStatement> {
        if status.is_empty() {
            return Err(LedgerError::Validation("Status is required".to_string()));
        }
        let status: StatementStatus = status.parse()?;

        self.statements
            .set_statement_status(&[statement_id], status)
            .await?;
        self.statements
            .load_statement(statement_id)
            .await?
            .ok_or(LedgerError::StatementNotFound(statement_id))
    }

    /// Remove every stored file, statement and entry.
    pub async fn clear_all(&self) -> Result<ClearSummary> {
        let files = self.blobs.list_blobs("").await?;
        let reference_prefix = format!("{}/", REFERENCE_PREFIX);
        let reference_files_deleted = files
            .iter()
            .filter(|f| f.starts_with(&reference_prefix))
            .count();

        self.discard_blobs(&files).await;
        let statements_deleted = self.statements.clear_statements().await?;
        warn!(
            "Cleared {} statements and {} files",
            statements_deleted,
            files.len()
        );

        Ok(ClearSummary {
            statement_files_deleted: files.len() - reference_files_deleted,
            reference_files_deleted,
            total_files_deleted: files.len(),
            statements_deleted,
        })
    }

    pub async fn get_statement(&self, statement_id: Uuid) -> Result<StatementDetails> {
        let statement = self
            .statements
            .load_statement(statement_id)
            .await?
            .ok_or(LedgerError::StatementNotFound(statement_id))?;
        let entries = self.statements.load_entries(statement_id).await?;

        Ok(StatementDetails {
            statement,
            entries: entries_by_section(entries),
        })
    }

    /// The newest statement of every type for an organization. Types without an
    /// upload map to `None`.
    pub async fn latest_statements(
        &self,
        organization_id: Uuid,
    ) -> Result<BTreeMap<StatementType, Option<FinancialStatement>>> {
        let mut latest: BTreeMap<StatementType, Option<FinancialStatement>> =
            StatementType::ALL.iter().map(|t| (*t, None)).collect();

        for statement in self
            .statements
            .statements_for_organization(organization_id)
            .await?
        {
            let slot = latest.entry(statement.statement_type).or_default();
            if slot.is_none() {
                *slot = Some(statement);
            }
        }
        Ok(latest)
    }

    async fn discard_blobs(&self, paths: &[String]) {
        discard_blobs(self.blobs.as_ref(), paths).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_upload() -> StatementUpload {
        StatementUpload {
            statement_type: "kunci_kira_kira".to_string(),
            organization_id: Some(Uuid::new_v4()),
            state: Some("Selangor".to_string()),
            audited_by: Some("Juruaudit A".to_string()),
            reviewed_by: Some("Penyemak B".to_string()),
            year_current: Some("2024-12-31".to_string()),
            year_previous: Some("2023".to_string()),
            statement_file: Some("UEsDBA==".to_string()),
            reference_file: None,
        }
    }

    #[test]
    fn test_statement_type_is_checked_first() {
        let upload = StatementUpload {
            statement_type: "cashflow".to_string(),
            year_current: None,
            ..complete_upload()
        };
        let err = upload.validate().err().unwrap();
        assert!(matches!(err, LedgerError::UnknownStatementType { .. }));
        assert_eq!(
            err.to_string(),
            "Invalid statement type. Must be one of: kunci_kira_kira, imbangan_duga, ledger, bank_reconciliation"
        );
    }

    #[test]
    fn test_years_are_checked_before_required_fields() {
        let upload = StatementUpload {
            year_previous: Some("last year".to_string()),
            state: None,
            ..complete_upload()
        };
        assert_eq!(
            upload.validate().err().unwrap().to_string(),
            "Invalid year format provided"
        );
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let upload = StatementUpload {
            audited_by: Some(String::new()),
            ..complete_upload()
        };
        assert_eq!(
            upload.validate().err().unwrap().to_string(),
            "Missing required field: audited_by"
        );

        let upload = StatementUpload {
            statement_file: None,
            ..complete_upload()
        };
        assert_eq!(
            upload.validate().err().unwrap().to_string(),
            "Missing required field: statement_file"
        );
    }

    #[test]
    fn test_valid_upload_extracts_years() {
        let upload = complete_upload();
        let validated = upload.validate().unwrap();
        assert_eq!(validated.statement_type, StatementType::KunciKiraKira);
        assert_eq!(validated.year_current, 2024);
        assert_eq!(validated.year_previous, 2023);
        assert!(validated.reference_file.is_none());
    }

    #[test]
    fn test_upload_deserializes_type_field() {
        let upload: StatementUpload = serde_json::from_value(serde_json::json!({
            "type": "ledger",
            "year_current": "2024"
        }))
        .unwrap();
        assert_eq!(upload.statement_type, "ledger");
        assert!(upload.organization_id.is_none());
    }

    fn entry(section: &str, label: &str, sort_order: u32) -> LedgerEntry {
        LedgerEntry {
            statement_id: None,
            section: section.to_string(),
            label: label.to_string(),
            amount_current: Some(1.0),
            amount_previous: Some(1.0),
            year_current: 2024,
            year_previous: 2023,
            is_total: false,
            parent_section: Some(section.to_string()),
            sort_order,
        }
    }

    #[test]
    fn test_entries_grouped_by_section_in_sort_order() {
        let sections = entries_by_section(vec![
            entry("Liabiliti", "Pemiutang", 5),
            entry("Aset", "Penghutang", 3),
            entry("Aset", "Tunai", 2),
        ]);

        assert_eq!(sections.len(), 2);
        let aset: Vec<&str> = sections["Aset"].iter().map(|e| e.label.as_str()).collect();
        assert_eq!(aset, vec!["Tunai", "Penghutang"]);
        assert_eq!(sections["Liabiliti"].len(), 1);
    }
}
