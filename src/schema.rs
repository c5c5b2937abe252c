use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::utils::null_as_default;

/// Section assigned to item rows that appear before the first header row.
pub const UNCATEGORIZED_SECTION: &str = "uncategorized";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    KunciKiraKira,
    ImbanganDuga,
    Ledger,
    BankReconciliation,
}

impl StatementType {
    pub const ALL: [StatementType; 4] = [
        StatementType::KunciKiraKira,
        StatementType::ImbanganDuga,
        StatementType::Ledger,
        StatementType::BankReconciliation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::KunciKiraKira => "kunci_kira_kira",
            StatementType::ImbanganDuga => "imbangan_duga",
            StatementType::Ledger => "ledger",
            StatementType::BankReconciliation => "bank_reconciliation",
        }
    }

    fn valid_list() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatementType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| LedgerError::UnknownStatementType {
                given: s.to_string(),
                valid: Self::valid_list(),
            })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatementStatus {
    #[default]
    Draft,
    Confirmed,
    Deleted,
}

impl FromStr for StatementStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(StatementStatus::Draft),
            "confirmed" => Ok(StatementStatus::Confirmed),
            "deleted" => Ok(StatementStatus::Deleted),
            _ => Err(LedgerError::Validation(
                "Invalid status. Must be one of: draft, confirmed, deleted".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationType {
    #[default]
    Parent,
    Child,
}

impl FromStr for OrganizationType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "parent" => Ok(OrganizationType::Parent),
            "child" => Ok(OrganizationType::Child),
            _ => Err(LedgerError::Validation(
                "Invalid organization type. Must be 'parent' or 'child'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationStatus {
    #[default]
    Active,
    Inactive,
    Deleted,
}

/// A cooperative that owns statements. Child organizations sit under one parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub bank_account: Option<String>,
    pub organization_type: OrganizationType,
    pub status: OrganizationStatus,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// A new active top-level organization.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            bank_account: None,
            organization_type: OrganizationType::Parent,
            status: OrganizationStatus::Active,
            parent_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single spreadsheet cell as read from the uploaded workbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// Trimmed textual rendering. Whole numbers render without a fractional part.
    pub fn as_trimmed_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) if n.fract() == 0.0 && n.is_finite() => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// Columns A, B and C of one worksheet row: label, previous year, current year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawRow {
    pub label: CellValue,
    pub previous: CellValue,
    pub current: CellValue,
}

impl RawRow {
    pub fn new(
        label: impl Into<CellValue>,
        previous: impl Into<CellValue>,
        current: impl Into<CellValue>,
    ) -> Self {
        Self {
            label: label.into(),
            previous: previous.into(),
            current: current.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub statement_id: Option<Uuid>,
    pub section: String,
    pub label: String,
    pub amount_current: Option<f64>,
    pub amount_previous: Option<f64>,
    pub year_current: i32,
    pub year_previous: i32,
    pub is_total: bool,
    pub parent_section: Option<String>,
    pub sort_order: u32,
}

impl LedgerEntry {
    pub fn is_header(&self) -> bool {
        self.amount_current.is_none() && self.amount_previous.is_none()
    }
}

/// A file persisted in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub statement_type: StatementType,
    pub status: StatementStatus,
    pub state: String,
    pub audited_by: String,
    pub reviewed_by: String,
    pub year_current: i32,
    pub year_previous: i32,
    pub statement_file: StoredFile,
    pub reference_file: Option<StoredFile>,
    /// Latest audit analysis, if one has been run.
    #[serde(default)]
    pub analysis_result: Option<StatementAnalysis>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FinancialStatement {
    /// Blob paths owned by this statement.
    pub fn file_paths(&self) -> Vec<String> {
        let mut paths = vec![self.statement_file.path.clone()];
        if let Some(reference) = &self.reference_file {
            paths.push(reference.path.clone());
        }
        paths
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub organization_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupItem {
    pub group_id: Uuid,
    pub statement_id: Uuid,
    pub statement_type: StatementType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Processing];

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted ledger generation job for one statement group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub group_id: Uuid,
    pub status: JobStatus,
    pub result: Option<LedgerStructure>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn pending(group_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            group_id,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Refresh `updated_at` without changing status.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn start_processing(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)
    }

    pub fn complete(&mut self, result: LedgerStructure) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.result = None;
        self.error = Some(message.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Generated ledger structure. Field names follow the frontend's camelCase JSON.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssessmentLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub enum RiskStatus {
    #[serde(rename = "NEED ATTENTION")]
    NeedAttention,
    #[serde(rename = "MONITORING")]
    Monitoring,
    #[serde(rename = "ACCEPTABLE")]
    Acceptable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LedgerRowKind {
    #[schemars(description = "Main section row")]
    Header,
    #[schemars(description = "Detail line within a section")]
    Item,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCell {
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(description = "Debit amount as a string, empty when there is no value")]
    pub debit: String,

    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(description = "Credit (kredit) amount as a string, empty when there is no value")]
    pub kredit: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub debit_bg: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub kredit_bg: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerColumn {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sub_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerRow {
    #[schemars(description = "Account code. Main sections start at 10000, items step by 10")]
    pub code: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LedgerRowKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pic: String,
    #[serde(default, deserialize_with = "null_as_default")]
    #[schemars(description = "One cell per column name defined in `columns`")]
    pub values: BTreeMap<String, LedgerCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Ledger {
    pub title: String,
    pub subtitle: String,
    pub columns: Vec<LedgerColumn>,
    pub rows: Vec<LedgerRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RiskCategory {
    pub name: String,
    pub level: AssessmentLevel,
    pub status: RiskStatus,
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recommendations: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub overall_risk: AssessmentLevel,
    pub categories: Vec<RiskCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentCategory {
    pub name: String,
    pub level: AssessmentLevel,
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recommendations: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_open: bool,
}

/// Shared shape of the materiality and audit sampling sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LevelAssessment {
    pub overall_level: AssessmentLevel,
    pub categories: Vec<AssessmentCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[schemars(
    description = "Struktur lengkap lejar koperasi dengan penilaian risiko, materialiti, dan persampelan audit"
)]
pub struct LedgerStructure {
    pub ledger: Ledger,
    pub risk_assessment: RiskAssessment,
    pub materiality: LevelAssessment,
    pub audit_sampling: LevelAssessment,
}

impl LedgerStructure {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(LedgerStructure)
    }

    pub fn schema_value() -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(Self::generate_json_schema())
    }

    /// Ensures every row carries a cell for every declared column.
    pub fn normalize(&mut self) {
        let column_names: Vec<String> = self
            .ledger
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect();

        for row in &mut self.ledger.rows {
            for name in &column_names {
                row.values.entry(name.clone()).or_default();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-statement audit analysis.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisIssue {
    #[schemars(description = "Either \"Kecil Isu\" or \"Isu Utama\"")]
    pub issue_type: String,
    #[schemars(description = "For example: Data Tidak Lengkap, Ketidakkonsistenan Data")]
    pub issue_category: String,
    pub issue_description: String,
    pub expected_result: String,
    pub correction_suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisSummary {
    pub major_issues: u32,
    pub minor_issues: u32,
    pub document_revisions: u32,
    pub sections_needing_review: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sections_to_review: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(
    description = "Analisis penyata kewangan yang mengandungi jumlah isu, senarai isu terperinci, dan keperluan semakan"
)]
pub struct StatementAnalysis {
    #[serde(default, deserialize_with = "null_as_default")]
    pub document_overview: Vec<AnalysisIssue>,
    pub summary: AnalysisSummary,
}

impl StatementAnalysis {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(StatementAnalysis)
    }

    pub fn schema_value() -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(Self::generate_json_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_type_round_trip_and_rejection() {
        assert_eq!(
            "imbangan_duga".parse::<StatementType>().unwrap(),
            StatementType::ImbanganDuga
        );
        let err = "balance_sheet".parse::<StatementType>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("kunci_kira_kira"));
        assert!(msg.contains("bank_reconciliation"));
    }

    #[test]
    fn test_job_transitions() {
        let mut job = GenerationJob::pending(Uuid::new_v4());
        assert!(job.status.is_active());
        job.start_processing().unwrap();
        assert_eq!(job.status, JobStatus::Processing);

        job.fail("boom").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());

        let err = job.start_processing().unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                from: JobStatus::Failed,
                to: JobStatus::Processing
            }
        ));
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_cell_text_rendering() {
        assert_eq!(CellValue::Number(120.0).as_trimmed_text(), "120");
        assert_eq!(CellValue::Number(1.5).as_trimmed_text(), "1.5");
        assert_eq!(CellValue::text("  # ").as_trimmed_text(), "#");
        assert_eq!(CellValue::Empty.as_trimmed_text(), "");
    }

    #[test]
    fn test_schema_generation() {
        let schema = serde_json::to_string_pretty(&LedgerStructure::generate_json_schema()).unwrap();
        assert!(schema.contains("riskAssessment"));
        assert!(schema.contains("auditSampling"));
        assert!(schema.contains("NEED ATTENTION"));
        assert!(schema.contains("kreditBg"));
    }

    #[test]
    fn test_missing_optional_fields_take_defaults() {
        let value = json!({
            "ledger": {
                "title": "KOPERASI A",
                "subtitle": "PENYATA KEWANGAN : 31 DISEMBER 2024",
                "columns": [
                    { "name": "DRAF 2024", "subColumns": ["DEBIT RM", "KREDIT RM"] },
                    { "name": "PELARASAN", "subColumns": ["DEBIT RM", "KREDIT RM"] }
                ],
                "rows": [{
                    "code": "10000",
                    "name": "ASET",
                    "type": "header",
                    "pic": null,
                    "values": { "DRAF 2024": { "debit": "100", "kredit": null } }
                }]
            },
            "riskAssessment": {
                "overallRisk": "LOW",
                "categories": [{
                    "name": "Risiko Kewangan",
                    "level": "LOW",
                    "status": "ACCEPTABLE",
                    "description": "ok",
                    "recommendations": []
                }]
            },
            "materiality": { "overallLevel": "MEDIUM", "categories": [] },
            "auditSampling": { "overallLevel": "HIGH", "categories": [] }
        });

        let mut structure: LedgerStructure = serde_json::from_value(value).unwrap();
        structure.normalize();

        let row = &structure.ledger.rows[0];
        assert_eq!(row.pic, "");
        assert_eq!(row.values["DRAF 2024"].debit, "100");
        assert_eq!(row.values["DRAF 2024"].kredit, "");
        assert!(!row.values["DRAF 2024"].debit_bg);
        assert_eq!(row.values["PELARASAN"], LedgerCell::default());
        assert!(!structure.risk_assessment.categories[0].is_open);
    }

    #[test]
    fn test_organization_type_parsing() {
        assert_eq!("child".parse::<OrganizationType>().unwrap(), OrganizationType::Child);
        assert_eq!(
            "branch".parse::<OrganizationType>().unwrap_err().to_string(),
            "Invalid organization type. Must be 'parent' or 'child'"
        );
    }

    #[test]
    fn test_analysis_schema_and_defaults() {
        let schema = serde_json::to_string(&StatementAnalysis::generate_json_schema()).unwrap();
        assert!(schema.contains("document_overview"));
        assert!(schema.contains("sections_to_review"));

        let analysis: StatementAnalysis = serde_json::from_value(json!({
            "document_overview": null,
            "summary": {
                "major_issues": 0,
                "minor_issues": 1,
                "document_revisions": 0,
                "sections_needing_review": 1
            }
        }))
        .unwrap();
        assert!(analysis.document_overview.is_empty());
        assert!(analysis.summary.sections_to_review.is_empty());
    }
}
