//! Per-statement audit analysis through the structured-output generator.

use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::llm::{
    build_analysis_messages, GenerationError, GenerationRequest, SamplingParams,
    StructureGenerator, ANALYSIS_SCHEMA_DESCRIPTION, ANALYSIS_SCHEMA_NAME,
};
use crate::schema::{FinancialStatement, StatementAnalysis};
use crate::store::{BlobStorage, StatementStore};

/// Sampling for analysis calls: short completions, slightly warmer than generation.
pub fn analysis_sampling() -> SamplingParams {
    SamplingParams {
        temperature: 0.2,
        top_p: 0.1,
        max_tokens: 2000,
        presence_penalty: 0.0,
        frequency_penalty: 0.0,
    }
}

fn analysis_from_value(
    value: serde_json::Value,
) -> std::result::Result<StatementAnalysis, GenerationError> {
    serde_json::from_value(value).map_err(|e| {
        GenerationError::schema_mismatch(format!("analysis did not match schema: {}", e))
    })
}

#[derive(Clone)]
pub struct StatementAnalyzer {
    statements: Arc<dyn StatementStore>,
    blobs: Arc<dyn BlobStorage>,
    generator: Arc<dyn StructureGenerator>,
    sampling: SamplingParams,
}

impl StatementAnalyzer {
    pub fn new(
        statements: Arc<dyn StatementStore>,
        blobs: Arc<dyn BlobStorage>,
        generator: Arc<dyn StructureGenerator>,
    ) -> Self {
        Self {
            statements,
            blobs,
            generator,
            sampling: analysis_sampling(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    /// Analyze one statement and store the result on its record.
    ///
    /// The statement's reference file, when it can be read, is passed to the model as
    /// extra guidance. A failure to store the result is logged and the analysis is
    /// still returned.
    pub async fn analyze(&self, statement_id: Uuid) -> Result<StatementAnalysis> {
        let mut statement = self
            .statements
            .load_statement(statement_id)
            .await?
            .ok_or(LedgerError::StatementNotFound(statement_id))?;
        let entries = self.statements.load_entries(statement_id).await?;
        let guidance = self.reference_guidance(&statement).await;

        let request = GenerationRequest {
            schema_name: ANALYSIS_SCHEMA_NAME.to_string(),
            schema_description: ANALYSIS_SCHEMA_DESCRIPTION.to_string(),
            schema: StatementAnalysis::schema_value()?,
            messages: build_analysis_messages(
                statement.statement_type,
                &entries,
                guidance.as_deref(),
            )?,
            sampling: self.sampling.clone(),
        };

        info!(
            "Analyzing {} statement {} ({} entries)",
            statement.statement_type,
            statement_id,
            entries.len()
        );
        let value = self.generator.generate(&request).await?;
        let analysis = analysis_from_value(value)?;

        statement.analysis_result = Some(analysis.clone());
        statement.updated_at = Utc::now();
        if let Err(e) = self.statements.save_statement(&statement).await {
            error!("Failed to store analysis for statement {}: {}", statement_id, e);
        }

        info!(
            "Statement {} analyzed: {} major, {} minor issues",
            statement_id, analysis.summary.major_issues, analysis.summary.minor_issues
        );
        Ok(analysis)
    }

    async fn reference_guidance(&self, statement: &FinancialStatement) -> Option<String> {
        let reference = statement.reference_file.as_ref()?;
        match self.blobs.download_blob(&reference.path).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!(
                    "Could not read reference file {} for statement {}: {}",
                    reference.path, statement.id, e
                );
                None
            }
        }
    }
}
