use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::LedgerStructure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.1,
            max_tokens: 16384,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }
}

/// Everything the generator needs for one structured-output call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub schema_name: String,
    pub schema_description: String,
    pub schema: serde_json::Value,
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    /// The returned object did not validate against the schema.
    SchemaMismatch,
    RateLimited,
    /// Prompt or completion exceeded the model's token budget.
    TokenLimit,
    Transport,
    MissingConfiguration,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?}: {detail}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub detail: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn schema_mismatch(detail: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::SchemaMismatch, detail)
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Transport, detail)
    }
}

/// Boundary to the structured-output model.
#[async_trait]
pub trait StructureGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<serde_json::Value, GenerationError>;
}

/// Validate a generated object and fill in optional defaults.
pub fn structure_from_value(
    value: serde_json::Value,
) -> std::result::Result<LedgerStructure, GenerationError> {
    let mut structure: LedgerStructure = serde_json::from_value(value).map_err(|e| {
        GenerationError::schema_mismatch(format!("response did not match schema: {}", e))
    })?;
    structure.normalize();
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mismatched_object_is_schema_error() {
        let err = structure_from_value(json!({ "ledger": { "title": 5 } })).unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_message_roles_serialize_lowercase() {
        let msg = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(msg["role"], "system");
    }
}
