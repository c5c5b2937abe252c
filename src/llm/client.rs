use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::config::OpenAiSettings;
use crate::llm::types::*;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    refusal: Option<String>,
}

/// Structured-output client for OpenAI-compatible chat completion endpoints.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings) -> Result<Self, GenerationError> {
        if settings.api_key.trim().is_empty() {
            return Err(GenerationError::new(
                GenerationErrorKind::MissingConfiguration,
                "Missing OpenAI API key",
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn classify_http_failure(status: StatusCode, body: &str) -> GenerationError {
        let kind = if status == StatusCode::TOO_MANY_REQUESTS || body.contains("rate_limit") {
            GenerationErrorKind::RateLimited
        } else if body.contains("context_length_exceeded") || body.contains("max_tokens") {
            GenerationErrorKind::TokenLimit
        } else if status == StatusCode::UNAUTHORIZED {
            GenerationErrorKind::MissingConfiguration
        } else {
            GenerationErrorKind::Transport
        };
        GenerationError::new(
            kind,
            format!("OpenAI API Error (status {}): {}", status, body),
        )
    }
}

#[async_trait]
impl StructureGenerator for OpenAiClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<serde_json::Value, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let payload = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.sampling.temperature,
            "top_p": request.sampling.top_p,
            "max_tokens": request.sampling.max_tokens,
            "presence_penalty": request.sampling.presence_penalty,
            "frequency_penalty": request.sampling.frequency_penalty,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "description": request.schema_description,
                    "schema": request.schema,
                    "strict": false
                }
            }
        });

        debug!(
            "Requesting structured output from {} with {} messages",
            self.model,
            request.messages.len()
        );

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GenerationError::transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let err_text = res
                .text()
                .await
                .map_err(|e| GenerationError::transport(e.to_string()))?;
            return Err(Self::classify_http_failure(status, &err_text));
        }

        let body: ChatCompletionResponse = res
            .json()
            .await
            .map_err(|e| GenerationError::transport(e.to_string()))?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            GenerationError::schema_mismatch("No object generated: no choices returned")
        })?;

        if choice.finish_reason.as_deref() == Some("length") {
            return Err(GenerationError::new(
                GenerationErrorKind::TokenLimit,
                "Completion stopped at maxTokens",
            ));
        }

        if let Some(refusal) = choice.message.refusal {
            return Err(GenerationError::schema_mismatch(format!(
                "No object generated: model refused ({})",
                refusal
            )));
        }

        let content = choice.message.content.ok_or_else(|| {
            GenerationError::schema_mismatch("No object generated: empty message content")
        })?;

        serde_json::from_str(&content).map_err(|e| {
            GenerationError::schema_mismatch(format!(
                "No object generated: could not parse the response ({})",
                e
            ))
        })
    }
}
