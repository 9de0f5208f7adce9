use analysis_flow::{DataUri, DocumentFormat, GenerativeModel, ModelError, prompt};
use async_trait::async_trait;
use reqwest::Client;
use rig::{
    agent::Agent,
    client::CompletionClient,
    completion::Prompt,
    providers::openrouter,
};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::ModelConfig;

/// OpenRouter-backed model.
///
/// Documents go through the raw chat-completions endpoint so the data URI can
/// be attached as a content part; text-only prompts go through a rig agent.
pub struct OpenRouterModel {
    http: Client,
    agents: openrouter::Client,
    config: ModelConfig,
}

impl OpenRouterModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            agents: openrouter::Client::new(&config.api_key),
            config,
        }
    }

    fn legal_agent(&self) -> Agent<openrouter::CompletionModel> {
        self.agents
            .agent(&self.config.legal_model)
            .preamble(prompt::LEGAL_ANALYST_PREAMBLE)
            .build()
    }

    async fn call_openrouter_api(&self, payload: &Value) -> Result<String, ModelError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| ModelError::new(format!("OpenRouter request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::new(format!(
                "OpenRouter request failed: {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| ModelError::new(format!("Invalid response body from OpenRouter: {e}")))?;
        message_content(&response_json)
    }
}

#[async_trait]
impl GenerativeModel for OpenRouterModel {
    async fn generate_with_document(
        &self,
        instructions: &str,
        document: &DataUri,
    ) -> Result<String, ModelError> {
        let payload = document_payload(
            &self.config.document_model,
            self.config.max_tokens,
            instructions,
            document,
        )?;
        info!(
            model = %self.config.document_model,
            mime_type = %document.mime_type(),
            "Calling OpenRouter with document"
        );

        let content = self.call_openrouter_api(&payload).await?;
        debug!(response_len = content.len(), "OpenRouter document call returned");
        Ok(content)
    }

    async fn generate(&self, instructions: &str) -> Result<String, ModelError> {
        info!(model = %self.config.legal_model, "Prompting legal analyst agent");

        let prompt = instructions.to_string();
        self.legal_agent()
            .prompt(&prompt)
            .await
            .map_err(|e| ModelError::new(format!("Agent prompt failed: {e}")))
    }
}

/// Chat-completions body carrying the instructions and the untouched data URI.
fn document_payload(
    model: &str,
    max_tokens: u32,
    instructions: &str,
    document: &DataUri,
) -> Result<Value, ModelError> {
    let format = document.format().ok_or_else(|| {
        ModelError::new(format!("unsupported document type: {}", document.mime_type()))
    })?;

    let attachment = match format {
        DocumentFormat::Pdf => json!({
            "type": "file",
            "file": {
                "filename": "document.pdf",
                "file_data": document.to_string()
            }
        }),
        DocumentFormat::Png | DocumentFormat::Jpeg | DocumentFormat::Webp => json!({
            "type": "image_url",
            "image_url": {
                "url": document.to_string()
            }
        }),
    };

    Ok(json!({
        "model": model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": instructions },
                    attachment
                ]
            }
        ],
        "max_tokens": max_tokens,
        "response_format": { "type": "json_object" }
    }))
}

fn message_content(response: &Value) -> Result<String, ModelError> {
    if let Some(message) = response["error"]["message"].as_str() {
        return Err(ModelError::new(format!("OpenRouter error: {message}")));
    }
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ModelError::new("Invalid response format from OpenRouter"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_are_sent_as_image_url_parts() {
        let document = DataUri::encode(DocumentFormat::Png, b"\x89PNG\r\n\x1a\n").unwrap();
        let payload = document_payload("openai/gpt-4.1-mini", 4000, "Analyze.", &document).unwrap();

        let content = &payload["messages"][0]["content"];
        assert_eq!(content[0]["text"], "Analyze.");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], document.to_string());
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["max_tokens"], 4000);
    }

    #[test]
    fn pdfs_are_sent_as_file_parts() {
        let document = DataUri::encode(DocumentFormat::Pdf, b"%PDF-1.7").unwrap();
        let payload = document_payload("openai/gpt-4.1-mini", 4000, "Analyze.", &document).unwrap();

        let part = &payload["messages"][0]["content"][1];
        assert_eq!(part["type"], "file");
        assert_eq!(part["file"]["file_data"], document.to_string());
    }

    #[test]
    fn other_formats_are_never_attached() {
        let document = DataUri::parse("data:text/html;base64,PGgxPmhpPC9oMT4=").unwrap();
        let err = document_payload("openai/gpt-4.1-mini", 4000, "Analyze.", &document).unwrap_err();
        assert!(err.0.contains("text/html"));
    }

    #[test]
    fn reads_the_first_choice() {
        let response = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"summary\":\"ok\"}" } }]
        });
        assert_eq!(message_content(&response).unwrap(), "{\"summary\":\"ok\"}");
    }

    #[test]
    fn error_bodies_become_model_errors() {
        let response = json!({ "error": { "code": 429, "message": "Rate limit exceeded" } });
        let err = message_content(&response).unwrap_err();
        assert!(err.0.contains("Rate limit exceeded"));

        assert!(message_content(&json!({ "choices": [] })).is_err());
    }
}
