use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::GenerationError;

/// A hosted text-generation model: prompt in, free text out.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Cheap readiness check used by the health endpoint. Must not bill a generation.
    async fn probe(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Messages-style HTTP model client (`x-api-key` + `anthropic-version` headers).
pub struct HttpTextModel {
    client: Client,
    config: ModelConfig,
    timeout: Duration,
}

impl HttpTextModel {
    pub fn new(config: ModelConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            timeout,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else {
            GenerationError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl TextModel for HttpTextModel {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let payload = MessagesRequest {
            model: &self.config.model_id,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        tracing::debug!(
            "Invoking model {} ({} prompt chars)",
            self.config.model_id,
            prompt.len()
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerationError::UpstreamStatus { status, body });
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else {
                GenerationError::MalformedJson(format!("model envelope: {}", e))
            }
        })?;

        let text: String = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        if self.config.api_key.trim().is_empty() {
            return Err(GenerationError::Transport(
                "model API key is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_top_p() {
        let payload = MessagesRequest {
            model: "m",
            max_tokens: 2000,
            temperature: 0.7,
            top_p: None,
            messages: [Message {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("top_p").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 2000);
    }

    #[test]
    fn response_text_blocks_are_concatenated() {
        let body: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Here: "},{"type":"text","text":"{\"a\":1}"}]}"#,
        )
        .unwrap();
        let text: String = body.content.into_iter().filter_map(|b| b.text).collect();
        assert_eq!(text, "Here: {\"a\":1}");
    }

    #[tokio::test]
    async fn probe_fails_without_api_key() {
        let model = HttpTextModel::new(ModelConfig::default()).unwrap();
        assert!(model.probe().await.is_err());
    }
}
