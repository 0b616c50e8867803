use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities::{GenerationRequest, Generator, UserContent};
use crate::config::CoachConfig;

/// OpenAI-compatible chat-completions client used as the coach's generation capability.
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }

    /// Build a client from config, or `None` when no endpoint is configured.
    pub fn from_config(config: &CoachConfig) -> Option<Self> {
        let api_url = config.llm_api_url.as_ref()?;
        Some(Self::new(
            api_url.clone(),
            config.llm_api_key.clone().unwrap_or_default(),
            config.llm_model.clone(),
        ))
    }

    /// Same endpoint and credentials, different model (e.g. a vision model).
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(request: &GenerationRequest) -> Vec<Message> {
        let user_content = match &request.user_content {
            UserContent::Text(text) => MessageContent::Text(text.clone()),
            UserContent::WithImages { text, images } => {
                let mut parts = vec![ContentPart::Text { text: text.clone() }];
                parts.extend(images.iter().map(|image| ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                }));
                MessageContent::Parts(parts)
            }
        };

        vec![
            Message {
                role: "system".to_string(),
                content: MessageContent::Text(request.system_prompt.clone()),
            },
            Message {
                role: "user".to_string(),
                content: user_content,
            },
        ]
    }

    async fn send(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request),
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
        };

        let mut req = self.client.post(&url).json(&body);

        // Add API key header if provided (not needed for local models)
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }
}

#[async_trait]
impl Generator for LlmClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        tracing::debug!(
            "Calling {} with {} image(s), max_tokens={}",
            self.model,
            request.user_content.image_count(),
            request.max_tokens
        );
        self.send(&request).await
    }
}
