//! External capabilities consumed by the coach.
//!
//! The coach owns neither the exercise knowledge base nor the language model.
//! Both are injected as trait objects so tests can drive the loop with fakes:
//! - **ExerciseSearch** retrieves scored exercise documents for a free-text query
//! - **Generator** produces narrative text, optionally looking at images

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single hit returned by the knowledge base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Lower is closer. `None` when the backend does not report a metric.
    #[serde(default)]
    pub distance: Option<f64>,
}

impl SearchHit {
    /// Metadata value for `key`, ignoring blank values.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Knowledge-base retrieval.
///
/// Implementations must return an empty list (not an error) when nothing
/// matches, and must accept `filters = None` as "search everything".
#[async_trait]
pub trait ExerciseSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: Option<&BTreeMap<String, String>>,
        top_k: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// An image already read from disk and base64 encoded.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub filename: String,
    pub mime_type: String,
    pub data_base64: String,
}

impl EncodedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }
}

#[derive(Debug, Clone)]
pub enum UserContent {
    Text(String),
    WithImages {
        text: String,
        images: Vec<EncodedImage>,
    },
}

impl UserContent {
    pub fn text(&self) -> &str {
        match self {
            UserContent::Text(text) => text,
            UserContent::WithImages { text, .. } => text,
        }
    }

    pub fn image_count(&self) -> usize {
        match self {
            UserContent::Text(_) => 0,
            UserContent::WithImages { images, .. } => images.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_content: UserContent,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text (and vision) generation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Short label used in logs and in the payload's `enhanced_with` list.
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}
