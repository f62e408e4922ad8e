//! Core types for the provider gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModelConfig;

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request for a text completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Provider model id, e.g. "gpt-4o-mini".
    pub model: String,
    /// Messages in the conversation (optional system, then user).
    pub messages: Vec<Message>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0), provider default when absent.
    pub temperature: Option<f32>,
    /// Nucleus sampling (0.0 - 1.0), provider default when absent.
    pub top_p: Option<f32>,
}

impl ChatRequest {
    /// Build a request from a stage's model configuration.
    pub fn from_config(config: &ModelConfig, system_prompt: Option<&str>, user_prompt: &str) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user_prompt));
        Self {
            model: config.model().to_string(),
            messages,
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            top_p: config.top_p(),
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Response from a text completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Input tokens consumed, when the provider reports them.
    pub input_tokens: Option<u32>,
    /// Output tokens generated, when the provider reports them.
    pub output_tokens: Option<u32>,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

// =============================================================================
// IMAGE TYPES
// =============================================================================

/// Request for one generated image.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub timeout: Duration,
}

/// Response from an image provider. `image_bytes` is `None` when the
/// provider answered without an image part.
#[derive(Debug, Clone, Default)]
pub struct ImageResponse {
    pub image_bytes: Option<Vec<u8>>,
}

impl ImageResponse {
    pub fn generated(&self) -> bool {
        self.image_bytes.as_ref().is_some_and(|b| !b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_carries_model_config() {
        let config = ModelConfig::new("gpt-4o-mini", 500)
            .unwrap()
            .with_temperature(0.4)
            .unwrap();
        let req = ChatRequest::from_config(&config, Some("be brief"), "hi");

        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.max_tokens, 500);
        assert_eq!(req.temperature, Some(0.4));
        assert_eq!(req.top_p, None);
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let config = ModelConfig::new("gpt-4o-mini", 500).unwrap();
        let req = ChatRequest::from_config(&config, Some("   "), "hi");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
    }

    #[test]
    fn empty_image_bytes_do_not_count_as_generated() {
        assert!(!ImageResponse { image_bytes: Some(vec![]) }.generated());
        assert!(ImageResponse { image_bytes: Some(vec![1]) }.generated());
        assert!(!ImageResponse::default().generated());
    }
}
