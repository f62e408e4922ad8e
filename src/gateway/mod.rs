//! Provider gateway: text and image providers behind one invocation surface.

pub mod error;
pub mod gemini;
pub mod openai;
pub mod pricing;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ModelConfig;

pub use error::{ErrorContext, ProviderError};
pub use gemini::GeminiImageAdapter;
pub use openai::OpenAiAdapter;
pub use pricing::*;
pub use types::*;

/// Trait for text-generation providers.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Trait for image-generation providers. Implementations must honor
/// `req.timeout` and report an elapsed deadline as `ProviderError::Timeout`.
#[async_trait::async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate_image(&self, req: &ImageRequest) -> Result<ImageResponse, ProviderError>;
}

/// Result of one text invocation.
#[derive(Debug, Clone)]
pub struct TextInvocation {
    pub text: String,
    pub tokens_prompt: Option<u32>,
    pub tokens_completion: Option<u32>,
    pub duration_ms: u64,
}

/// Result of one image invocation.
#[derive(Debug, Clone)]
pub struct ImageInvocation {
    pub image_bytes: Option<Vec<u8>>,
    pub duration_ms: u64,
}

/// Uniform call surface over the configured providers.
///
/// Holds no mutable state; durations are measured around the call.
#[derive(Clone)]
pub struct ModelInvoker {
    text: Arc<dyn ChatProvider>,
    image: Option<Arc<dyn ImageProvider>>,
}

impl ModelInvoker {
    pub fn new(text: Arc<dyn ChatProvider>, image: Option<Arc<dyn ImageProvider>>) -> Self {
        Self { text, image }
    }

    /// Whether an image-capable client is configured.
    pub fn has_image_client(&self) -> bool {
        self.image.is_some()
    }

    pub async fn invoke_text(
        &self,
        config: &ModelConfig,
        system_prompt: Option<&str>,
        user_prompt: &str,
    ) -> Result<TextInvocation, ProviderError> {
        let req = ChatRequest::from_config(config, system_prompt, user_prompt);
        let start = Instant::now();
        let resp = self.text.chat(&req).await?;
        let duration_ms = elapsed_ms(start);

        tracing::debug!(
            model = %req.model,
            duration_ms,
            input_tokens = ?resp.input_tokens,
            output_tokens = ?resp.output_tokens,
            "text invocation finished"
        );

        Ok(TextInvocation {
            text: resp.content,
            tokens_prompt: resp.input_tokens,
            tokens_completion: resp.output_tokens,
            duration_ms,
        })
    }

    pub async fn invoke_image(
        &self,
        model_id: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<ImageInvocation, ProviderError> {
        let provider = self
            .image
            .as_ref()
            .ok_or_else(|| ProviderError::config("no image-capable client configured"))?;
        let req = ImageRequest {
            model: model_id.to_string(),
            prompt: prompt.to_string(),
            timeout,
        };
        let start = Instant::now();
        let resp = provider.generate_image(&req).await?;
        let duration_ms = elapsed_ms(start);

        tracing::debug!(model = model_id, duration_ms, generated = resp.generated(), "image invocation finished");

        Ok(ImageInvocation {
            image_bytes: resp.image_bytes.filter(|b| !b.is_empty()),
            duration_ms,
        })
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}
