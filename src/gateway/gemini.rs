//! Gemini adapter for image generation.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::{ImageRequest, ImageResponse};
use super::ImageProvider;
use crate::config::DEFAULT_GEMINI_BASE_URL;

const PROVIDER: &str = "gemini";

/// Image responses are large; cap at 32MB.
const MAX_RESPONSE_LEN: usize = 32 * 1_024 * 1_024;

#[derive(Debug, Clone)]
pub struct GeminiImageAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiImageAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, DEFAULT_GEMINI_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::config("Gemini API key is empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Per-request deadlines come from the stage config, not the client.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn generate(&self, req: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart {
                    text: req.prompt.clone(),
                }],
            }],
        };

        let mut response = self
            .client
            .post(self.generate_url(&req.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    PROVIDER,
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        if !status.is_success() {
            let ctx = ErrorContext::new().with_status(status.as_u16());
            if status.as_u16() == 429 {
                return Err(ProviderError::rate_limited(PROVIDER, ctx));
            }
            let message = serde_json::from_slice::<GenerateResponse>(&bytes)
                .ok()
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ProviderError::provider_with_context(
                PROVIDER,
                message,
                status.as_u16() >= 500,
                ctx,
            ));
        }

        let parsed: GenerateResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::provider(PROVIDER, format!("Invalid JSON: {e}"), false))?;

        let encoded = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts.unwrap_or_default())
            .find_map(|p| p.inline_data.map(|d| d.data));

        let image_bytes = match encoded {
            Some(data) => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| {
                        ProviderError::provider(PROVIDER, format!("Invalid image data: {e}"), false)
                    })?,
            ),
            None => None,
        };

        Ok(ImageResponse { image_bytes })
    }
}

#[async_trait]
impl ImageProvider for GeminiImageAdapter {
    async fn generate_image(&self, req: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        let deadline: Duration = req.timeout;
        tokio::time::timeout(deadline, self.generate(req))
            .await
            .map_err(|_| ProviderError::Timeout(deadline))?
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}
