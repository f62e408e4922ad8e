//! Per-stage observability records for a review generation.

use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::gateway::TextInvocation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceResponse {
    pub text: String,
}

/// Captured request/response/timing/token record of one text invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    pub request: TraceRequest,
    pub response: TraceResponse,
    pub model: ModelConfig,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_prompt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_completion: Option<u32>,
}

impl StageTrace {
    pub fn from_invocation(
        model: &ModelConfig,
        system_prompt: Option<&str>,
        user_prompt: &str,
        invocation: TextInvocation,
    ) -> Self {
        Self {
            request: TraceRequest {
                system_prompt: system_prompt.map(str::to_string),
                user_prompt: user_prompt.to_string(),
            },
            response: TraceResponse {
                text: invocation.text,
            },
            model: model.clone(),
            duration_ms: invocation.duration_ms,
            tokens_prompt: invocation.tokens_prompt,
            tokens_completion: invocation.tokens_completion,
        }
    }

    pub fn text(&self) -> &str {
        &self.response.text
    }
}

/// One sub-call of a chunked timeline summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineChunkTrace {
    pub chunk_index: usize,
    pub time_range: String,
    pub trace: StageTrace,
}

/// Image generation is not a text call: bare model id, no token counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationTrace {
    pub prompt: String,
    pub model: String,
    pub duration_ms: u64,
    pub image_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size_bytes: Option<usize>,
}

/// Every trace actually produced by one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTraces {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_summary: Option<StageTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_chunks: Option<Vec<TimelineChunkTrace>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_aggregate: Option<StageTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_summary: Option<StageTrace>,
    pub review_text: StageTrace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description: Option<StageTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_generation: Option<ImageGenerationTrace>,
}

impl PipelineTraces {
    pub fn new(review_text: StageTrace) -> Self {
        Self {
            timeline_summary: None,
            timeline_chunks: None,
            timeline_aggregate: None,
            match_summary: None,
            review_text,
            image_description: None,
            image_generation: None,
        }
    }

    /// All text traces with a stable label, in pipeline order.
    pub fn text_traces(&self) -> Vec<(String, &StageTrace)> {
        let mut out = Vec::new();
        if let Some(t) = &self.timeline_summary {
            out.push(("timeline_summary".to_string(), t));
        }
        for chunk in self.timeline_chunks.iter().flatten() {
            out.push((format!("timeline_chunk_{}", chunk.chunk_index), &chunk.trace));
        }
        if let Some(t) = &self.timeline_aggregate {
            out.push(("timeline_aggregate".to_string(), t));
        }
        if let Some(t) = &self.match_summary {
            out.push(("match_summary".to_string(), t));
        }
        out.push(("review_text".to_string(), &self.review_text));
        if let Some(t) = &self.image_description {
            out.push(("image_description".to_string(), t));
        }
        out
    }
}

/// Human-readable text extracted from each stage. Derived from the traces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineIntermediateResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_summary_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_chunk_summaries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_summary_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_description_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_image_prompts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_art_style: Option<String>,
}
