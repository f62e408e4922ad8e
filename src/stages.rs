//! Stage runner: one configured stage plus upstream context in, traces out.
//!
//! Only `review_text` returns an error. Every other stage catches its own
//! failure, logs it, and yields `None` so the pipeline continues with less
//! context.

use serde_json::Value;

use crate::config::{ImageStageConfig, ReviewStageConfig, TextStageConfig, TimelineChunking};
use crate::gateway::{ModelInvoker, ProviderError};
use crate::personality::Personality;
use crate::pipeline::CompletedMatch;
use crate::prompts::{self, PromptInstance, PromptTemplate, PromptVars};
use crate::timeline::{self, CompactTimeline};
use crate::trace::{ImageGenerationTrace, StageTrace, TimelineChunkTrace};

/// Chunk progress callback: `(chunk_index, chunk_total)`.
pub type ChunkProgress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Output of the timeline stage. Exactly one of `summary` or
/// (`chunks`, `aggregate`) is set.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineOutcome {
    pub summary: Option<StageTrace>,
    pub chunks: Option<Vec<TimelineChunkTrace>>,
    pub aggregate: Option<StageTrace>,
}

impl TimelineOutcome {
    /// The externally visible summary: the aggregate when chunked.
    pub fn text(&self) -> Option<&str> {
        self.aggregate
            .as_ref()
            .or(self.summary.as_ref())
            .map(StageTrace::text)
    }

    pub fn chunk_summaries(&self) -> Option<Vec<String>> {
        self.chunks
            .as_ref()
            .map(|c| c.iter().map(|c| c.trace.text().to_string()).collect())
    }
}

/// Generated image plus its trace.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub trace: ImageGenerationTrace,
    pub image_bytes: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct StageRunner {
    invoker: ModelInvoker,
}

impl StageRunner {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self { invoker }
    }

    pub fn has_image_client(&self) -> bool {
        self.invoker.has_image_client()
    }

    async fn call(
        &self,
        slug: &str,
        config: &crate::config::ModelConfig,
        prompt: &PromptInstance,
    ) -> Result<StageTrace, ProviderError> {
        let system = prompt.system.as_deref();
        tracing::debug!(
            prompt = slug,
            model = config.model(),
            user_chars = prompt.user.len(),
            "calling stage model"
        );
        let invocation = self.invoker.invoke_text(config, system, &prompt.user).await?;
        Ok(StageTrace::from_invocation(config, system, &prompt.user, invocation))
    }

    async fn call_stage(
        &self,
        config: &TextStageConfig,
        template: &PromptTemplate,
        user_override: Option<&str>,
        vars: &PromptVars,
    ) -> Result<StageTrace, ProviderError> {
        let prompt = template.render(config.system_prompt.as_deref(), user_override, vars);
        self.call(template.slug, &config.model, &prompt).await
    }

    // =========================================================================
    // timeline_summary
    // =========================================================================

    pub async fn timeline_summary(
        &self,
        config: &TextStageConfig,
        chunking: &TimelineChunking,
        game: &CompletedMatch,
        raw_timeline: Option<&Value>,
        on_chunk: ChunkProgress<'_>,
    ) -> Option<TimelineOutcome> {
        if !config.enabled {
            return None;
        }
        let Some(raw) = raw_timeline else {
            tracing::warn!(stage = "timeline_summary", "no raw timeline; skipping stage");
            return None;
        };

        match self.run_timeline(config, chunking, game, raw, on_chunk).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    stage = "timeline_summary",
                    completed_chunks = e.completed_chunks(),
                    error = %e,
                    "optional stage failed; completed chunk calls are not costed"
                );
                None
            }
        }
    }

    async fn run_timeline(
        &self,
        config: &TextStageConfig,
        chunking: &TimelineChunking,
        game: &CompletedMatch,
        raw: &Value,
        on_chunk: ChunkProgress<'_>,
    ) -> Result<TimelineOutcome, StageFailure> {
        let compact = CompactTimeline::from_raw(raw)?;
        let vars = prompts::base_vars(game);

        let Some(chunks) = compact.chunks(chunking) else {
            let vars = vars.set("timeline", compact.text());
            let trace = self
                .call_stage(config, &prompts::TIMELINE_SUMMARY, config.user_prompt.as_deref(), &vars)
                .await?;
            return Ok(TimelineOutcome {
                summary: Some(trace),
                chunks: None,
                aggregate: None,
            });
        };

        let total = chunks.len();
        let mut chunk_traces = Vec::with_capacity(total);
        for chunk in chunks {
            on_chunk(chunk.index, total);
            let vars = vars
                .clone()
                .set("timeline", chunk.text)
                .set("time_range", chunk.time_range.clone());
            let trace = self
                .call_stage(config, &prompts::TIMELINE_CHUNK, config.user_prompt.as_deref(), &vars)
                .await
                .map_err(|source| StageFailure::Chunk {
                    index: chunk.index,
                    total,
                    completed: chunk_traces.len(),
                    source,
                })?;
            tracing::debug!(chunk = chunk.index, total, time_range = %chunk.time_range, "timeline chunk summarized");
            chunk_traces.push(TimelineChunkTrace {
                chunk_index: chunk.index,
                time_range: chunk.time_range,
                trace,
            });
        }

        let segments: Vec<(usize, String, String)> = chunk_traces
            .iter()
            .map(|c| (c.chunk_index, c.time_range.clone(), c.trace.text().to_string()))
            .collect();
        let vars = vars.set("segments", timeline::aggregate_input(&segments));
        let aggregate = self
            .call_stage(config, &prompts::TIMELINE_AGGREGATE, None, &vars)
            .await?;

        Ok(TimelineOutcome {
            summary: None,
            chunks: Some(chunk_traces),
            aggregate: Some(aggregate),
        })
    }

    // =========================================================================
    // match_summary
    // =========================================================================

    pub async fn match_summary(
        &self,
        config: &TextStageConfig,
        game: &CompletedMatch,
        raw_match: Option<&Value>,
    ) -> Option<StageTrace> {
        if !config.enabled {
            return None;
        }
        let Some(raw) = raw_match else {
            tracing::warn!(stage = "match_summary", "no raw match; skipping stage");
            return None;
        };

        let vars = prompts::base_vars(game).set("raw_match", raw.to_string());
        match self
            .call_stage(config, &prompts::MATCH_SUMMARY, config.user_prompt.as_deref(), &vars)
            .await
        {
            Ok(trace) => Some(trace),
            Err(e) => {
                tracing::warn!(stage = "match_summary", code = e.code(), error = %e, "optional stage failed");
                None
            }
        }
    }

    // =========================================================================
    // review_text (mandatory)
    // =========================================================================

    pub async fn review_text(
        &self,
        config: &ReviewStageConfig,
        game: &CompletedMatch,
        personality: &Personality,
        match_summary: Option<&str>,
        timeline_summary: Option<&str>,
        behavior: Option<&str>,
    ) -> Result<StageTrace, ProviderError> {
        let context = prompts::review_context(game, personality, match_summary, timeline_summary, behavior);
        let vars = prompts::personality_vars(prompts::base_vars(game), personality)
            .set("review_context", context)
            .set_opt("match_summary", match_summary)
            .set_opt("timeline_summary", timeline_summary)
            .set_opt("behavior", behavior);
        let prompt = prompts::REVIEW_TEXT.render(
            config.system_prompt.as_deref(),
            config.user_prompt.as_deref(),
            &vars,
        );
        self.call(prompts::REVIEW_TEXT.slug, &config.model, &prompt).await
    }

    // =========================================================================
    // image_description
    // =========================================================================

    pub async fn image_description(
        &self,
        config: &TextStageConfig,
        game: &CompletedMatch,
        review: &str,
        art_style: Option<&str>,
        image_prompts: &[String],
    ) -> Option<StageTrace> {
        if !config.enabled {
            return None;
        }
        let vars = prompts::base_vars(game)
            .set("review", review)
            .set("art_style", art_style.unwrap_or("painterly digital illustration"))
            .set_opt("image_prompts", prompts::image_prompt_lines(image_prompts).as_deref());
        match self
            .call_stage(config, &prompts::IMAGE_DESCRIPTION, config.user_prompt.as_deref(), &vars)
            .await
        {
            Ok(trace) => Some(trace),
            Err(e) => {
                tracing::warn!(stage = "image_description", code = e.code(), error = %e, "optional stage failed");
                None
            }
        }
    }

    // =========================================================================
    // image_generation
    // =========================================================================

    /// Silent skip when disabled or when no image client is configured.
    pub async fn image_generation(&self, config: &ImageStageConfig, prompt: &str) -> Option<ImageOutcome> {
        if !config.enabled {
            return None;
        }
        if !self.invoker.has_image_client() {
            tracing::debug!(stage = "image_generation", "no image client configured; skipping");
            return None;
        }

        match self
            .invoker
            .invoke_image(&config.model, prompt, config.timeout())
            .await
        {
            Ok(invocation) => {
                let image_size_bytes = invocation.image_bytes.as_ref().map(Vec::len);
                Some(ImageOutcome {
                    trace: ImageGenerationTrace {
                        prompt: prompt.to_string(),
                        model: config.model.clone(),
                        duration_ms: invocation.duration_ms,
                        image_generated: image_size_bytes.is_some(),
                        image_size_bytes,
                    },
                    image_bytes: invocation.image_bytes,
                })
            }
            Err(e) => {
                tracing::warn!(stage = "image_generation", code = e.code(), error = %e, "optional stage failed");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum StageFailure {
    #[error(transparent)]
    Timeline(#[from] timeline::TimelineError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("timeline chunk {} of {total} failed: {source}", .index + 1)]
    Chunk {
        index: usize,
        total: usize,
        completed: usize,
        #[source]
        source: ProviderError,
    },
}

impl StageFailure {
    /// Chunk calls that succeeded (and were billed) before the failure.
    fn completed_chunks(&self) -> usize {
        match self {
            Self::Chunk { completed, .. } => *completed,
            _ => 0,
        }
    }
}
