//! Review pipeline orchestrator.
//!
//! Sequences the stages in dependency order:
//!
//! ```text
//! setup → timeline_summary? → match_summary? → review_text → image_description? → image_generation? → complete
//! ```
//!
//! Input validation and the review stage are the only ways to fail. Every
//! other stage degrades to `None`.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{PipelineStagesConfig, StageKind};
use crate::cost::PipelineCostBreakdown;
use crate::gateway::{elapsed_ms, ModelInvoker, ProviderError};
use crate::personality::{self, ArtStyle, Personality};
use crate::stages::StageRunner;
use crate::timeline::format_clock;
use crate::trace::{PipelineIntermediateResults, PipelineTraces};

const MAX_IMAGE_PROMPTS: usize = 2;

// =============================================================================
// Input
// =============================================================================

/// The finished game, from the reviewed player's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedMatch {
    pub match_id: String,
    pub player_name: String,
    pub champion: String,
    #[serde(default)]
    pub role: Option<String>,
    pub win: bool,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub duration_secs: u64,
    #[serde(default)]
    pub queue: Option<String>,
}

impl CompletedMatch {
    /// Extract the player's line from a raw match-v5 document. `player`
    /// matches puuid, Riot ID game name, or summoner name.
    pub fn from_raw(raw: &Value, player: &str) -> Result<Self, PipelineError> {
        let info = raw
            .get("info")
            .ok_or_else(|| PipelineError::Validation("raw match has no info block".into()))?;
        let participants = info
            .get("participants")
            .and_then(Value::as_array)
            .ok_or_else(|| PipelineError::Validation("raw match has no participants".into()))?;

        let field = |p: &Value, key: &str| p.get(key).and_then(Value::as_str).map(str::to_string);
        let count = |p: &Value, key: &str| {
            p.get(key)
                .and_then(Value::as_u64)
                .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
        };

        let p = participants
            .iter()
            .find(|p| {
                ["puuid", "riotIdGameName", "summonerName"]
                    .iter()
                    .any(|k| field(*p, *k).is_some_and(|v| v.eq_ignore_ascii_case(player)))
            })
            .ok_or_else(|| {
                PipelineError::Validation(format!("player {player} not found in match"))
            })?;

        Ok(Self {
            match_id: raw
                .pointer("/metadata/matchId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            player_name: field(p, "riotIdGameName")
                .or_else(|| field(p, "summonerName"))
                .unwrap_or_else(|| player.to_string()),
            champion: field(p, "championName").unwrap_or_default(),
            role: field(p, "teamPosition").filter(|r| !r.is_empty()),
            win: p.get("win").and_then(Value::as_bool).unwrap_or(false),
            kills: count(p, "kills"),
            deaths: count(p, "deaths"),
            assists: count(p, "assists"),
            duration_secs: info.get("gameDuration").and_then(Value::as_u64).unwrap_or(0),
            queue: info
                .get("queueId")
                .and_then(Value::as_u64)
                .map(|q| q.to_string()),
        })
    }

    pub fn describe(&self) -> String {
        let role = self
            .role
            .as_deref()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        format!(
            "{} on {}{}: {}, {}/{}/{} in {}",
            self.player_name,
            self.champion,
            role,
            if self.win { "Victory" } else { "Defeat" },
            self.kills,
            self.deaths,
            self.assists,
            format_clock(self.duration_secs * 1_000),
        )
    }
}

pub struct PipelineInput {
    pub game: CompletedMatch,
    pub raw_match: Option<Value>,
    pub raw_timeline: Option<Value>,
    pub personality: Personality,
    pub art_styles: Vec<ArtStyle>,
    pub stages: PipelineStagesConfig,
}

// =============================================================================
// Progress
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    TimelineSummary,
    TimelineChunk,
    MatchSummary,
    ReviewText,
    ImageDescription,
    ImageGeneration,
    Complete,
}

impl From<StageKind> for ProgressStep {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::TimelineSummary => Self::TimelineSummary,
            StageKind::MatchSummary => Self::MatchSummary,
            StageKind::ReviewText => Self::ReviewText,
            StageKind::ImageDescription => Self::ImageDescription,
            StageKind::ImageGeneration => Self::ImageGeneration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_stages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_total: Option<usize>,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Emits events with a 1-based stage counter that never decreases and never
/// passes `total`.
struct Progress<'a> {
    callback: Option<&'a ProgressCallback>,
    stages: Vec<StageKind>,
    current: usize,
}

impl<'a> Progress<'a> {
    fn new(callback: Option<&'a ProgressCallback>, stages: Vec<StageKind>) -> Self {
        Self {
            callback,
            stages,
            current: 0,
        }
    }

    fn total(&self) -> usize {
        self.stages.len()
    }

    fn emit(&self, step: ProgressStep, message: String, chunk: Option<(usize, usize)>) {
        if let Some(cb) = self.callback {
            cb(&ProgressEvent {
                step,
                message,
                current_stage: Some(self.current),
                total_stages: Some(self.total()),
                chunk_index: chunk.map(|(i, _)| i),
                chunk_total: chunk.map(|(_, n)| n),
            });
        }
    }

    fn begin(&mut self, stage: StageKind) {
        if let Some(pos) = self.stages.iter().position(|s| *s == stage) {
            self.current = self.current.max(pos + 1);
        }
        self.emit(stage.into(), format!("{}: started", stage_label(stage)), None);
    }

    fn finish(&self, stage: StageKind, produced: bool) {
        let outcome = if produced { "done" } else { "skipped" };
        self.emit(stage.into(), format!("{}: {outcome}", stage_label(stage)), None);
    }

    fn chunk(&self, index: usize, total: usize) {
        self.emit(
            ProgressStep::TimelineChunk,
            format!("Summarizing timeline segment {} of {total}", index + 1),
            Some((index, total)),
        );
    }

    fn complete(&mut self) {
        self.current = self.total();
        self.emit(ProgressStep::Complete, "Review complete".to_string(), None);
    }
}

fn stage_label(stage: StageKind) -> &'static str {
    match stage {
        StageKind::TimelineSummary => "Timeline summary",
        StageKind::MatchSummary => "Match summary",
        StageKind::ReviewText => "Review text",
        StageKind::ImageDescription => "Image description",
        StageKind::ImageGeneration => "Image generation",
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
}

/// What the run was given, for display and history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    pub personality_id: String,
    pub reviewer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    pub enabled_stages: Vec<StageKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub review: ReviewOutput,
    pub traces: PipelineTraces,
    pub intermediate: PipelineIntermediateResults,
    pub context: PipelineContext,
    pub text_duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub text_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_duration_ms: Option<u64>,
    pub image_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traces: Option<PipelineTraces>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<PipelineIntermediateResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<PipelineCostBreakdown>,
}

/// `error` is set iff the pipeline failed; `image` only if one was generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub metadata: GenerationMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    fn failed(error: &ProviderError, text_duration_ms: u64) -> Self {
        Self {
            text: String::new(),
            image: None,
            metadata: GenerationMetadata {
                text_duration_ms,
                image_generated: false,
                ..GenerationMetadata::default()
            },
            error: Some(error.to_string()),
        }
    }
}

impl From<PipelineOutput> for GenerationResult {
    fn from(out: PipelineOutput) -> Self {
        let image_duration_ms = out.traces.image_generation.as_ref().map(|t| t.duration_ms);
        let image_generated = out.review.image_base64.is_some();
        Self {
            text: out.review.text,
            image: out.review.image_base64,
            metadata: GenerationMetadata {
                text_duration_ms: out.text_duration_ms,
                image_duration_ms,
                image_generated,
                personality_id: Some(out.context.personality_id),
                reviewer_name: Some(out.context.reviewer_name),
                traces: Some(out.traces),
                intermediate: Some(out.intermediate),
                cost: None,
            },
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing required input; surfaced before any network call.
    #[error("{0}")]
    Validation(String),
    #[error("review text stage failed: {0}")]
    ReviewStage(#[source] ProviderError),
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Clone)]
pub struct PipelineOrchestrator {
    runner: StageRunner,
    seed: Option<u64>,
}

impl PipelineOrchestrator {
    pub fn new(invoker: ModelInvoker) -> Self {
        Self {
            runner: StageRunner::new(invoker),
            seed: None,
        }
    }

    /// Fix the random draws (behavior, art style, image prompts).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Each summary stage needs its own raw input; nothing else is required.
    pub fn validate(input: &PipelineInput) -> Result<(), PipelineError> {
        if input.stages.match_summary.enabled && input.raw_match.is_none() {
            return Err(PipelineError::Validation(
                "Raw match data is required for the match summary stage".into(),
            ));
        }
        if input.stages.timeline_summary.enabled && input.raw_timeline.is_none() {
            return Err(PipelineError::Validation(
                "Raw timeline data is required for the timeline summary stage".into(),
            ));
        }
        Ok(())
    }

    /// Run the pipeline. A review-stage failure becomes a result with `error`
    /// set; only validation returns `Err`.
    pub async fn run(
        &self,
        input: &PipelineInput,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<GenerationResult, PipelineError> {
        let start = Instant::now();
        match self.run_pipeline(input, on_progress).await {
            Ok(output) => Ok(output.into()),
            Err(PipelineError::ReviewStage(e)) => {
                tracing::warn!(
                    code = e.code(),
                    request_id = e.request_id(),
                    error = %e,
                    personality = %input.personality.id,
                    "review generation failed"
                );
                Ok(GenerationResult::failed(&e, elapsed_ms(start)))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run_pipeline(
        &self,
        input: &PipelineInput,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<PipelineOutput, PipelineError> {
        Self::validate(input)?;

        let start = Instant::now();
        let stages = &input.stages;
        let enabled = stages.enabled_stages(self.runner.has_image_client());
        let mut progress = Progress::new(on_progress, enabled.clone());
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::debug!(
            personality = %input.personality.id,
            stages = ?enabled,
            "pipeline started"
        );

        let mut intermediate = PipelineIntermediateResults::default();

        // timeline_summary
        let timeline = if enabled.contains(&StageKind::TimelineSummary) {
            progress.begin(StageKind::TimelineSummary);
            let on_chunk = |index: usize, total: usize| progress.chunk(index, total);
            let outcome = self
                .runner
                .timeline_summary(
                    &stages.timeline_summary,
                    &stages.timeline_chunking,
                    &input.game,
                    input.raw_timeline.as_ref(),
                    &on_chunk,
                )
                .await;
            progress.finish(StageKind::TimelineSummary, outcome.is_some());
            outcome
        } else {
            None
        };
        if let Some(t) = &timeline {
            intermediate.timeline_summary_text = t.text().map(str::to_string);
            intermediate.timeline_chunk_summaries = t.chunk_summaries();
        }

        // match_summary
        let match_summary = if enabled.contains(&StageKind::MatchSummary) {
            progress.begin(StageKind::MatchSummary);
            let trace = self
                .runner
                .match_summary(&stages.match_summary, &input.game, input.raw_match.as_ref())
                .await;
            progress.finish(StageKind::MatchSummary, trace.is_some());
            trace
        } else {
            None
        };
        intermediate.match_summary_text = match_summary.as_ref().map(|t| t.text().to_string());

        // review_text
        let behavior = personality::draw_behavior(&input.personality.behaviors, &mut rng)
            .map(|b| b.text.clone());
        progress.begin(StageKind::ReviewText);
        let review = self
            .runner
            .review_text(
                &stages.review_text,
                &input.game,
                &input.personality,
                intermediate.match_summary_text.as_deref(),
                intermediate.timeline_summary_text.as_deref(),
                behavior.as_deref(),
            )
            .await
            .map_err(PipelineError::ReviewStage)?;
        progress.finish(StageKind::ReviewText, true);
        let review_text = review.text().to_string();

        // image_description
        let description = if enabled.contains(&StageKind::ImageDescription) {
            let art_style = personality::pick_art_style(&input.art_styles, &mut rng).cloned();
            let image_prompts =
                personality::pick_image_prompts(&input.personality.image_prompts, MAX_IMAGE_PROMPTS, &mut rng);
            progress.begin(StageKind::ImageDescription);
            let trace = self
                .runner
                .image_description(
                    &stages.image_description,
                    &input.game,
                    &review_text,
                    art_style.as_ref().map(|s| s.description.as_str()),
                    &image_prompts,
                )
                .await;
            progress.finish(StageKind::ImageDescription, trace.is_some());
            intermediate.selected_art_style = art_style.map(|s| s.id);
            intermediate.selected_image_prompts = (!image_prompts.is_empty()).then_some(image_prompts);
            trace
        } else {
            None
        };
        intermediate.image_description_text = description.as_ref().map(|t| t.text().to_string());
        let text_duration_ms = elapsed_ms(start);

        // image_generation
        let image = if enabled.contains(&StageKind::ImageGeneration) {
            let prompt = intermediate
                .image_description_text
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(&review_text);
            progress.begin(StageKind::ImageGeneration);
            let outcome = self
                .runner
                .image_generation(&stages.image_generation, prompt)
                .await;
            progress.finish(
                StageKind::ImageGeneration,
                outcome.as_ref().is_some_and(|o| o.trace.image_generated),
            );
            outcome
        } else {
            None
        };

        progress.complete();

        let (image_trace, image_base64) = match image {
            Some(outcome) => (
                Some(outcome.trace),
                outcome
                    .image_bytes
                    .map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
            ),
            None => (None, None),
        };

        let mut traces = PipelineTraces::new(review);
        if let Some(t) = timeline {
            traces.timeline_summary = t.summary;
            traces.timeline_chunks = t.chunks;
            traces.timeline_aggregate = t.aggregate;
        }
        traces.match_summary = match_summary;
        traces.image_description = description;
        traces.image_generation = image_trace;

        tracing::info!(
            personality = %input.personality.id,
            duration_ms = elapsed_ms(start),
            image = image_base64.is_some(),
            "review generated"
        );

        Ok(PipelineOutput {
            review: ReviewOutput {
                text: review_text,
                image_base64,
            },
            traces,
            intermediate,
            context: PipelineContext {
                personality_id: input.personality.id.clone(),
                reviewer_name: input.personality.name.clone(),
                behavior,
                enabled_stages: enabled,
            },
            text_duration_ms,
        })
    }
}
