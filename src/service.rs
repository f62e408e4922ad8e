//! Caller layer: the single entry point for generating a review.
//!
//! Owns the active-generations map, wires the orchestrator to cost tracking
//! and history, and attributes progress events to generation ids.
//!
//! Cancellation is local only: `cancel` forgets the generation, but the
//! provider calls already in flight run to completion and the result is
//! still saved to history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::{PipelineStagesConfig, ReviewConfig};
use crate::cost::CostCalculator;
use crate::cost_tracker::CostTracker;
use crate::gateway::{
    ChatProvider, GeminiImageAdapter, ImageProvider, ModelInvoker, OpenAiAdapter, PricingTable,
    ProviderError,
};
use crate::history::{create_pending_id, ConfigSnapshot, HistoryStore};
use crate::personality::{ArtStyle, Personality};
use crate::pipeline::{
    CompletedMatch, GenerationResult, PipelineError, PipelineInput, PipelineOrchestrator,
    ProgressCallback, ProgressEvent,
};
use crate::ticker::ElapsedTicker;

// =============================================================================
// Provider clients
// =============================================================================

/// Builds provider clients from API keys.
pub trait ClientFactory: Send + Sync {
    fn text_client(&self, api_key: &str) -> Result<Arc<dyn ChatProvider>, ProviderError>;
    fn image_client(&self, api_key: &str) -> Result<Arc<dyn ImageProvider>, ProviderError>;
}

/// OpenAI-compatible text client and Gemini image client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    openai_base_url: String,
    openai_timeout: Duration,
    gemini_base_url: String,
}

impl HttpClientFactory {
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            openai_base_url: config.openai_base_url.clone(),
            openai_timeout: config.openai_timeout,
            gemini_base_url: config.gemini_base_url.clone(),
        }
    }
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self::from_config(&ReviewConfig::default())
    }
}

impl ClientFactory for HttpClientFactory {
    fn text_client(&self, api_key: &str) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        Ok(Arc::new(OpenAiAdapter::with_config(
            api_key,
            &self.openai_base_url,
            self.openai_timeout,
        )?))
    }

    fn image_client(&self, api_key: &str) -> Result<Arc<dyn ImageProvider>, ProviderError> {
        Ok(Arc::new(GeminiImageAdapter::with_base_url(
            api_key,
            &self.gemini_base_url,
        )?))
    }
}

// =============================================================================
// Requests and bookkeeping
// =============================================================================

pub struct GenerateParams {
    pub game: CompletedMatch,
    pub raw_match: Option<Value>,
    pub raw_timeline: Option<Value>,
    pub personality: Personality,
    pub art_styles: Vec<ArtStyle>,
    pub stages: PipelineStagesConfig,
    pub openai_api_key: Option<String>,
    /// Absent or empty: the image stage is skipped silently.
    pub gemini_api_key: Option<String>,
}

/// Progress callback attributed with the generation id.
pub type GenerationProgress = Arc<dyn Fn(&str, &ProgressEvent) + Send + Sync>;

struct ActiveGeneration {
    started: Instant,
    started_at: DateTime<Utc>,
    personality: String,
    last_progress: Option<ProgressEvent>,
}

/// Point-in-time view of an in-flight generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveGenerationView {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub personality: String,
    pub elapsed: Duration,
    pub last_progress: Option<ProgressEvent>,
}

type ActiveMap = Arc<Mutex<HashMap<String, ActiveGeneration>>>;

fn lock_active(active: &ActiveMap) -> MutexGuard<'_, HashMap<String, ActiveGeneration>> {
    active.lock().unwrap_or_else(|p| p.into_inner())
}

/// A validated generation with its id assigned.
struct Prepared {
    id: String,
    input: PipelineInput,
    invoker: ModelInvoker,
}

// =============================================================================
// Service
// =============================================================================

#[derive(Clone)]
pub struct ReviewService {
    factory: Arc<dyn ClientFactory>,
    history: Arc<HistoryStore>,
    costs: Arc<CostTracker>,
    calculator: CostCalculator,
    ticker: ElapsedTicker,
    active: ActiveMap,
    on_progress: Option<GenerationProgress>,
}

impl ReviewService {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        history: Arc<HistoryStore>,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            factory,
            history,
            costs,
            calculator: CostCalculator::default(),
            ticker: ElapsedTicker::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            on_progress: None,
        }
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.calculator = CostCalculator::new(pricing);
        self
    }

    pub fn with_ticker(mut self, ticker: ElapsedTicker) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn with_progress(mut self, on_progress: GenerationProgress) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn costs(&self) -> &Arc<CostTracker> {
        &self.costs
    }

    pub fn ticker(&self) -> &ElapsedTicker {
        &self.ticker
    }

    /// Generate one review and wait for it.
    ///
    /// Validation failures return `Err` before an id exists and are never
    /// saved. Everything else, including a failed review stage, returns a
    /// result that has been recorded in history.
    pub async fn generate_review(&self, params: GenerateParams) -> Result<GenerationResult, PipelineError> {
        let prepared = self.prepare(params)?;
        Ok(self.execute(prepared).await)
    }

    /// Validate, then run the generation as its own task.
    pub fn start_generation(
        &self,
        params: GenerateParams,
    ) -> Result<(String, JoinHandle<GenerationResult>), PipelineError> {
        let prepared = self.prepare(params)?;
        let id = prepared.id.clone();
        let service = self.clone();
        let handle = tokio::spawn(async move { service.execute(prepared).await });
        Ok((id, handle))
    }

    /// Forget a pending generation. The in-flight call is not aborted and its
    /// result is still persisted when it settles.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = lock_active(&self.active).remove(id).is_some();
        if removed {
            tracing::info!(id, "generation cancelled locally; provider call continues");
        }
        removed
    }

    /// In-flight generations, oldest first.
    pub fn active_generations(&self) -> Vec<ActiveGenerationView> {
        let active = lock_active(&self.active);
        let mut views: Vec<ActiveGenerationView> = active
            .iter()
            .map(|(id, g)| ActiveGenerationView {
                id: id.clone(),
                started_at: g.started_at,
                personality: g.personality.clone(),
                elapsed: g.started.elapsed(),
                last_progress: g.last_progress.clone(),
            })
            .collect();
        views.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        views
    }

    fn prepare(&self, params: GenerateParams) -> Result<Prepared, PipelineError> {
        let openai_key = params
            .openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PipelineError::Validation("OpenAI API key is required".into()))?;

        let input = PipelineInput {
            game: params.game,
            raw_match: params.raw_match,
            raw_timeline: params.raw_timeline,
            personality: params.personality,
            art_styles: params.art_styles,
            stages: params.stages,
        };
        PipelineOrchestrator::validate(&input)?;

        let text = self
            .factory
            .text_client(openai_key)
            .map_err(|e| PipelineError::Validation(format!("OpenAI client: {e}")))?;
        let image = match params.gemini_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => match self.factory.image_client(key) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!(error = %e, "image client unavailable; image stage will be skipped");
                    None
                }
            },
            _ => None,
        };

        let id = create_pending_id();
        lock_active(&self.active).insert(
            id.clone(),
            ActiveGeneration {
                started: Instant::now(),
                started_at: Utc::now(),
                personality: input.personality.id.clone(),
                last_progress: None,
            },
        );
        tracing::debug!(id = %id, personality = %input.personality.id, "generation registered");

        Ok(Prepared {
            id,
            input,
            invoker: ModelInvoker::new(text, image),
        })
    }

    async fn execute(&self, prepared: Prepared) -> GenerationResult {
        let Prepared { id, input, invoker } = prepared;

        let callback: ProgressCallback = {
            let id = id.clone();
            let active = self.active.clone();
            let forward = self.on_progress.clone();
            Arc::new(move |event: &ProgressEvent| {
                if let Some(g) = lock_active(&active).get_mut(&id) {
                    g.last_progress = Some(event.clone());
                }
                if let Some(forward) = &forward {
                    forward(&id, event);
                }
            })
        };

        let orchestrator = PipelineOrchestrator::new(invoker);
        let mut result = match orchestrator.run(&input, Some(&callback)).await {
            Ok(result) => result,
            Err(e) => GenerationResult {
                text: String::new(),
                image: None,
                metadata: Default::default(),
                error: Some(e.to_string()),
            },
        };

        if !result.is_error() {
            if let Some(traces) = &result.metadata.traces {
                let cost = self.calculator.pipeline_cost(traces);
                self.costs.add(id.clone(), cost.total).await;
                result.metadata.cost = Some(cost);
            }
        }

        let snapshot = ConfigSnapshot {
            model: Some(input.stages.review_text.model.model().to_string()),
            personality: Some(input.personality.id.clone()),
            image_description: result
                .metadata
                .intermediate
                .as_ref()
                .and_then(|i| i.image_description_text.clone()),
        };
        self.history.save_completed(&id, result.clone(), snapshot).await;

        lock_active(&self.active).remove(&id);
        tracing::debug!(id = %id, error = result.is_error(), "generation settled");
        result
    }
}
