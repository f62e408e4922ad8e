#![forbid(unsafe_code)]

//! # scout-review
//!
//! Turns a finished League of Legends match into a short in-character review,
//! plus an optional illustration.
//!
//! A generation runs up to five stages against LLM and image providers:
//! timeline summary (chunked for long games), match summary, review text,
//! image description, and image generation. Only the review text is
//! mandatory. Every stage is traced (prompts, responses, timing, tokens),
//! costed, and every settled generation is written to a local SQLite history
//! that can later be rated and annotated.
//!
//! Start with [`service::ReviewService::generate_review`].

pub mod config;
pub mod cost;
pub mod cost_tracker;
pub mod gateway;
pub mod history;
pub mod legacy;
pub mod personality;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod stages;
pub mod store;
pub mod ticker;
pub mod timeline;
pub mod trace;

pub use config::{ModelConfig, PipelineStagesConfig, ReviewConfig, StageKind};
pub use cost::{CostBreakdown, CostCalculator, PipelineCostBreakdown, StageCost};
pub use cost_tracker::{CostSnapshot, CostTracker};
pub use gateway::{ChatProvider, ImageProvider, ModelInvoker, ProviderError};
pub use history::{ConfigSnapshot, HistoryEntry, HistoryStatus, HistoryStore, Rating};
pub use personality::{ArtStyle, Catalog, Personality};
pub use pipeline::{
    CompletedMatch, GenerationMetadata, GenerationResult, PipelineError, PipelineInput,
    PipelineOrchestrator, PipelineOutput, ProgressEvent, ProgressStep,
};
pub use service::{ClientFactory, GenerateParams, HttpClientFactory, ReviewService};
pub use stages::StageRunner;
pub use store::{ConfigStore, Database, StoreError};
pub use ticker::{ElapsedTicker, TickerSubscription};
pub use trace::{PipelineIntermediateResults, PipelineTraces, StageTrace, TimelineChunkTrace};
