//! Stage and model configuration, plus process-level settings.
//!
//! `ModelConfig` values are validated on construction and on deserialization,
//! so a config that exists is always in range.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_MAX_TOKENS: u32 = 100;
pub const MAX_MAX_TOKENS: u32 = 100_000;

pub const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_IMAGE_TIMEOUT_MS: u64 = 60_000;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_DB_PATH: &str = ".scout_review.sqlite";
pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("model id must not be empty")]
    EmptyModel,
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

// =============================================================================
// Model configuration
// =============================================================================

/// A text-generation backend and its sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawModelConfig")]
pub struct ModelConfig {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Deserialize)]
struct RawModelConfig {
    model: String,
    max_tokens: u32,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
}

impl TryFrom<RawModelConfig> for ModelConfig {
    type Error = ConfigError;

    fn try_from(raw: RawModelConfig) -> Result<Self, Self::Error> {
        let mut config = ModelConfig::new(raw.model, raw.max_tokens)?;
        if let Some(t) = raw.temperature {
            config = config.with_temperature(t)?;
        }
        if let Some(p) = raw.top_p {
            config = config.with_top_p(p)?;
        }
        Ok(config)
    }
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Result<Self, ConfigError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(ConfigError::EmptyModel);
        }
        check_range("max_tokens", max_tokens as f64, MIN_MAX_TOKENS as f64, MAX_MAX_TOKENS as f64)?;
        Ok(Self {
            model,
            max_tokens,
            temperature: None,
            top_p: None,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Result<Self, ConfigError> {
        check_range("temperature", temperature as f64, 0.0, 2.0)?;
        self.temperature = Some(temperature);
        Ok(self)
    }

    pub fn with_top_p(mut self, top_p: f32) -> Result<Self, ConfigError> {
        check_range("top_p", top_p as f64, 0.0, 1.0)?;
        self.top_p = Some(top_p);
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Stage configuration
// =============================================================================

/// The five pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    TimelineSummary,
    MatchSummary,
    ReviewText,
    ImageDescription,
    ImageGeneration,
}

impl StageKind {
    pub const ORDER: [StageKind; 5] = [
        StageKind::TimelineSummary,
        StageKind::MatchSummary,
        StageKind::ReviewText,
        StageKind::ImageDescription,
        StageKind::ImageGeneration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TimelineSummary => "timeline_summary",
            Self::MatchSummary => "match_summary",
            Self::ReviewText => "review_text",
            Self::ImageDescription => "image_description",
            Self::ImageGeneration => "image_generation",
        }
    }
}

/// Configuration for an optional single-call text stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStageConfig {
    pub enabled: bool,
    pub model: ModelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

impl TextStageConfig {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            enabled: true,
            model,
            system_prompt: None,
            user_prompt: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = Some(prompt.into());
        self
    }
}

/// Configuration for the mandatory review stage. It has no `enabled` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewStageConfig {
    pub model: ModelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

impl ReviewStageConfig {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            model,
            system_prompt: None,
            user_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Image generation uses a bare model id and a deadline instead of `ModelConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStageConfig {
    pub enabled: bool,
    pub model: String,
    pub timeout_ms: u64,
}

impl ImageStageConfig {
    pub fn new(model: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            enabled: true,
            model: model.into(),
            timeout_ms,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Token budgets governing when and how the timeline is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineChunking {
    /// Timelines at or under this many tokens are summarized in one call.
    pub max_tokens_per_call: usize,
    /// Upper bound for each chunk when splitting.
    pub max_tokens_per_chunk: usize,
}

impl Default for TimelineChunking {
    fn default() -> Self {
        Self {
            max_tokens_per_call: 12_000,
            max_tokens_per_chunk: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStagesConfig {
    pub timeline_summary: TextStageConfig,
    pub match_summary: TextStageConfig,
    pub review_text: ReviewStageConfig,
    pub image_description: TextStageConfig,
    pub image_generation: ImageStageConfig,
    #[serde(default)]
    pub timeline_chunking: TimelineChunking,
}

impl PipelineStagesConfig {
    fn is_enabled(&self, stage: StageKind, image_client_available: bool) -> bool {
        match stage {
            StageKind::TimelineSummary => self.timeline_summary.enabled,
            StageKind::MatchSummary => self.match_summary.enabled,
            StageKind::ReviewText => true,
            StageKind::ImageDescription => self.image_description.enabled,
            StageKind::ImageGeneration => self.image_generation.enabled && image_client_available,
        }
    }

    /// Stages that will run, in dependency order. Always contains `ReviewText`.
    ///
    /// Image generation only counts when an image-capable client exists.
    pub fn enabled_stages(&self, image_client_available: bool) -> Vec<StageKind> {
        StageKind::ORDER
            .into_iter()
            .filter(|s| self.is_enabled(*s, image_client_available))
            .collect()
    }
}

impl Default for PipelineStagesConfig {
    fn default() -> Self {
        Self {
            timeline_summary: TextStageConfig::new(default_model(2_000, 0.3)),
            match_summary: TextStageConfig::new(default_model(2_000, 0.3)),
            review_text: ReviewStageConfig::new(default_model(1_500, 0.9)),
            image_description: TextStageConfig::new(default_model(2_000, 0.3)),
            image_generation: ImageStageConfig::new(DEFAULT_IMAGE_MODEL, DEFAULT_IMAGE_TIMEOUT_MS),
            timeline_chunking: TimelineChunking::default(),
        }
    }
}

fn default_model(max_tokens: u32, temperature: f32) -> ModelConfig {
    ModelConfig {
        model: DEFAULT_TEXT_MODEL.to_string(),
        max_tokens,
        temperature: Some(temperature),
        top_p: None,
    }
}

// =============================================================================
// Persisted config blobs
// =============================================================================

/// Application-wide settings persisted under the `global` config key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub default_personality: Option<String>,
    #[serde(default)]
    pub stages: Option<PipelineStagesConfig>,
}

/// Per-tab overrides persisted under `tab:<id>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabConfig {
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub stages: Option<PipelineStagesConfig>,
}

impl GlobalConfig {
    /// Effective personality and stages for a tab: tab, then global, then defaults.
    pub fn resolve(&self, tab: &TabConfig) -> (Option<String>, PipelineStagesConfig) {
        let personality = tab
            .personality
            .clone()
            .or_else(|| self.default_personality.clone());
        let stages = tab
            .stages
            .clone()
            .or_else(|| self.stages.clone())
            .unwrap_or_default();
        (personality, stages)
    }
}

// =============================================================================
// Process settings
// =============================================================================

/// Settings read from the environment.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_timeout: Duration,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub db_path: PathBuf,
    pub max_history_entries: usize,
    pub legacy_history_path: Option<PathBuf>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            openai_timeout: Duration::from_secs(120),
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            max_history_entries: DEFAULT_MAX_HISTORY_ENTRIES,
            legacy_history_path: None,
        }
    }
}

impl ReviewConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let openai_timeout = match non_empty("OPENAI_TIMEOUT_SECONDS") {
            Some(raw) => Duration::from_secs(raw.trim().parse().map_err(|_| {
                ConfigError::InvalidEnv {
                    var: "OPENAI_TIMEOUT_SECONDS",
                    value: raw.clone(),
                }
            })?),
            None => defaults.openai_timeout,
        };

        let max_history_entries = match non_empty("SCOUT_REVIEW_MAX_HISTORY") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidEnv {
                    var: "SCOUT_REVIEW_MAX_HISTORY",
                    value: raw.clone(),
                })?,
            None => defaults.max_history_entries,
        };

        Ok(Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_base_url: non_empty("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_timeout,
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_base_url: non_empty("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            db_path: non_empty("SCOUT_REVIEW_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            max_history_entries,
            legacy_history_path: non_empty("SCOUT_REVIEW_LEGACY_HISTORY").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn model_config_rejects_out_of_range_values() {
        assert!(ModelConfig::new("gpt-4o-mini", 99).is_err());
        assert!(ModelConfig::new("gpt-4o-mini", 100_001).is_err());
        assert!(ModelConfig::new("", 1_000).is_err());

        let base = ModelConfig::new("gpt-4o-mini", 1_000).unwrap();
        assert!(base.clone().with_temperature(2.1).is_err());
        assert!(base.clone().with_temperature(-0.1).is_err());
        assert!(base.clone().with_top_p(1.5).is_err());
        assert!(base.with_top_p(f32::NAN).is_err());
    }

    #[test]
    fn model_config_deserialization_is_validated() {
        let ok: ModelConfig =
            serde_json::from_str(r#"{"model":"gpt-4o","max_tokens":500,"temperature":1.2}"#)
                .unwrap();
        assert_eq!(ok.temperature(), Some(1.2));
        assert_eq!(ok.top_p(), None);

        let err = serde_json::from_str::<ModelConfig>(r#"{"model":"gpt-4o","max_tokens":50}"#);
        assert!(err.is_err());
    }

    #[test]
    fn enabled_stages_always_include_review_text() {
        let mut stages = PipelineStagesConfig::default();
        stages.timeline_summary.enabled = false;
        stages.match_summary.enabled = false;
        stages.image_description.enabled = false;
        stages.image_generation.enabled = false;
        assert_eq!(stages.enabled_stages(true), vec![StageKind::ReviewText]);
    }

    #[test]
    fn image_generation_counts_only_with_client() {
        let stages = PipelineStagesConfig::default();
        assert_eq!(stages.enabled_stages(true).len(), 5);
        assert_eq!(
            stages.enabled_stages(false),
            vec![
                StageKind::TimelineSummary,
                StageKind::MatchSummary,
                StageKind::ReviewText,
                StageKind::ImageDescription,
            ]
        );
    }

    #[test]
    fn tab_overrides_global() {
        let mut quiet = PipelineStagesConfig::default();
        quiet.image_generation.enabled = false;
        let global = GlobalConfig {
            default_personality: Some("coach".into()),
            stages: Some(quiet.clone()),
            ..GlobalConfig::default()
        };

        let (p, s) = global.resolve(&TabConfig::default());
        assert_eq!(p.as_deref(), Some("coach"));
        assert_eq!(s, quiet);

        let tab = TabConfig {
            personality: Some("hype".into()),
            stages: Some(PipelineStagesConfig::default()),
        };
        let (p, s) = global.resolve(&tab);
        assert_eq!(p.as_deref(), Some("hype"));
        assert!(s.image_generation.enabled);

        let (p, s) = GlobalConfig::default().resolve(&TabConfig::default());
        assert!(p.is_none());
        assert_eq!(s, PipelineStagesConfig::default());
    }

    #[test]
    fn review_config_reads_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("GEMINI_API_KEY", "  "),
            ("SCOUT_REVIEW_MAX_HISTORY", "7"),
            ("SCOUT_REVIEW_DB", "/tmp/x.sqlite"),
        ]);
        let cfg = ReviewConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-test"));
        assert!(cfg.gemini_api_key.is_none());
        assert_eq!(cfg.max_history_entries, 7);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(cfg.openai_base_url, DEFAULT_OPENAI_BASE_URL);
    }

    #[test]
    fn review_config_rejects_bad_numbers() {
        for bad in ["lots", "0", "-3"] {
            let err = ReviewConfig::from_lookup(|k| {
                (k == "SCOUT_REVIEW_MAX_HISTORY").then(|| bad.to_string())
            })
            .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEnv { .. }), "{bad}");
        }
    }

    #[test]
    fn default_stage_models() {
        let stages = PipelineStagesConfig::default();
        for summary in [&stages.timeline_summary, &stages.match_summary, &stages.image_description] {
            assert_eq!(summary.model.max_tokens(), 2_000);
            assert_eq!(summary.model.temperature(), Some(0.3));
        }
        assert_eq!(stages.review_text.model.temperature(), Some(0.9));
    }
}
