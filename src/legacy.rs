//! Adapter from the old flat metadata shape to the structured one.
//!
//! Only used at the storage boundary: importing the legacy history file and
//! reading stored records whose metadata predates per-stage traces.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{ModelConfig, DEFAULT_TEXT_MODEL};
use crate::history::{ConfigSnapshot, HistoryEntry, HistoryStatus, Rating};
use crate::pipeline::{GenerationMetadata, GenerationResult};
use crate::trace::{PipelineIntermediateResults, PipelineTraces, StageTrace, TraceRequest, TraceResponse};

/// `max_tokens` was never recorded in the flat shape.
const LEGACY_MAX_TOKENS: u32 = 1_500;

const LEGACY_KEYS: &[&str] = &[
    "textDurationMs",
    "textTokensPrompt",
    "textTokensCompletion",
    "imageGenerated",
    "selectedPersonality",
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGenerationMetadata {
    #[serde(default)]
    pub text_tokens_prompt: Option<u32>,
    #[serde(default)]
    pub text_tokens_completion: Option<u32>,
    #[serde(default)]
    pub text_duration_ms: Option<u64>,
    #[serde(default)]
    pub image_duration_ms: Option<u64>,
    #[serde(default)]
    pub image_generated: Option<bool>,
    #[serde(default)]
    pub selected_personality: Option<String>,
    #[serde(default)]
    pub reviewer_name: Option<String>,
    #[serde(default)]
    pub image_description: Option<String>,
    #[serde(default)]
    pub match_summary: Option<String>,
    #[serde(default)]
    pub timeline_summary: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Whether a metadata object uses the flat camelCase shape.
pub fn is_legacy_metadata(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    !obj.contains_key("text_duration_ms") && LEGACY_KEYS.iter().any(|k| obj.contains_key(*k))
}

/// Convert flat metadata. A review trace is synthesized from the flat token
/// counts so cost and display code see one shape.
pub fn upgrade_metadata(legacy: LegacyGenerationMetadata, review_text: &str) -> GenerationMetadata {
    let model = legacy
        .model
        .as_deref()
        .and_then(|m| ModelConfig::new(m, LEGACY_MAX_TOKENS).ok())
        .or_else(|| ModelConfig::new(DEFAULT_TEXT_MODEL, LEGACY_MAX_TOKENS).ok());

    let traces = model.map(|model| {
        PipelineTraces::new(StageTrace {
            request: TraceRequest {
                system_prompt: None,
                user_prompt: String::new(),
            },
            response: TraceResponse {
                text: review_text.to_string(),
            },
            model,
            duration_ms: legacy.text_duration_ms.unwrap_or(0),
            tokens_prompt: legacy.text_tokens_prompt,
            tokens_completion: legacy.text_tokens_completion,
        })
    });

    let intermediate = PipelineIntermediateResults {
        timeline_summary_text: legacy.timeline_summary,
        match_summary_text: legacy.match_summary,
        image_description_text: legacy.image_description,
        ..PipelineIntermediateResults::default()
    };

    GenerationMetadata {
        text_duration_ms: legacy.text_duration_ms.unwrap_or(0),
        image_duration_ms: legacy.image_duration_ms,
        image_generated: legacy.image_generated.unwrap_or(false),
        personality_id: legacy.selected_personality,
        reviewer_name: legacy.reviewer_name,
        traces,
        intermediate: Some(intermediate),
        cost: None,
    }
}

/// Rewrite `result.metadata` of a stored entry in place if it is flat.
/// Anything unparseable is left for the caller's validation to reject.
pub fn upgrade_stored_metadata(entry: &mut Value) {
    let review_text = entry
        .pointer("/result/text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(metadata) = entry.pointer_mut("/result/metadata") else {
        return;
    };
    if !is_legacy_metadata(metadata) {
        return;
    }
    let Ok(legacy) = serde_json::from_value::<LegacyGenerationMetadata>(metadata.clone()) else {
        return;
    };
    if let Ok(upgraded) = serde_json::to_value(upgrade_metadata(legacy, &review_text)) {
        *metadata = upgraded;
    }
}

// =============================================================================
// Legacy history file
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyTimestamp {
    Millis(i64),
    Text(DateTime<Utc>),
}

impl LegacyTimestamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            Self::Text(dt) => Some(*dt),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyResult {
    #[serde(default)]
    text: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    metadata: LegacyGenerationMetadata,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySnapshot {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    personality: Option<String>,
    #[serde(default)]
    image_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyHistoryEntry {
    id: String,
    timestamp: LegacyTimestamp,
    result: LegacyResult,
    #[serde(default)]
    config_snapshot: LegacySnapshot,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    rating: Option<u8>,
    #[serde(default)]
    notes: Option<String>,
}

fn upgrade_entry(legacy: LegacyHistoryEntry) -> Option<HistoryEntry> {
    let status = match legacy.status.as_deref() {
        Some("pending") => return None,
        Some("error") => HistoryStatus::Error,
        Some("complete") => HistoryStatus::Complete,
        _ if legacy.result.error.is_some() => HistoryStatus::Error,
        _ => HistoryStatus::Complete,
    };
    let metadata = upgrade_metadata(legacy.result.metadata, &legacy.result.text);
    Some(HistoryEntry {
        id: legacy.id,
        timestamp: legacy.timestamp.to_utc()?,
        result: GenerationResult {
            text: legacy.result.text,
            image: legacy.result.image,
            metadata,
            error: legacy.result.error,
        },
        config_snapshot: ConfigSnapshot {
            model: legacy.config_snapshot.model,
            personality: legacy.config_snapshot.personality,
            image_description: legacy.config_snapshot.image_description,
        },
        status,
        rating: legacy.rating.and_then(|r| Rating::try_from(r).ok()),
        notes: legacy.notes,
    })
}

/// Parse a legacy history file (JSON array). Entries that fail to parse, or
/// were still pending, are skipped.
pub fn parse_legacy_history(raw: &str) -> Vec<HistoryEntry> {
    let items: Vec<Value> = match serde_json::from_str(raw) {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(error = %e, "legacy history file is not a JSON array");
            return Vec::new();
        }
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<LegacyHistoryEntry>(item) {
            Ok(entry) => upgrade_entry(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed legacy history entry");
                None
            }
        })
        .collect()
}
