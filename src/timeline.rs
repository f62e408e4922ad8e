//! Timeline compaction and token-budgeted chunking.
//!
//! A match timeline is compacted to one line per frame (events only,
//! participant snapshots dropped). Lines are then packed greedily into
//! contiguous chunks so each summary call stays under its token budget.
//!
//! # Algorithm
//!
//! 1. **Compaction**: each `info.frames[i]` becomes `[MM:SS] <events json>`
//! 2. **Fits check**: if the whole text is within `max_tokens_per_call`, no split
//! 3. **Greedy packing**: append frames while the chunk stays within `max_tokens_per_chunk`
//! 4. **Oversize frames**: a single frame larger than the chunk budget is its own chunk

use once_cell::sync::Lazy;
use serde_json::Value;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::config::TimelineChunking;

/// Loaded once; `None` falls back to a chars/4 estimate.
static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "cl100k_base tokenizer unavailable; estimating tokens");
        None
    }
});

#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("timeline has no info.frames array")]
    MissingFrames,
    #[error("timeline frame {index} has no numeric timestamp")]
    MissingTimestamp { index: usize },
}

/// Count tokens in text using the cl100k_base tokenizer.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// One compacted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLine {
    pub timestamp_ms: u64,
    pub text: String,
    pub tokens: usize,
}

/// A contiguous run of frames summarized in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineChunk {
    pub index: usize,
    pub time_range: String,
    pub text: String,
    pub tokens: usize,
}

/// Compacted timeline, ready for either a single call or chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactTimeline {
    frames: Vec<FrameLine>,
}

impl CompactTimeline {
    pub fn from_frames(frames: Vec<FrameLine>) -> Self {
        Self { frames }
    }

    /// Compact a raw match timeline (`info.frames[]`).
    pub fn from_raw(raw: &Value) -> Result<Self, TimelineError> {
        let frames = raw
            .pointer("/info/frames")
            .and_then(Value::as_array)
            .ok_or(TimelineError::MissingFrames)?;

        let mut out = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            let timestamp_ms = frame
                .get("timestamp")
                .and_then(Value::as_u64)
                .ok_or(TimelineError::MissingTimestamp { index })?;
            let events = frame
                .get("events")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let text = format!("[{}] {}", format_clock(timestamp_ms), events);
            let tokens = count_tokens(&text);
            out.push(FrameLine {
                timestamp_ms,
                text,
                tokens,
            });
        }
        Ok(Self { frames: out })
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.frames.iter().map(|f| f.tokens).sum()
    }

    pub fn text(&self) -> String {
        join_lines(&self.frames)
    }

    /// `None` when the timeline fits in a single call.
    pub fn chunks(&self, params: &TimelineChunking) -> Option<Vec<TimelineChunk>> {
        if self.total_tokens() <= params.max_tokens_per_call {
            return None;
        }

        let budget = params.max_tokens_per_chunk.max(1);
        let mut chunks = Vec::new();
        let mut current: Vec<&FrameLine> = Vec::new();
        let mut current_tokens = 0usize;

        for frame in &self.frames {
            if !current.is_empty() && current_tokens + frame.tokens > budget {
                chunks.push(build_chunk(chunks.len(), &current, current_tokens));
                current.clear();
                current_tokens = 0;
            }
            current.push(frame);
            current_tokens += frame.tokens;
        }
        if !current.is_empty() {
            chunks.push(build_chunk(chunks.len(), &current, current_tokens));
        }

        tracing::debug!(
            total_tokens = self.total_tokens(),
            chunks = chunks.len(),
            "timeline split into chunks"
        );
        Some(chunks)
    }
}

fn build_chunk(index: usize, frames: &[&FrameLine], tokens: usize) -> TimelineChunk {
    let start = frames.first().map(|f| f.timestamp_ms).unwrap_or(0);
    let end = frames.last().map(|f| f.timestamp_ms).unwrap_or(start);
    TimelineChunk {
        index,
        time_range: format!("{}-{}", format_clock(start), format_clock(end)),
        text: frames
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        tokens,
    }
}

fn join_lines(frames: &[FrameLine]) -> String {
    frames
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `MM:SS` from milliseconds. Minutes are not wrapped at 60.
pub fn format_clock(ms: u64) -> String {
    let secs = ms / 1_000;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Aggregate-call input: chunk summaries in chunk-index order.
pub fn aggregate_input(chunks: &[(usize, String, String)]) -> String {
    let mut ordered: Vec<&(usize, String, String)> = chunks.iter().collect();
    ordered.sort_by_key(|(index, _, _)| *index);
    ordered
        .into_iter()
        .map(|(index, range, summary)| format!("Segment {} ({range})\n{summary}", index + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(ts: u64, tokens: usize) -> FrameLine {
        FrameLine {
            timestamp_ms: ts,
            text: format!("[{}] f", format_clock(ts)),
            tokens,
        }
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(61_500), "01:01");
        assert_eq!(format_clock(3_725_000), "62:05");
    }

    #[test]
    fn test_small_timeline_is_not_chunked() {
        let tl = CompactTimeline::from_frames(vec![frame(0, 10), frame(60_000, 10)]);
        let params = TimelineChunking {
            max_tokens_per_call: 100,
            max_tokens_per_chunk: 50,
        };
        assert!(tl.chunks(&params).is_none());
    }

    #[test]
    fn test_greedy_packing_is_contiguous() {
        let tl = CompactTimeline::from_frames(vec![
            frame(0, 40),
            frame(60_000, 40),
            frame(120_000, 40),
            frame(180_000, 40),
            frame(240_000, 40),
        ]);
        let params = TimelineChunking {
            max_tokens_per_call: 100,
            max_tokens_per_chunk: 80,
        };
        let chunks = tl.chunks(&params).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].time_range, "00:00-01:00");
        assert_eq!(chunks[1].time_range, "02:00-03:00");
        assert_eq!(chunks[2].time_range, "04:00-04:00");
        assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn test_oversize_frame_gets_own_chunk() {
        let tl = CompactTimeline::from_frames(vec![frame(0, 10), frame(60_000, 500), frame(120_000, 10)]);
        let params = TimelineChunking {
            max_tokens_per_call: 100,
            max_tokens_per_chunk: 50,
        };
        let chunks = tl.chunks(&params).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].tokens, 500);
    }

    #[test]
    fn test_from_raw_compacts_frames() {
        let raw = json!({
            "info": {
                "frames": [
                    {"timestamp": 0, "events": [{"type": "PAUSE_END"}], "participantFrames": {"1": {}}},
                    {"timestamp": 60_000, "events": []}
                ]
            }
        });
        let tl = CompactTimeline::from_raw(&raw).unwrap();
        let text = tl.text();
        assert!(text.starts_with("[00:00] [{\"type\":\"PAUSE_END\"}]"));
        assert!(!text.contains("participantFrames"));
        assert!(tl.total_tokens() > 0);
    }

    #[test]
    fn test_from_raw_requires_frames() {
        assert!(matches!(
            CompactTimeline::from_raw(&json!({"info": {}})),
            Err(TimelineError::MissingFrames)
        ));
    }

    #[test]
    fn test_aggregate_input_orders_by_index() {
        let input = aggregate_input(&[
            (2, "20:00-30:00".into(), "late".into()),
            (0, "00:00-10:00".into(), "early".into()),
            (1, "10:00-20:00".into(), "mid".into()),
        ]);
        let early = input.find("early").unwrap();
        let mid = input.find("mid").unwrap();
        let late = input.find("late").unwrap();
        assert!(early < mid && mid < late);
        assert!(input.starts_with("Segment 1 (00:00-10:00)\nearly"));
    }
}
