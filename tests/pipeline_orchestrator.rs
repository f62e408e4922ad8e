mod common;

use std::sync::{Arc, Mutex};

use common::{input, raw_timeline, MockChat, MockImage};
use scout_review::config::{PipelineStagesConfig, TimelineChunking};
use scout_review::gateway::{ChatProvider, ImageProvider, ModelInvoker};
use scout_review::pipeline::{
    PipelineError, PipelineOrchestrator, ProgressCallback, ProgressEvent, ProgressStep,
};
use scout_review::timeline;

fn orchestrator(chat: Arc<MockChat>, image: Option<Arc<MockImage>>) -> PipelineOrchestrator {
    let image = image.map(|i| i as Arc<dyn ImageProvider>);
    PipelineOrchestrator::new(ModelInvoker::new(chat as Arc<dyn ChatProvider>, image)).with_seed(7)
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: ProgressCallback = Arc::new(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone()));
    (callback, events)
}

fn one_frame_per_chunk() -> PipelineStagesConfig {
    PipelineStagesConfig {
        timeline_chunking: TimelineChunking {
            max_tokens_per_call: 1,
            max_tokens_per_chunk: 1,
        },
        ..PipelineStagesConfig::default()
    }
}

#[tokio::test]
async fn chunked_timeline_is_aggregated_in_order() {
    let chat = Arc::new(MockChat::default());
    let mut input = input(one_frame_per_chunk());
    input.raw_timeline = Some(raw_timeline(3));

    let result = orchestrator(chat.clone(), None).run(&input, None).await.unwrap();
    assert!(!result.is_error());

    let traces = result.metadata.traces.as_ref().unwrap();
    assert!(traces.timeline_summary.is_none());
    let chunks = traces.timeline_chunks.as_ref().unwrap();
    assert_eq!(chunks.len(), 3);
    let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(chunks[1].trace.response.text, "chunk@01:00");

    let segments: Vec<(usize, String, String)> = chunks
        .iter()
        .map(|c| (c.chunk_index, c.time_range.clone(), c.trace.response.text.clone()))
        .collect();
    let aggregate = traces.timeline_aggregate.as_ref().unwrap();
    assert!(aggregate
        .request
        .user_prompt
        .contains(&timeline::aggregate_input(&segments)));

    let intermediate = result.metadata.intermediate.as_ref().unwrap();
    assert_eq!(intermediate.timeline_summary_text.as_deref(), Some("aggregate summary"));
    assert_eq!(
        intermediate.timeline_chunk_summaries.as_deref(),
        Some(&["chunk@00:00".to_string(), "chunk@01:00".into(), "chunk@02:00".into()][..])
    );

    // The review sees the aggregate, not the individual chunks.
    assert!(traces.review_text.request.user_prompt.contains("aggregate summary"));
    assert!(!traces.review_text.request.user_prompt.contains("chunk@"));
}

#[tokio::test]
async fn short_timeline_uses_single_call() {
    let chat = Arc::new(MockChat::default());
    let result = orchestrator(chat, None)
        .run(&input(PipelineStagesConfig::default()), None)
        .await
        .unwrap();

    let traces = result.metadata.traces.unwrap();
    assert_eq!(traces.timeline_summary.unwrap().response.text, "timeline summary");
    assert!(traces.timeline_chunks.is_none());
    assert!(traces.timeline_aggregate.is_none());
}

#[tokio::test]
async fn progress_counts_only_runnable_stages() {
    let chat = Arc::new(MockChat::default());
    let (callback, events) = recorder();
    let mut input = input(one_frame_per_chunk());
    input.raw_timeline = Some(raw_timeline(3));

    // Image generation is enabled but there is no image client.
    let result = orchestrator(chat, None).run(&input, Some(&callback)).await.unwrap();
    assert!(result.image.is_none());
    assert!(result.error.is_none());
    assert!(!result.metadata.image_generated);

    let events = events.lock().unwrap();
    assert!(events.iter().all(|e| e.total_stages == Some(4)));
    let counters: Vec<usize> = events.iter().map(|e| e.current_stage.unwrap()).collect();
    assert!(counters.windows(2).all(|w| w[0] <= w[1]), "{counters:?}");
    assert!(counters.iter().all(|c| *c >= 1 && *c <= 4));

    let chunk_events: Vec<&ProgressEvent> = events
        .iter()
        .filter(|e| e.step == ProgressStep::TimelineChunk)
        .collect();
    assert_eq!(chunk_events.len(), 3);
    assert!(chunk_events.iter().all(|e| e.chunk_total == Some(3)));
    assert!(events.iter().all(|e| e.step != ProgressStep::ImageGeneration));

    let last = events.last().unwrap();
    assert_eq!(last.step, ProgressStep::Complete);
    assert_eq!(last.current_stage, Some(4));
}

#[tokio::test]
async fn image_prompt_prefers_description() {
    let chat = Arc::new(MockChat::default());
    let image = Arc::new(MockImage::default());
    let result = orchestrator(chat, Some(image.clone()))
        .run(&input(PipelineStagesConfig::default()), None)
        .await
        .unwrap();

    assert_eq!(image.prompts.lock().unwrap().as_slice(), ["a fox mid-dash under moonlight"]);
    assert_eq!(result.image.as_deref(), Some("AQIDBA=="));
    assert!(result.metadata.image_generated);
    let trace = result.metadata.traces.unwrap().image_generation.unwrap();
    assert!(trace.image_generated);
    assert_eq!(trace.image_size_bytes, Some(4));
}

#[tokio::test]
async fn image_prompt_falls_back_to_review_text() {
    let chat = Arc::new(MockChat::default());
    let image = Arc::new(MockImage::default());
    let mut stages = PipelineStagesConfig::default();
    stages.image_description = stages.image_description.disabled();

    orchestrator(chat, Some(image.clone()))
        .run(&input(stages), None)
        .await
        .unwrap();

    assert_eq!(image.prompts.lock().unwrap().as_slice(), ["What a game."]);
}

#[tokio::test]
async fn image_failure_keeps_review() {
    let chat = Arc::new(MockChat::default());
    let image = Arc::new(MockImage {
        fail: true,
        ..MockImage::default()
    });
    let result = orchestrator(chat, Some(image))
        .run(&input(PipelineStagesConfig::default()), None)
        .await
        .unwrap();

    assert_eq!(result.text, "What a game.");
    assert!(result.image.is_none());
    assert!(result.error.is_none());
    assert!(result.metadata.traces.unwrap().image_generation.is_none());
}

#[tokio::test]
async fn optional_stage_failure_degrades() {
    let chat = Arc::new(MockChat {
        fail_match: true,
        ..MockChat::default()
    });
    let result = orchestrator(chat, None)
        .run(&input(PipelineStagesConfig::default()), None)
        .await
        .unwrap();

    assert!(!result.is_error());
    assert_eq!(result.text, "What a game.");
    let traces = result.metadata.traces.as_ref().unwrap();
    assert!(traces.match_summary.is_none());
    assert!(traces.timeline_summary.is_some());
    assert!(!traces.review_text.request.user_prompt.contains("<match_summary>"));
}

#[tokio::test]
async fn review_failure_is_reported_in_result() {
    let chat = Arc::new(MockChat {
        fail_review: true,
        ..MockChat::default()
    });
    let image = Arc::new(MockImage::default());
    let result = orchestrator(chat, Some(image.clone()))
        .run(&input(PipelineStagesConfig::default()), None)
        .await
        .unwrap();

    assert!(result.is_error());
    assert_eq!(result.text, "");
    assert!(result.error.unwrap().contains("review boom"));
    assert!(result.image.is_none());
    // Nothing downstream of the review ran.
    assert!(image.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_raw_data_fails_validation_before_any_call() {
    let chat = Arc::new(MockChat::default());
    let mut input = input(PipelineStagesConfig::default());
    input.raw_timeline = None;

    let err = orchestrator(chat.clone(), None).run(&input, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(chat.calls.lock().unwrap().is_empty());

    // With both summary stages off, raw data is not needed.
    let mut stages = PipelineStagesConfig::default();
    stages.timeline_summary = stages.timeline_summary.disabled();
    stages.match_summary = stages.match_summary.disabled();
    input.stages = stages;
    input.raw_match = None;
    let result = orchestrator(chat.clone(), None).run(&input, None).await.unwrap();
    assert_eq!(result.text, "What a game.");
}

#[tokio::test]
async fn each_summary_stage_requires_only_its_own_raw_input() {
    let chat = Arc::new(MockChat::default());

    // Timeline summary off: no raw timeline needed, match summary still runs.
    let mut stages = PipelineStagesConfig::default();
    stages.timeline_summary = stages.timeline_summary.disabled();
    let mut input = input(stages);
    input.raw_timeline = None;
    let result = orchestrator(chat.clone(), None).run(&input, None).await.unwrap();
    let traces = result.metadata.traces.unwrap();
    assert!(traces.timeline_summary.is_none());
    assert_eq!(traces.match_summary.unwrap().response.text, "match summary");

    // Match summary off: no raw match needed, timeline summary still runs.
    let mut stages = PipelineStagesConfig::default();
    stages.match_summary = stages.match_summary.disabled();
    let mut input = common::input(stages);
    input.raw_match = None;
    let result = orchestrator(chat.clone(), None).run(&input, None).await.unwrap();
    let traces = result.metadata.traces.unwrap();
    assert!(traces.match_summary.is_none());
    assert_eq!(traces.timeline_summary.unwrap().response.text, "timeline summary");

    // Match summary on without a raw match is still rejected.
    let mut input = common::input(PipelineStagesConfig::default());
    input.raw_match = None;
    let err = orchestrator(chat, None).run(&input, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(ref m) if m.contains("match")));
}

#[tokio::test]
async fn behavior_and_personality_reach_the_review_prompt() {
    let chat = Arc::new(MockChat::default());
    let result = orchestrator(chat, None)
        .run(&input(PipelineStagesConfig::default()), None)
        .await
        .unwrap();

    let review = &result.metadata.traces.unwrap().review_text;
    assert!(review.request.system_prompt.as_deref().unwrap().contains("You are Coach"));
    assert!(review.request.user_prompt.contains("Be blunt and specific."));
    assert!(review.request.user_prompt.contains("Mention vision control."));
    assert!(review.request.user_prompt.contains("Caps on Ahri (MIDDLE)"));
    assert_eq!(result.metadata.reviewer_name.as_deref(), Some("Coach"));

    // Overriding the system prompt keeps the personality in the user prompt.
    let mut stages = PipelineStagesConfig::default();
    stages.review_text = stages.review_text.with_system_prompt("Keep it under 100 words.");
    let result = orchestrator(Arc::new(MockChat::default()), None)
        .run(&input(stages), None)
        .await
        .unwrap();
    let review = &result.metadata.traces.unwrap().review_text;
    assert_eq!(review.request.system_prompt.as_deref(), Some("Keep it under 100 words."));
    assert!(review.request.user_prompt.contains("Be blunt and specific."));
}
