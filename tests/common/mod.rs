#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scout_review::config::PipelineStagesConfig;
use scout_review::gateway::{
    ChatProvider, ChatRequest, ChatResponse, FinishReason, ImageProvider, ImageRequest,
    ImageResponse, ProviderError,
};
use scout_review::personality::{ArtStyle, Personality};
use scout_review::pipeline::{CompletedMatch, PipelineInput};
use scout_review::service::ClientFactory;
use serde_json::{json, Value};

/// Scripted text provider. Replies depend on which stage prompt it sees.
#[derive(Default)]
pub struct MockChat {
    pub fail_review: bool,
    pub fail_match: bool,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<ChatRequest>>,
}

impl MockChat {
    pub fn user_prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.messages.last().unwrap().content.clone())
            .collect()
    }
}

fn first_clock(text: &str) -> String {
    text.split('[')
        .filter_map(|s| s.split(']').next())
        .find(|s| s.len() == 5 && s.as_bytes()[2] == b':')
        .unwrap_or("??:??")
        .to_string()
}

#[async_trait]
impl ChatProvider for MockChat {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.lock().unwrap().push(req.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let user = &req.messages.last().unwrap().content;

        let content = if user.contains("<timeline_segment>") {
            format!("chunk@{}", first_clock(user))
        } else if user.contains("Merge them") {
            "aggregate summary".to_string()
        } else if user.contains("<timeline>") {
            "timeline summary".to_string()
        } else if user.contains("<match>") {
            if self.fail_match {
                return Err(ProviderError::provider("mock", "match boom", true));
            }
            "match summary".to_string()
        } else if user.contains("Describe a single illustration") {
            "a fox mid-dash under moonlight".to_string()
        } else {
            if self.fail_review {
                return Err(ProviderError::provider("mock", "review boom", false));
            }
            "What a game.".to_string()
        };

        Ok(ChatResponse {
            content,
            input_tokens: Some(1_000),
            output_tokens: Some(200),
            finish_reason: FinishReason::Stop,
        })
    }
}

#[derive(Default)]
pub struct MockImage {
    pub fail: bool,
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageProvider for MockImage {
    async fn generate_image(&self, req: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        self.prompts.lock().unwrap().push(req.prompt.clone());
        if self.fail {
            return Err(ProviderError::Timeout(req.timeout));
        }
        Ok(ImageResponse {
            image_bytes: Some(vec![1, 2, 3, 4]),
        })
    }
}

pub struct MockFactory {
    pub chat: Arc<MockChat>,
    pub image: Arc<MockImage>,
}

impl ClientFactory for MockFactory {
    fn text_client(&self, _api_key: &str) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        Ok(self.chat.clone())
    }

    fn image_client(&self, _api_key: &str) -> Result<Arc<dyn ImageProvider>, ProviderError> {
        Ok(self.image.clone())
    }
}

pub fn game() -> CompletedMatch {
    CompletedMatch {
        match_id: "EUW1_1".into(),
        player_name: "Caps".into(),
        champion: "Ahri".into(),
        role: Some("MIDDLE".into()),
        win: true,
        kills: 9,
        deaths: 1,
        assists: 4,
        duration_secs: 1_805,
        queue: None,
    }
}

pub fn raw_match() -> Value {
    json!({
        "metadata": {"matchId": "EUW1_1"},
        "info": {"gameDuration": 1_805, "participants": [
            {"puuid": "p", "riotIdGameName": "Caps", "championName": "Ahri", "win": true}
        ]}
    })
}

/// Timeline with one frame per minute.
pub fn raw_timeline(minutes: u64) -> Value {
    let frames: Vec<Value> = (0..minutes)
        .map(|m| {
            json!({
                "timestamp": m * 60_000,
                "events": [{"type": "CHAMPION_KILL", "killerId": 3, "victimId": 7, "timestamp": m * 60_000 + 500}]
            })
        })
        .collect();
    json!({"info": {"frames": frames}})
}

pub fn personality() -> Personality {
    Personality::new("coach", "Coach", "Be blunt and specific.")
        .with_behavior("Mention vision control.", 100.0)
        .with_image_prompt("neon city")
        .with_image_prompt("rainy night")
        .with_image_prompt("stadium lights")
}

pub fn input(stages: PipelineStagesConfig) -> PipelineInput {
    PipelineInput {
        game: game(),
        raw_match: Some(raw_match()),
        raw_timeline: Some(raw_timeline(5)),
        personality: personality(),
        art_styles: vec![ArtStyle {
            id: "ink".into(),
            description: "ink wash".into(),
        }],
        stages,
    }
}
