use std::time::Duration;

use base64::Engine;
use scout_review::config::ModelConfig;
use scout_review::gateway::{
    ChatProvider, ChatRequest, FinishReason, GeminiImageAdapter, ImageProvider, ImageRequest,
    OpenAiAdapter, ProviderError,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(system: Option<&str>) -> ChatRequest {
    let config = ModelConfig::new("gpt-4o-mini", 500)
        .unwrap()
        .with_temperature(0.3)
        .unwrap();
    ChatRequest::from_config(&config, system, "summarize")
}

#[tokio::test]
async fn openai_parses_content_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "max_completion_tokens": 500,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "summarize"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "a close game" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let resp = adapter.chat(&request(Some("be brief"))).await.unwrap();

    assert_eq!(resp.content, "a close game");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, Some(120));
    assert_eq!(resp.output_tokens, Some(30));
}

#[tokio::test]
async fn openai_missing_usage_leaves_tokens_unset() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "ok" }, "finish_reason": "length" }]
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let resp = adapter.chat(&request(None)).await.unwrap();

    assert_eq!(resp.input_tokens, None);
    assert_eq!(resp.output_tokens, None);
    assert_eq!(resp.finish_reason, FinishReason::Length);
}

#[tokio::test]
async fn openai_maps_error_statuses() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": { "message": "overloaded", "code": "server_busy" }
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();

    let first = adapter.chat(&request(None)).await.unwrap_err();
    assert!(matches!(first, ProviderError::RateLimited { .. }));

    let second = adapter.chat(&request(None)).await.unwrap_err();
    assert!(second.is_transient());
    assert!(second.to_string().contains("overloaded"));
    assert_eq!(second.context().and_then(|c| c.http_status), Some(503));
}

#[tokio::test]
async fn openai_surfaces_refusals() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": null, "refusal": "I can't help with that." },
                "finish_reason": "stop"
            }]
        })))
        .mount(&server)
        .await;

    let adapter = OpenAiAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap();
    let err = adapter.chat(&request(None)).await.unwrap_err();
    assert!(matches!(err, ProviderError::Refused { .. }));
}

#[test]
fn empty_keys_are_rejected() {
    assert!(matches!(OpenAiAdapter::new(" "), Err(ProviderError::Config(_))));
    assert!(matches!(GeminiImageAdapter::new(""), Err(ProviderError::Config(_))));
}

#[tokio::test]
async fn gemini_decodes_inline_image() {
    let server = MockServer::start().await;
    let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash-image:generateContent"))
        .and(query_param("key", "g-test"))
        .and(body_partial_json(json!({
            "contents": [{ "parts": [{ "text": "a fox in the jungle" }] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": encoded } }
                ]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = GeminiImageAdapter::with_base_url("g-test", server.uri()).unwrap();
    let resp = adapter
        .generate_image(&ImageRequest {
            model: "gemini-2.5-flash-image".into(),
            prompt: "a fox in the jungle".into(),
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();

    assert!(resp.generated());
    assert_eq!(resp.image_bytes, Some(png));
}

#[tokio::test]
async fn gemini_without_image_part_is_not_generated() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "no image today" }] } }]
        })))
        .mount(&server)
        .await;

    let adapter = GeminiImageAdapter::with_base_url("g-test", server.uri()).unwrap();
    let resp = adapter
        .generate_image(&ImageRequest {
            model: "gemini-2.5-flash-image".into(),
            prompt: "p".into(),
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();

    assert!(!resp.generated());
}

#[tokio::test]
async fn gemini_honors_stage_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "candidates": [] }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let adapter = GeminiImageAdapter::with_base_url("g-test", server.uri()).unwrap();
    let err = adapter
        .generate_image(&ImageRequest {
            model: "gemini-2.5-flash-image".into(),
            prompt: "p".into(),
            timeout: Duration::from_millis(50),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Timeout(_)));
}
