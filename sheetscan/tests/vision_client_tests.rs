mod common;

use serde_json::json;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::{init_test_logger, png_bytes, Workspace};
use sheetscan::config::VisionConfig;
use sheetscan::pipeline::{Pipeline, ProjectOutcome};
use sheetscan::vision::{BatchImage, OpenAiVisionClient, VisionExtractor};
use sheetscan::SheetscanError;

fn vision_config(base_url: String, max_retries: u32) -> VisionConfig {
    VisionConfig {
        model: "openai/gpt-4o".to_string(),
        api_key: Some("test-key".to_string()),
        base_url: Some(base_url),
        timeout_secs: 5,
        max_retries,
        max_tokens: 1024,
        max_image_dimension: 0,
    }
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o",
        "choices": [
            {
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": content
                },
                "finish_reason": "stop"
            }
        ]
    })
}

fn one_image() -> Vec<BatchImage> {
    vec![BatchImage {
        label: "page_001/region_01.png".to_string(),
        mime_type: "image/png".to_string(),
        bytes: png_bytes(),
    }]
}

#[tokio::test]
async fn test_successful_extraction_returns_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{\"images\": []}")))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiVisionClient::new(&vision_config(format!("{}/v1", server.uri()), 0)).unwrap();
    let reply = client.extract_batch(&one_image(), "extract").await.unwrap();

    assert_eq!(reply, "{\"images\": []}");
}

#[tokio::test]
async fn test_request_carries_instruction_and_data_url() {
    let server = MockServer::start().await;
    let captured = Arc::new(std::sync::Mutex::new(None::<serde_json::Value>));
    let captured_for_mock = Arc::clone(&captured);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |request: &Request| {
            *captured_for_mock.lock().unwrap() = request.body_json().ok();
            ResponseTemplate::new(200).set_body_json(completion_body("ok"))
        })
        .mount(&server)
        .await;

    let client = OpenAiVisionClient::new(&vision_config(format!("{}/v1", server.uri()), 0)).unwrap();
    client.extract_batch(&one_image(), "Extract the fields").await.unwrap();

    let body = captured.lock().unwrap().clone().expect("request body");
    let content = body["messages"][0]["content"].as_array().unwrap();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(content[0]["text"], "Extract the fields");
    assert_eq!(content[1]["text"], "Image 1: page_001/region_01.png");
    assert!(content[2]["image_url"]["url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_retry_on_server_error() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_for_mock = Arc::clone(&attempts);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |_request: &Request| {
            if attempts_for_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(500).set_body_string("upstream temporary failure")
            } else {
                ResponseTemplate::new(200).set_body_json(completion_body("Recovered response"))
            }
        })
        .mount(&server)
        .await;

    let client = OpenAiVisionClient::new(&vision_config(format!("{}/v1", server.uri()), 2)).unwrap();
    let result = client.extract_batch(&one_image(), "extract").await;

    match result {
        Ok(value) => assert_eq!(value, "Recovered response"),
        Err(error) => panic!("Expected retry to succeed, got: {error}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_server_error_after_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = OpenAiVisionClient::new(&vision_config(format!("{}/v1", server.uri()), 1)).unwrap();
    let error = client.extract_batch(&one_image(), "extract").await.unwrap_err();

    assert!(matches!(error, SheetscanError::Vision(_)));
    assert!(error.to_string().contains("after 1 retries"));
    assert!(error.is_batch_recoverable());
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let client = OpenAiVisionClient::new(&vision_config(format!("{}/v1", server.uri()), 3)).unwrap();
    let error = client.extract_batch(&one_image(), "extract").await.unwrap_err();

    match error {
        SheetscanError::VisionAuth(message) => assert!(message.contains("invalid api key")),
        other => panic!("Expected VisionAuth, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limit_surfaces_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let client = OpenAiVisionClient::new(&vision_config(format!("{}/v1", server.uri()), 0)).unwrap();
    let error = client.extract_batch(&one_image(), "extract").await.unwrap_err();

    assert!(matches!(
        error,
        SheetscanError::VisionRateLimit {
            retry_after: Some(7)
        }
    ));
}

#[tokio::test]
async fn test_empty_content_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let client = OpenAiVisionClient::new(&vision_config(format!("{}/v1", server.uri()), 0)).unwrap();
    let error = client.extract_batch(&one_image(), "extract").await.unwrap_err();

    assert!(matches!(error, SheetscanError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_pipeline_against_mock_service_leaves_failed_batch_pending() {
    init_test_logger();
    let ws = Workspace::new();
    ws.add_project("tower", 1, 2);

    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_for_mock = Arc::clone(&attempts);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |_request: &Request| {
            if attempts_for_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                let reply = json!({"images": [{
                    "image_id": "page_001/region_01.png",
                    "classification": "Plan",
                    "section_callouts": ["1/A-201"],
                    "summary": "Ground floor plan"
                }]});
                ResponseTemplate::new(200).set_body_json(completion_body(&reply.to_string()))
            } else {
                ResponseTemplate::new(200).set_body_json(completion_body("I can't help with that."))
            }
        })
        .mount(&server)
        .await;

    let mut config = ws.config(1);
    config.vision = vision_config(format!("{}/v1", server.uri()), 0);
    let pipeline = Pipeline::from_config(&config).unwrap();
    let report = pipeline.run(None).await.unwrap();

    let ProjectOutcome::Completed(summary) = &report.projects[0] else {
        panic!("Expected the project to complete");
    };
    assert_eq!(summary.newly_processed, 1);
    assert_eq!(summary.failed_pending, 1);

    let state = pipeline.store().load("tower").unwrap();
    let record = state.get("page_001/region_01.png").unwrap();
    assert_eq!(record.summary, "Ground floor plan");
    assert_eq!(record.location, "");
    assert!(!state.contains("page_001/region_02.png"));
}
