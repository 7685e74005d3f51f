use super::*;
use axum::body::to_bytes;
use axum::http::Request;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_llm(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [1.0, 0.0, 0.0], "index": 0 }]
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Mock answer." } }]
        })))
        .mount(server)
        .await;
}

async fn test_router(server: &MockServer, dir: &TempDir) -> Router {
    let mut config = Config::default();
    config.base_dir = dir.path().to_path_buf();
    config.llm.base_url = server.uri();
    config.llm.api_key = "sk-test".to_string();
    config.confluence.base_url = server.uri();
    config.confluence.token = "dGVzdA==".to_string();

    router(AppState::from_config(&config).await.unwrap())
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn chat_returns_answer_and_generated_chat_id() {
    let server = MockServer::start().await;
    mock_llm(&server).await;
    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app
        .oneshot(get_request("/genAI/chat?prompt=hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let chat_id = response
        .headers()
        .get("chat-id")
        .expect("generated conversation id header")
        .to_str()
        .unwrap()
        .to_string();
    assert!(Uuid::parse_str(&chat_id).is_ok());

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "Mock answer.");
}

#[tokio::test]
async fn chat_with_existing_id_sets_no_header() {
    let server = MockServer::start().await;
    mock_llm(&server).await;
    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app
        .oneshot(get_request("/genAI/chat?prompt=hello&chatId=conv-1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("chat-id").is_none());
}

#[tokio::test]
async fn chat_without_prompt_is_a_bad_request() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app.oneshot(get_request("/genAI/chat")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_reflects_a_chat_exchange() {
    let server = MockServer::start().await;
    mock_llm(&server).await;
    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app
        .clone()
        .oneshot(get_request("/genAI/chat?prompt=hello&chatId=conv-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get_request("/genAI/chat-history?chatId=conv-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let history: Value = serde_json::from_slice(&body).unwrap();
    let messages = history.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn history_for_unknown_conversation_is_empty() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app
        .oneshot(get_request("/genAI/chat-history?chatId=nope"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let history: Value = serde_json::from_slice(&body).unwrap();
    assert!(history.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn streaming_chat_returns_concatenated_deltas() {
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Str\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"eam.\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [1.0, 0.0, 0.0], "index": 0 }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app
        .oneshot(get_request("/genAI/streaming-chat?prompt=go"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("chat-id").is_some());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, "Stream.");
}

#[tokio::test]
async fn embed_single_document_reports_chunks() {
    let server = MockServer::start().await;
    mock_llm(&server).await;
    Mock::given(method("GET"))
        .and(path("/wiki/rest/api/content/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "42",
            "title": "Guide",
            "body": { "view": { "value": "<p>Run the installer first.</p>" } },
            "_links": { "webui": "/spaces/DOCS/pages/42/Guide" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app
        .oneshot(get_request("/embed/confluence?documentId=42"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["documents"], 1);
    assert!(report["chunks"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn embed_whole_space_pages_through_listing() {
    let server = MockServer::start().await;
    mock_llm(&server).await;
    Mock::given(method("GET"))
        .and(path("/wiki/rest/api/content"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "id": "1",
                "title": "Only page",
                "body": { "view": { "value": "<p>Some content here.</p>" } },
                "_links": { "webui": "/spaces/DOCS/pages/1/Only+page" }
            }],
            "start": 0,
            "limit": 25,
            "size": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let app = test_router(&server, &dir).await;

    let response = app
        .oneshot(get_request("/embed/confluence"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["documents"], 1);
    assert_eq!(report["failures"], 0);
}
