use super::*;
use crate::config::Config;
use crate::database::lancedb::{ChunkMetadata, EmbeddingRecord};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}

async fn mock_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [1.0, 0.0, 0.0], "index": 0 }]
        })))
        .mount(server)
        .await;
}

async fn service_against(server: &MockServer, dir: &TempDir) -> ChatService {
    let mut config = Config::default();
    config.llm.base_url = server.uri();
    config.llm.api_key = "sk-test".to_string();

    let llm = LlmClient::new(&config).unwrap();
    let memory = Database::new(dir.path().join("memory.db")).await.unwrap();
    let store = VectorStore::new(&dir.path().join("vectors")).await.unwrap();

    ChatService::new(llm, memory, Arc::new(Mutex::new(store)), config.chat)
}

fn chunk_record(doc_title: &str, content: &str, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        id: format!("{doc_title}-0"),
        vector,
        metadata: ChunkMetadata {
            doc_id: "1".to_string(),
            doc_title: doc_title.to_string(),
            link: "https://example.atlassian.net/wiki/spaces/DOCS/pages/1".to_string(),
            heading_path: None,
            keywords: Vec::new(),
            content: content.to_string(),
            token_count: 5,
            chunk_index: 0,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        },
    }
}

#[tokio::test]
async fn answers_and_records_the_exchange() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("The answer.")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = service_against(&server, &dir).await;

    let answer = service.respond("conv-1", "What is the setup?").await.unwrap();
    assert_eq!(answer.as_deref(), Some("The answer."));

    let history = service.history("conv-1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[0].content, "What is the setup?");
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[1].content, "The answer.");
}

#[tokio::test]
async fn retrieved_context_is_injected_into_the_prompt() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    // Only a prompt carrying retrieved context matches this mock
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Source: Setup Guide"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("From context.")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = service_against(&server, &dir).await;
    service
        .store
        .lock()
        .await
        .store_embeddings(vec![chunk_record(
            "Setup Guide",
            "Run the installer first.",
            vec![1.0, 0.0, 0.0],
        )])
        .await
        .unwrap();

    let answer = service.respond("conv-1", "How do I start?").await.unwrap();
    assert_eq!(answer.as_deref(), Some("From context."));
}

#[tokio::test]
async fn weak_matches_stay_out_of_the_prompt() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Source:"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("With context.")))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Without context.")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = service_against(&server, &dir).await;
    // Opposite direction, similarity well below the 0.5 threshold
    service
        .store
        .lock()
        .await
        .store_embeddings(vec![chunk_record(
            "Unrelated",
            "Completely unrelated text.",
            vec![-1.0, 0.0, 0.0],
        )])
        .await
        .unwrap();

    let answer = service.respond("conv-1", "How do I start?").await.unwrap();
    assert_eq!(answer.as_deref(), Some("Without context."));
}

#[tokio::test]
async fn no_usable_answer_leaves_memory_untouched() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = service_against(&server, &dir).await;

    let answer = service.respond("conv-1", "Anything?").await.unwrap();
    assert!(answer.is_none());
    assert!(service.history("conv-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn follow_up_questions_are_rewritten_before_retrieval() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Latest question"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("standalone install query")),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Answer.")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = service_against(&server, &dir).await;
    service
        .memory
        .append_message(NewMessage::user("conv-1", "Tell me about the installer"))
        .await
        .unwrap();
    service
        .memory
        .append_message(NewMessage::assistant("conv-1", "It installs things."))
        .await
        .unwrap();

    let answer = service.respond("conv-1", "How do I run it?").await.unwrap();
    assert_eq!(answer.as_deref(), Some("Answer."));
}

#[tokio::test]
async fn streaming_answers_are_recorded_after_completion() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Str\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"eamed.\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let service = service_against(&server, &dir).await;

    let mut stream = service
        .respond_streaming("conv-1", "Stream it")
        .await
        .unwrap();
    let mut collected = String::new();
    while let Some(delta) = stream.next().await {
        collected.push_str(&delta.unwrap());
    }
    assert_eq!(collected, "Streamed.");

    // Recording happens in a background task after the stream ends
    let mut history = Vec::new();
    for _ in 0..50 {
        history = service.history("conv-1").await.unwrap();
        if history.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Streamed.");
}

#[tokio::test]
async fn history_respects_the_memory_window() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let service = service_against(&server, &dir).await;

    for i in 0..25 {
        service
            .memory
            .append_message(NewMessage::user("conv-1", format!("message {i}")))
            .await
            .unwrap();
    }

    let history = service.history("conv-1").await.unwrap();
    assert_eq!(history.len(), 20);
    assert_eq!(history[0].content, "message 5");
}
