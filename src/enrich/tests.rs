use super::*;
use crate::config::Config;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn enricher_against(server: &MockServer, keyword_count: usize) -> KeywordEnricher {
    let mut config = Config::default();
    config.llm.base_url = server.uri();
    config.llm.api_key = "sk-test".to_string();
    let llm = LlmClient::new(&config).unwrap();
    KeywordEnricher::new(llm, keyword_count)
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}

#[tokio::test]
async fn splits_comma_separated_keywords() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("rust, async runtime ,  tokio,")),
        )
        .mount(&server)
        .await;

    let enricher = enricher_against(&server, 10).await;
    let keywords = enricher.extract_keywords("some chunk text").await;

    assert_eq!(keywords, vec!["rust", "async runtime", "tokio"]);
}

#[tokio::test]
async fn keyword_count_is_enforced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("a, b, c, d, e")))
        .mount(&server)
        .await;

    let enricher = enricher_against(&server, 3).await;
    let keywords = enricher.extract_keywords("some chunk text").await;

    assert_eq!(keywords, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn llm_failure_yields_no_keywords() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let enricher = enricher_against(&server, 10).await;
    assert!(enricher.extract_keywords("some chunk text").await.is_empty());
}

#[tokio::test]
async fn empty_completion_yields_no_keywords() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("")))
        .mount(&server)
        .await;

    let enricher = enricher_against(&server, 10).await;
    assert!(enricher.extract_keywords("some chunk text").await.is_empty());
}

#[test]
fn quoted_keywords_are_unwrapped() {
    assert_eq!(
        parse_keywords("\"vector store\", \"lancedb\"", 10),
        vec!["vector store", "lancedb"]
    );
}
