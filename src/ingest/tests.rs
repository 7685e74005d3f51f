use super::*;
use crate::config::Config;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

struct TestSource {
    documents: Vec<SourceDocument>,
}

#[async_trait]
impl DocumentSource for TestSource {
    async fn fetch_by_id(&self, document_id: &str) -> Result<SourceDocument> {
        self.documents
            .iter()
            .find(|d| d.id == document_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No such document: {document_id}"))
    }

    async fn fetch_batch(&self, start: u32, limit: u32) -> Result<SourceBatch> {
        let start = start as usize;
        let end = (start + limit as usize).min(self.documents.len());
        let documents: Vec<_> = if start < self.documents.len() {
            self.documents[start..end].to_vec()
        } else {
            Vec::new()
        };
        let size = documents.len() as u32;
        Ok(SourceBatch { documents, size })
    }
}

fn doc(id: &str, title: &str, html: &str) -> SourceDocument {
    SourceDocument {
        id: id.to_string(),
        title: title.to_string(),
        html: html.to_string(),
        link: format!("https://example.atlassian.net/wiki/spaces/DOCS/pages/{id}"),
    }
}

/// Embeddings endpoint that returns a fixed 3-wide vector per input,
/// failing for any input that contains "poison"
async fn mock_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(|request: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let inputs = body["input"].as_array().unwrap();
            if inputs
                .iter()
                .any(|t| t.as_str().unwrap().contains("poison"))
            {
                return ResponseTemplate::new(500);
            }
            let data: Vec<_> = inputs
                .iter()
                .map(|_| json!({ "embedding": [1.0, 0.0, 0.0], "index": 0 }))
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
        })
        .mount(server)
        .await;
}

fn llm_against(server: &MockServer) -> LlmClient {
    let mut config = Config::default();
    config.llm.base_url = server.uri();
    config.llm.api_key = "sk-test".to_string();
    LlmClient::new(&config).unwrap()
}

fn ingestor(source: TestSource, llm: LlmClient, page_size: u32) -> Ingestor<TestSource> {
    Ingestor::new(source, llm, None, ChunkingConfig::default(), page_size)
}

#[tokio::test]
async fn single_document_is_chunked_and_stored() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;

    let dir = TempDir::new().unwrap();
    let mut store = VectorStore::new(&dir.path().join("vectors")).await.unwrap();

    let source = TestSource {
        documents: vec![doc(
            "42",
            "Setup Guide",
            "<h1>Install</h1><p>Run the installer and follow the prompts.</p>",
        )],
    };
    let ingestor = ingestor(source, llm_against(&server), 25);

    let chunks = ingestor.ingest_document(&mut store, "42").await.unwrap();
    assert!(chunks > 0);

    let results = store.search_similar(&[1.0, 0.0, 0.0], 5, 0.0).await.unwrap();
    assert_eq!(results[0].metadata.doc_id, "42");
    assert_eq!(results[0].metadata.doc_title, "Setup Guide");
    assert_eq!(
        results[0].metadata.link,
        "https://example.atlassian.net/wiki/spaces/DOCS/pages/42"
    );
    assert!(results[0].metadata.keywords.is_empty());
}

#[tokio::test]
async fn reingesting_replaces_previous_embeddings() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;

    let dir = TempDir::new().unwrap();
    let mut store = VectorStore::new(&dir.path().join("vectors")).await.unwrap();

    let source = TestSource {
        documents: vec![doc("42", "Guide", "<p>Short body for a single chunk.</p>")],
    };
    let ingestor = ingestor(source, llm_against(&server), 25);

    ingestor.ingest_document(&mut store, "42").await.unwrap();
    let first_count = store.count_embeddings().await.unwrap();

    ingestor.ingest_document(&mut store, "42").await.unwrap();
    assert_eq!(store.count_embeddings().await.unwrap(), first_count);
}

#[tokio::test]
async fn unknown_document_id_is_an_error() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;

    let dir = TempDir::new().unwrap();
    let mut store = VectorStore::new(&dir.path().join("vectors")).await.unwrap();

    let ingestor = ingestor(TestSource { documents: vec![] }, llm_against(&server), 25);
    assert!(ingestor.ingest_document(&mut store, "missing").await.is_err());
}

#[tokio::test]
async fn ingest_all_pages_until_short_batch() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;

    let dir = TempDir::new().unwrap();
    let mut store = VectorStore::new(&dir.path().join("vectors")).await.unwrap();

    let source = TestSource {
        documents: vec![
            doc("1", "One", "<p>First document body.</p>"),
            doc("2", "Two", "<p>Second document body.</p>"),
            doc("3", "Three", "<p>Third document body.</p>"),
        ],
    };
    // page_size 2 forces two listing calls, the second returns 1 < 2
    let ingestor = ingestor(source, llm_against(&server), 2);

    let report = ingestor.ingest_all(&mut store).await.unwrap();
    assert_eq!(report.documents, 3);
    assert_eq!(report.failures, 0);
    assert!(report.chunks >= 3);
    assert_eq!(store.count_embeddings().await.unwrap(), u64::from(report.chunks));
}

#[tokio::test]
async fn ingest_all_skips_failing_documents() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;

    let dir = TempDir::new().unwrap();
    let mut store = VectorStore::new(&dir.path().join("vectors")).await.unwrap();

    let source = TestSource {
        documents: vec![
            doc("1", "Good", "<p>A healthy document body.</p>"),
            doc("2", "Bad", "<p>This one contains poison text.</p>"),
            doc("3", "Also good", "<p>Another healthy document body.</p>"),
        ],
    };
    let ingestor = ingestor(source, llm_against(&server), 25);

    let report = ingestor.ingest_all(&mut store).await.unwrap();
    assert_eq!(report.documents, 2);
    assert_eq!(report.failures, 1);
}

#[tokio::test]
async fn keywords_are_attached_when_enrichment_is_on() {
    let server = MockServer::start().await;
    mock_embeddings(&server).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "install, setup" } }]
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut store = VectorStore::new(&dir.path().join("vectors")).await.unwrap();

    let llm = llm_against(&server);
    let enricher = KeywordEnricher::new(llm.clone(), 10);
    let source = TestSource {
        documents: vec![doc("42", "Guide", "<p>Run the installer.</p>")],
    };
    let ingestor = Ingestor::new(source, llm, Some(enricher), ChunkingConfig::default(), 25);

    ingestor.ingest_document(&mut store, "42").await.unwrap();

    let results = store.search_similar(&[1.0, 0.0, 0.0], 5, 0.0).await.unwrap();
    assert_eq!(results[0].metadata.keywords, vec!["install", "setup"]);
}
