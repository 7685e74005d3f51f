// LanceDB vector database module
// Handles embedding storage and similarity search for document chunks


pub mod vector_store;

use serde::{Deserialize, Serialize};

pub use vector_store::{SearchResult, VectorStore};

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Unique identifier for this embedding
    pub id: String,
    /// The vector embedding
    pub vector: Vec<f32>,
    /// Metadata about the chunk this embedding represents
    pub metadata: ChunkMetadata,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Id of the source document in Confluence
    pub doc_id: String,
    /// Title of the source document
    pub doc_title: String,
    /// Human-facing URL of the source document
    pub link: String,
    /// Heading path (e.g., "Getting Started > Installation")
    pub heading_path: Option<String>,
    /// Keywords attached during ingestion, empty when enrichment is off
    pub keywords: Vec<String>,
    /// The actual text content of the chunk
    pub content: String,
    /// Token count of the chunk
    pub token_count: u32,
    /// Index of this chunk within the document
    pub chunk_index: u32,
    /// Timestamp when this embedding was created
    pub created_at: String,
}
