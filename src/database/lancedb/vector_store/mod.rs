
use super::{ChunkMetadata, EmbeddingRecord};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const TABLE_NAME: &str = "embeddings";

// text-embedding-3-small; the table is recreated on first insert if the
// actual model produces a different width
const DEFAULT_VECTOR_DIMENSION: usize = 1536;

/// Vector store using LanceDB for chunk similarity search
pub struct VectorStore {
    connection: Connection,
    vector_dimension: Option<usize>,
}

/// One chunk returned by similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub metadata: ChunkMetadata,
    /// 1.0 minus the vector distance, higher is more similar
    pub similarity: f32,
}

impl VectorStore {
    /// Open (or create) the vector database at the given directory
    #[inline]
    pub async fn new(db_path: &Path) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::Database(format!("Failed to create vector database directory: {e}"))
            })?;
        }

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to connect to LanceDB: {e}")))?;

        let mut store = Self {
            connection,
            vector_dimension: None,
        };
        store.initialize_table().await?;

        info!("Vector store initialized");
        Ok(store)
    }

    async fn initialize_table(&mut self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {e}")))?;

        if table_names.contains(&TABLE_NAME.to_string()) {
            let dim = self.detect_existing_vector_dimension().await?;
            debug!("Embeddings table exists with dimension {}", dim);
            self.vector_dimension = Some(dim);
            return Ok(());
        }

        self.connection
            .create_empty_table(TABLE_NAME, create_schema(DEFAULT_VECTOR_DIMENSION))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create embeddings table: {e}")))?;

        self.vector_dimension = Some(DEFAULT_VECTOR_DIMENSION);
        info!(
            "Embeddings table created with {} dimensions",
            DEFAULT_VECTOR_DIMENSION
        );
        Ok(())
    }

    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open existing table: {e}")))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {e}")))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(RagError::Database(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Store a batch of embeddings. If the vector width differs from the
    /// current table, the table is dropped and recreated, since mixing
    /// embeddings from different models is meaningless.
    #[inline]
    pub async fn store_embeddings(&mut self, records: Vec<EmbeddingRecord>) -> Result<()> {
        if records.is_empty() {
            debug!("No embeddings to store");
            return Ok(());
        }

        let vector_dim = records[0].vector.len();
        if self.vector_dimension != Some(vector_dim) {
            info!(
                "Vector dimension changed from {:?} to {}, recreating table",
                self.vector_dimension, vector_dim
            );
            self.recreate_table_with_dimension(vector_dim).await?;
            self.vector_dimension = Some(vector_dim);
        }

        let record_batch = self.create_record_batch(&records)?;

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {e}")))?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert embeddings: {e}")))?;

        debug!("Stored {} embeddings", records.len());
        Ok(())
    }

    async fn recreate_table_with_dimension(&self, vector_dim: usize) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables for drop: {e}")))?;

        if table_names.contains(&TABLE_NAME.to_string()) {
            self.connection
                .drop_table(TABLE_NAME)
                .await
                .map_err(|e| RagError::Database(format!("Failed to drop table: {e}")))?;
        }

        self.connection
            .create_empty_table(TABLE_NAME, create_schema(vector_dim))
            .execute()
            .await
            .map_err(|e| {
                RagError::Database(format!("Failed to create table with new dimensions: {e}"))
            })?;

        Ok(())
    }

    fn create_record_batch(&self, records: &[EmbeddingRecord]) -> Result<RecordBatch> {
        let len = records.len();
        let vector_dim = self
            .vector_dimension
            .ok_or_else(|| RagError::Database("Vector dimension not set".to_string()))?;

        let mut ids = Vec::with_capacity(len);
        let mut doc_ids = Vec::with_capacity(len);
        let mut doc_titles = Vec::with_capacity(len);
        let mut links = Vec::with_capacity(len);
        let mut heading_paths = Vec::with_capacity(len);
        let mut keywords = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut token_counts = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            if record.vector.len() != vector_dim {
                return Err(RagError::Database(format!(
                    "Embedding width {} does not match table dimension {}",
                    record.vector.len(),
                    vector_dim
                )));
            }
            ids.push(record.id.as_str());
            doc_ids.push(record.metadata.doc_id.as_str());
            doc_titles.push(record.metadata.doc_title.as_str());
            links.push(record.metadata.link.as_str());
            heading_paths.push(record.metadata.heading_path.as_deref());
            keywords.push(record.metadata.keywords.join(","));
            contents.push(record.metadata.content.as_str());
            token_counts.push(record.metadata.token_count);
            chunk_indices.push(record.metadata.chunk_index);
            created_ats.push(record.metadata.created_at.as_str());
        }

        let mut flat_values = Vec::with_capacity(len * vector_dim);
        for record in records {
            flat_values.extend_from_slice(&record.vector);
        }
        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| RagError::Database(format!("Failed to create vector array: {e}")))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(doc_titles)),
            Arc::new(StringArray::from(links)),
            Arc::new(StringArray::from(heading_paths)),
            Arc::new(StringArray::from(keywords)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(token_counts)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(create_schema(vector_dim), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {e}")))
    }

    /// Similarity search over stored chunks. Results below
    /// `min_similarity` are dropped, and at most `limit` are returned,
    /// best first.
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchResult>> {
        debug!(limit, min_similarity, "Searching for similar chunks");

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {e}")))?;

        let mut stream = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {e}")))?
            .column("vector")
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {e}")))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Database(format!("Failed to read result stream: {e}")))?
        {
            results.extend(parse_search_batch(&batch)?);
        }

        results.retain(|r| r.similarity >= min_similarity);
        debug!("Search returned {} chunks above threshold", results.len());
        Ok(results)
    }

    /// Delete all embeddings for a document, used before re-ingesting it
    #[inline]
    pub async fn delete_document_embeddings(&mut self, doc_id: &str) -> Result<()> {
        debug!(doc_id, "Deleting document embeddings");

        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {e}")))?;

        let predicate = format!("doc_id = '{}'", doc_id.replace('\'', "''"));
        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::Database(format!("Failed to delete document embeddings: {e}")))?;

        Ok(())
    }

    /// Total number of embeddings stored
    #[inline]
    pub async fn count_embeddings(&self) -> Result<u64> {
        let table = self
            .connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {e}")))?;

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {e}")))?;
        Ok(count as u64)
    }
}

fn create_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("doc_id", DataType::Utf8, false),
        Field::new("doc_title", DataType::Utf8, false),
        Field::new("link", DataType::Utf8, false),
        Field::new("heading_path", DataType::Utf8, true),
        Field::new("keywords", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("token_count", DataType::UInt32, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database(format!("Invalid {name} column type")))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::Database(format!("Invalid {name} column type")))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
    let doc_ids = string_column(batch, "doc_id")?;
    let doc_titles = string_column(batch, "doc_title")?;
    let links = string_column(batch, "link")?;
    let heading_paths = string_column(batch, "heading_path")?;
    let keywords = string_column(batch, "keywords")?;
    let contents = string_column(batch, "content")?;
    let token_counts = u32_column(batch, "token_count")?;
    let chunk_indices = u32_column(batch, "chunk_index")?;
    let created_ats = string_column(batch, "created_at")?;

    let distances = batch
        .column_by_name("_distance")
        .map(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut results = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let metadata = ChunkMetadata {
            doc_id: doc_ids.value(row).to_string(),
            doc_title: doc_titles.value(row).to_string(),
            link: links.value(row).to_string(),
            heading_path: if heading_paths.is_null(row) {
                None
            } else {
                Some(heading_paths.value(row).to_string())
            },
            keywords: split_keywords(keywords.value(row)),
            content: contents.value(row).to_string(),
            token_count: token_counts.value(row),
            chunk_index: chunk_indices.value(row),
            created_at: created_ats.value(row).to_string(),
        };

        let distance = distances
            .flatten()
            .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        results.push(SearchResult {
            metadata,
            similarity: 1.0 - distance,
        });
    }

    Ok(results)
}

fn split_keywords(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ToString::to_string)
        .collect()
}
