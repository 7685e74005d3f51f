
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extract::{ContentSection, MarkdownDocument};

/// A chunk of document text ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// The chunk text
    pub content: String,
    /// Heading path of the section this chunk came from
    pub heading_path: String,
    /// Index of this chunk within the document
    pub chunk_index: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Configuration for document chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in tokens
    pub target_chunk_size: usize,
    /// Maximum chunk size in tokens before forced splitting
    pub max_chunk_size: usize,
    /// Minimum chunk size in tokens (smaller chunks will be merged)
    pub min_chunk_size: usize,
    /// Overlap size in tokens between adjacent chunks of the same section
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 650,
            max_chunk_size: 1000,
            min_chunk_size: 100,
            overlap_size: 50,
        }
    }
}

/// Split a converted document into embedding-ready chunks
#[inline]
pub fn chunk_document(document: &MarkdownDocument, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    let mut chunk_index = 0;

    for section in &document.sections {
        let section_chunks = chunk_section(section, config, &mut chunk_index)?;
        chunks.extend(section_chunks);
    }

    // No heading structure at all: chunk the raw markdown as one section
    if chunks.is_empty() && !document.markdown.trim().is_empty() {
        let fallback = ContentSection {
            heading_path: document.title.clone(),
            content: document.markdown.clone(),
        };
        chunks = chunk_section(&fallback, config, &mut chunk_index)?;
    }

    let chunks = post_process_chunks(chunks, config);

    debug!(
        "Chunked document '{}' into {} chunks (avg {} tokens)",
        document.title,
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}

fn chunk_section(
    section: &ContentSection,
    config: &ChunkingConfig,
    chunk_index: &mut usize,
) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    let content = &section.content;

    if content.trim().is_empty() {
        return Ok(chunks);
    }

    let token_count = estimate_token_count(content);

    if token_count <= config.target_chunk_size {
        chunks.push(Chunk {
            content: content.clone(),
            heading_path: section.heading_path.clone(),
            chunk_index: *chunk_index,
            token_count,
        });
        *chunk_index += 1;
        return Ok(chunks);
    }

    for split in split_by_semantics(content, config) {
        if split.trim().is_empty() {
            continue;
        }

        let chunk_token_count = estimate_token_count(&split);
        chunks.push(Chunk {
            content: split,
            heading_path: section.heading_path.clone(),
            chunk_index: *chunk_index,
            token_count: chunk_token_count,
        });
        *chunk_index += 1;
    }

    Ok(chunks)
}

/// Split content at paragraph boundaries, falling back to sentence
/// boundaries for paragraphs that exceed the maximum chunk size
fn split_by_semantics(content: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut splits = Vec::new();
    let mut current_split = String::new();
    let mut current_token_count = 0;

    let mut push_piece = |piece: &str,
                          splits: &mut Vec<String>,
                          current_split: &mut String,
                          current_token_count: &mut usize| {
        let piece_tokens = estimate_token_count(piece);
        if *current_token_count + piece_tokens > config.target_chunk_size
            && !current_split.trim().is_empty()
        {
            splits.push(current_split.trim().to_string());
            current_split.clear();
            *current_token_count = 0;
        }
        current_split.push_str(piece);
        current_split.push_str("\n\n");
        *current_token_count += piece_tokens;
    };

    for paragraph in content.split("\n\n") {
        if paragraph.trim().is_empty() {
            continue;
        }

        if estimate_token_count(paragraph) > config.max_chunk_size {
            for sentence_split in split_by_sentences(paragraph, config) {
                push_piece(
                    &sentence_split,
                    &mut splits,
                    &mut current_split,
                    &mut current_token_count,
                );
            }
        } else {
            push_piece(
                paragraph,
                &mut splits,
                &mut current_split,
                &mut current_token_count,
            );
        }
    }

    if !current_split.trim().is_empty() {
        splits.push(current_split.trim().to_string());
    }

    splits
}

fn split_by_sentences(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let mut splits = Vec::new();
    let mut current_split = String::new();
    let mut current_token_count = 0;

    let sentences = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for (i, sentence) in sentences.iter().enumerate() {
        let sentence_with_punct = if i < sentences.len() - 1 {
            format!("{}. ", sentence)
        } else {
            (*sentence).to_string()
        };

        let sentence_tokens = estimate_token_count(&sentence_with_punct);

        if current_token_count + sentence_tokens > config.target_chunk_size
            && !current_split.trim().is_empty()
        {
            splits.push(current_split.trim().to_string());
            current_split.clear();
            current_token_count = 0;
        }

        current_split.push_str(&sentence_with_punct);
        current_token_count += sentence_tokens;
    }

    if !current_split.trim().is_empty() {
        splits.push(current_split.trim().to_string());
    }

    splits
}

/// Merge undersized chunks into their section neighbors and add overlap
fn post_process_chunks(chunks: Vec<Chunk>, config: &ChunkingConfig) -> Vec<Chunk> {
    if chunks.is_empty() {
        return chunks;
    }

    let mut processed: Vec<Chunk> = Vec::new();
    let mut pending_merge: Option<Chunk> = None;

    for chunk in chunks {
        if let Some(mut pending) = pending_merge.take() {
            if chunk.token_count < config.min_chunk_size
                && pending.token_count + chunk.token_count <= config.max_chunk_size
                && pending.heading_path == chunk.heading_path
            {
                pending.content.push_str("\n\n");
                pending.content.push_str(&chunk.content);
                pending.token_count += chunk.token_count;
                pending_merge = Some(pending);
                continue;
            }
            processed.push(pending);
        }

        if chunk.token_count < config.min_chunk_size {
            pending_merge = Some(chunk);
        } else {
            processed.push(chunk);
        }
    }

    if let Some(pending) = pending_merge {
        processed.push(pending);
    }

    if config.overlap_size > 0 {
        processed = add_overlap(processed, config);
    }

    for (i, chunk) in processed.iter_mut().enumerate() {
        chunk.chunk_index = i;
    }

    processed
}

/// Prepend trailing words of the previous chunk when both chunks belong
/// to the same section
fn add_overlap(mut chunks: Vec<Chunk>, config: &ChunkingConfig) -> Vec<Chunk> {
    let mut i = 1;
    while i < chunks.len() {
        let (left, right) = chunks.split_at_mut(i);
        let prev_chunk = &left[i - 1];
        let curr_chunk = &mut right[0];

        if prev_chunk.heading_path == curr_chunk.heading_path {
            let overlap_text = extract_overlap_text(&prev_chunk.content, config.overlap_size);
            if !overlap_text.is_empty() {
                curr_chunk.content = format!("{}\n\n{}", overlap_text, curr_chunk.content);
                curr_chunk.token_count += estimate_token_count(&overlap_text);
            }
        }
        i += 1;
    }

    chunks
}

fn extract_overlap_text(content: &str, overlap_tokens: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let word_count = (overlap_tokens as f64 * 0.75) as usize;

    if words.len() <= word_count {
        return String::new();
    }

    words[words.len() - word_count.min(words.len())..].join(" ")
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
