#[cfg(test)]
mod tests;

use tracing::warn;

use crate::llm::{ChatMessage, LlmClient};

/// Attaches LLM-extracted keywords to chunks during ingestion.
///
/// Keyword extraction is best-effort: a failed or empty completion
/// leaves the chunk without keywords rather than failing the document.
#[derive(Debug, Clone)]
pub struct KeywordEnricher {
    llm: LlmClient,
    keyword_count: usize,
}

impl KeywordEnricher {
    #[inline]
    pub fn new(llm: LlmClient, keyword_count: usize) -> Self {
        Self { llm, keyword_count }
    }

    /// Extract up to `keyword_count` keywords for a chunk of text
    #[inline]
    pub async fn extract_keywords(&self, content: &str) -> Vec<String> {
        let prompt = format!(
            "Extract up to {count} keywords that best describe the following text. \
             Reply with only the keywords, separated by commas.\n\n{content}",
            count = self.keyword_count,
        );

        let completion = match self.llm.chat_completion(&[ChatMessage::user(prompt)]).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = ?e, "Keyword extraction failed, continuing without keywords");
                return Vec::new();
            }
        };

        let Some(text) = completion else {
            warn!("Keyword extraction returned no content, continuing without keywords");
            return Vec::new();
        };

        parse_keywords(&text, self.keyword_count)
    }
}

fn parse_keywords(text: &str, limit: usize) -> Vec<String> {
    text.split(',')
        .map(|keyword| keyword.trim().trim_matches('"').to_string())
        .filter(|keyword| !keyword.is_empty())
        .take(limit)
        .collect()
}
