#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{MessageRole, NewMessage, StoredMessage};
use crate::llm::{ChatMessage, LlmClient};

const ANSWER_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about the \
    team's documentation. Use the provided context to answer. If the context does not contain \
    the answer, say that you do not know rather than guessing.";

const REWRITE_SYSTEM_PROMPT: &str = "Rewrite the user's latest question as a standalone search \
    query, resolving any references to the earlier conversation. Reply with only the rewritten \
    query.";

/// Orchestrates conversation memory, retrieval and the LLM for chat
#[derive(Clone)]
pub struct ChatService {
    llm: LlmClient,
    memory: Database,
    store: Arc<Mutex<VectorStore>>,
    config: ChatConfig,
}

impl ChatService {
    #[inline]
    pub fn new(
        llm: LlmClient,
        memory: Database,
        store: Arc<Mutex<VectorStore>>,
        config: ChatConfig,
    ) -> Self {
        Self {
            llm,
            memory,
            store,
            config,
        }
    }

    /// Answer a question within a conversation. Returns `None` when the
    /// LLM produced no usable answer; nothing is recorded in memory in
    /// that case.
    #[inline]
    pub async fn respond(&self, conversation_id: &str, question: &str) -> Result<Option<String>> {
        let history = self.load_history(conversation_id).await?;
        let messages = self.prepare_messages(&history, question).await?;

        let answer = self.llm.chat_completion(&messages).await?;

        match answer {
            Some(answer) => {
                self.record_exchange(conversation_id, question, &answer)
                    .await?;
                info!(conversation_id, "Chat response produced");
                Ok(Some(answer))
            }
            None => {
                warn!(conversation_id, "Chat produced no usable answer");
                Ok(None)
            }
        }
    }

    /// Answer a question as a stream of text deltas. The exchange is
    /// recorded in memory once the stream has finished.
    #[inline]
    pub async fn respond_streaming(
        &self,
        conversation_id: &str,
        question: &str,
    ) -> Result<ReceiverStream<Result<String>>> {
        let history = self.load_history(conversation_id).await?;
        let messages = self.prepare_messages(&history, question).await?;

        let mut upstream = self.llm.chat_completion_stream(&messages).await?;

        let (sender, receiver) = tokio::sync::mpsc::channel(32);
        let memory = self.memory.clone();
        let conversation_id = conversation_id.to_string();
        let question = question.to_string();

        tokio::spawn(async move {
            let mut answer = String::new();
            let mut failed = false;

            while let Some(delta) = upstream.next().await {
                match delta {
                    Ok(text) => {
                        answer.push_str(&text);
                        if sender.send(Ok(text)).await.is_err() {
                            debug!(conversation_id, "Stream consumer went away");
                            failed = true;
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = sender.send(Err(e)).await;
                        failed = true;
                        break;
                    }
                }
            }

            if !failed && !answer.is_empty() {
                let recorded = async {
                    memory
                        .append_message(NewMessage::user(&conversation_id, &question))
                        .await?;
                    memory
                        .append_message(NewMessage::assistant(&conversation_id, &answer))
                        .await
                }
                .await;
                if let Err(e) = recorded {
                    warn!(conversation_id, error = ?e, "Failed to record streamed exchange");
                } else {
                    info!(conversation_id, "Streamed chat response recorded");
                }
            }
        });

        Ok(ReceiverStream::new(receiver))
    }

    /// The remembered window of a conversation, oldest first
    #[inline]
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        self.load_history(conversation_id).await
    }

    async fn load_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        self.memory
            .conversation_window(conversation_id, self.config.memory_window)
            .await
    }

    /// Build the completion prompt: rewrite the question against the
    /// history, retrieve context for it, then lay out system prompt,
    /// context, history and the question itself.
    async fn prepare_messages(
        &self,
        history: &[StoredMessage],
        question: &str,
    ) -> Result<Vec<ChatMessage>> {
        let query = self.rewrite_query(history, question).await;
        let context = self.retrieve_context(&query).await?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        let system = if context.is_empty() {
            ANSWER_SYSTEM_PROMPT.to_string()
        } else {
            format!("{ANSWER_SYSTEM_PROMPT}\n\nContext:\n{context}")
        };
        messages.push(ChatMessage::system(system));

        for message in history {
            match message.role {
                MessageRole::User => messages.push(ChatMessage::user(&message.content)),
                MessageRole::Assistant => messages.push(ChatMessage::assistant(&message.content)),
                MessageRole::System => {}
            }
        }

        messages.push(ChatMessage::user(question));
        Ok(messages)
    }

    /// Turn a follow-up question into a standalone retrieval query. With
    /// no history the question is already standalone; on rewrite failure
    /// the raw question is used.
    async fn rewrite_query(&self, history: &[StoredMessage], question: &str) -> String {
        if history.is_empty() {
            return question.to_string();
        }

        let mut transcript = String::new();
        for message in history {
            transcript.push_str(message.role.as_str());
            transcript.push_str(": ");
            transcript.push_str(&message.content);
            transcript.push('\n');
        }

        let messages = [
            ChatMessage::system(REWRITE_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Conversation so far:\n{transcript}\nLatest question: {question}"
            )),
        ];

        match self.llm.chat_completion(&messages).await {
            Ok(Some(rewritten)) => {
                debug!(original = question, rewritten = %rewritten, "Rewrote retrieval query");
                rewritten
            }
            Ok(None) => question.to_string(),
            Err(e) => {
                warn!(error = ?e, "Query rewrite failed, using the raw question");
                question.to_string()
            }
        }
    }

    async fn retrieve_context(&self, query: &str) -> Result<String> {
        let embeddings = self
            .llm
            .embed(std::slice::from_ref(&query.to_string()))
            .await
            .context("Failed to embed retrieval query")?;
        let Some(query_vector) = embeddings.first() else {
            return Ok(String::new());
        };

        let results = self
            .store
            .lock()
            .await
            .search_similar(
                query_vector,
                self.config.retrieval_top_k,
                self.config.similarity_threshold,
            )
            .await?;

        debug!(count = results.len(), "Retrieved context chunks");

        let mut context = String::new();
        for result in &results {
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&format!(
                "Source: {} ({})\n{}",
                result.metadata.doc_title, result.metadata.link, result.metadata.content
            ));
        }
        Ok(context)
    }

    async fn record_exchange(
        &self,
        conversation_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<()> {
        self.memory
            .append_message(NewMessage::user(conversation_id, question))
            .await?;
        self.memory
            .append_message(NewMessage::assistant(conversation_id, answer))
            .await?;
        Ok(())
    }
}
