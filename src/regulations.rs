//! Retrieval-augmented answers about Massachusetts food regulations.

use std::sync::Arc;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::vector_index::VectorIndex;

const EXPERT_PROMPT: &str = "You are an expert in Massachusetts food regulation laws. \
Respond strictly based on the provided context. \
Include regulation titles, codes, and user-friendly explanations.";

#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("No relevant data found.")]
    NoMatches,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct RegulationService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
    chat_model: String,
    top_k: usize,
}

impl RegulationService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatModel>,
        chat_model: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            chat,
            chat_model: chat_model.into(),
            top_k,
        }
    }

    /// Space-joined `content` of the nearest stored documents, `None` when
    /// the index returns no matches.
    async fn retrieve(&self, question: &str) -> anyhow::Result<Option<String>> {
        let vector = embed_query(self.embedder.as_ref(), question).await?;
        let matches = self.index.query(&vector, self.top_k, true).await?;
        if matches.is_empty() {
            return Ok(None);
        }
        let contexts: Vec<&str> = matches.iter().filter_map(|m| m.content()).collect();
        Ok(Some(contexts.join(" ")))
    }

    pub async fn ask(&self, question: &str) -> Result<String, AskError> {
        let context = self.retrieve(question).await?.ok_or(AskError::NoMatches)?;

        let request = ChatRequest::new(
            self.chat_model.clone(),
            vec![
                ChatMessage::system(EXPERT_PROMPT),
                ChatMessage::user(format!("Context: {}\n\n{}", context, question)),
            ],
        );
        let reply = self.chat.complete(&request).await?;
        Ok(reply.content.unwrap_or_default())
    }

    /// Raw regulation context for the assistant; never fails.
    pub async fn search_regulations(&self, query: &str) -> String {
        match self.retrieve(query).await {
            Ok(Some(context)) => context,
            Ok(None) => "No relevant regulations found.".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "regulation search failed");
                "Error searching regulations.".to_string()
            }
        }
    }
}
