use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use parley_core::domain::knowledge::KnowledgePassage;
use parley_db::repositories::KnowledgeRepository;

use super::RetrievalError;
use crate::llm::ProviderError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

pub async fn embed_with_timeout(
    embedder: &dyn Embedder,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, RetrievalError> {
    match tokio::time::timeout(timeout, embedder.embed(text)).await {
        Ok(Ok(vector)) => Ok(vector),
        Ok(Err(error)) => Err(RetrievalError::Embedding(error)),
        Err(_) => Err(RetrievalError::Timeout { stage: "embedding", seconds: timeout.as_secs() }),
    }
}

/// Embeds passages that have no stored vector and caches the result on the passage row.
/// Passages that still fail keep `embedding: None` and are skipped by ranking.
pub async fn ensure_passage_embeddings(
    embedder: &dyn Embedder,
    knowledge: &Arc<dyn KnowledgeRepository>,
    passages: Vec<KnowledgePassage>,
    timeout: Duration,
) -> Vec<KnowledgePassage> {
    let pending = join_all(passages.into_iter().map(|mut passage| async move {
        if passage.embedding.is_some() {
            return (passage, false);
        }
        match embed_with_timeout(embedder, &passage.content, timeout).await {
            Ok(vector) => {
                passage.embedding = Some(vector);
                (passage, true)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.retrieval.passage_embedding_failed",
                    passage_id = %passage.id.0,
                    error = %error,
                    "passage left unranked"
                );
                (passage, false)
            }
        }
    }))
    .await;

    let mut passages = Vec::with_capacity(pending.len());
    for (passage, fresh) in pending {
        if fresh {
            if let Some(vector) = passage.embedding.clone() {
                if let Err(error) = knowledge.store_embedding(&passage.id, vector).await {
                    warn!(
                        event_name = "agent.retrieval.embedding_cache_failed",
                        passage_id = %passage.id.0,
                        error = %error,
                        "could not cache passage embedding"
                    );
                }
            }
        }
        passages.push(passage);
    }
    passages
}
