//! Knowledge retrieval: hypothetical-answer expansion, cosine candidate scoring and optional
//! model re-ranking. Every stage degrades instead of failing the reply.

pub mod embedding;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use parley_core::config::{AppConfig, ProviderFamily};
use parley_core::domain::agent::AgentId;
use parley_core::domain::knowledge::KnowledgePassage;
use parley_core::similarity::{rank_passages, ScoredPassage};
use parley_db::repositories::{KnowledgeRepository, RepositoryError};

use crate::llm::{complete_text, ProviderError};
use crate::providers::ProviderRegistry;
use embedding::{embed_with_timeout, ensure_passage_embeddings};

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("hypothetical answer generation failed: {0}")]
    Hyde(ProviderError),
    #[error("embedding failed: {0}")]
    Embedding(ProviderError),
    #[error("re-ranking failed: {0}")]
    Rerank(String),
    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: &'static str, seconds: u64 },
    #[error("knowledge could not be loaded: {0}")]
    Knowledge(#[from] RepositoryError),
    #[error("no {0} model is configured")]
    Unavailable(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub candidate_pool: usize,
    pub result_limit: usize,
    pub rerank_enabled: bool,
    pub lightweight_model: String,
    pub timeout: Duration,
}

impl RetrievalSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            candidate_pool: config.retrieval.candidate_pool.max(1),
            result_limit: config.retrieval.result_limit.max(1),
            rerank_enabled: config.retrieval.rerank_enabled,
            lightweight_model: config.llm.lightweight_model.clone(),
            timeout: Duration::from_secs(config.retrieval.timeout_secs.max(1)),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            candidate_pool: 20,
            result_limit: 5,
            rerank_enabled: false,
            lightweight_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

pub struct RetrievalPipeline {
    knowledge: Arc<dyn KnowledgeRepository>,
    providers: ProviderRegistry,
    settings: RetrievalSettings,
}

impl RetrievalPipeline {
    pub fn new(
        knowledge: Arc<dyn KnowledgeRepository>,
        providers: ProviderRegistry,
        settings: RetrievalSettings,
    ) -> Self {
        Self { knowledge, providers, settings }
    }

    /// Passage texts for `query`, most relevant first, at most `result_limit` of them.
    pub async fn retrieve(&self, agent_id: &AgentId, query: &str) -> Vec<String> {
        let (hypothetical, passages) =
            tokio::join!(self.hypothetical_answer(query), self.knowledge.passages_for_agent(agent_id));

        let passages = match passages {
            Ok(passages) if passages.is_empty() => return Vec::new(),
            Ok(passages) => passages,
            Err(error) => {
                warn!(
                    event_name = "agent.retrieval.knowledge_unavailable",
                    agent_id = %agent_id.0,
                    error = %error,
                    "continuing without knowledge"
                );
                return Vec::new();
            }
        };

        let expanded = match hypothetical {
            Ok(hypothetical) => format!("{query}\n{hypothetical}"),
            Err(error) => {
                warn!(
                    event_name = "agent.retrieval.hyde_fallback",
                    agent_id = %agent_id.0,
                    error = %error,
                    "using raw query for retrieval"
                );
                query.to_string()
            }
        };

        let candidates = match self.candidates(&expanded, passages).await {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!(
                    event_name = "agent.retrieval.scoring_failed",
                    agent_id = %agent_id.0,
                    error = %error,
                    "continuing without knowledge"
                );
                return Vec::new();
            }
        };

        if self.settings.rerank_enabled && candidates.len() > 1 {
            match self.rerank(query, &candidates).await {
                Ok(order) => {
                    let reranked = apply_rerank_order(&candidates, &order, self.settings.result_limit);
                    if !reranked.is_empty() {
                        return reranked;
                    }
                    warn!(
                        event_name = "agent.retrieval.rerank_fallback",
                        agent_id = %agent_id.0,
                        "re-rank ordering referenced no candidate"
                    );
                }
                Err(error) => warn!(
                    event_name = "agent.retrieval.rerank_fallback",
                    agent_id = %agent_id.0,
                    error = %error,
                    "keeping cosine order"
                ),
            }
        }

        candidates
            .into_iter()
            .take(self.settings.result_limit)
            .map(|candidate| candidate.passage.content)
            .collect()
    }

    async fn candidates(
        &self,
        query: &str,
        passages: Vec<KnowledgePassage>,
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        let embedder = self.providers.embedder().ok_or(RetrievalError::Unavailable("embedding"))?;
        let query_vector = embed_with_timeout(embedder.as_ref(), query, self.settings.timeout).await?;
        let passages =
            ensure_passage_embeddings(embedder.as_ref(), &self.knowledge, passages, self.settings.timeout)
                .await;
        let ranked = rank_passages(&query_vector, passages, self.settings.candidate_pool);
        debug!(
            event_name = "agent.retrieval.candidates_scored",
            candidates = ranked.len(),
            top_score = ranked.first().map(|candidate| candidate.score).unwrap_or(0.0),
            "cosine candidates ready"
        );
        Ok(ranked)
    }

    async fn hypothetical_answer(&self, query: &str) -> Result<String, RetrievalError> {
        let prompt = format!(
            "Write a short, technical passage that directly answers the question below, phrased \
             the way a company knowledge base would state it. Output only the passage.\n\n\
             Question: {query}"
        );
        let text = self.lightweight_completion(&prompt).await.map_err(|error| match error {
            LightweightFailure::Provider(error) => RetrievalError::Hyde(error),
            LightweightFailure::Other(error) => error,
        })?;
        Ok(text.trim().to_string())
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[ScoredPassage],
    ) -> Result<Vec<usize>, RetrievalError> {
        let mut prompt = format!(
            "Rank the numbered passages by how well they answer the question. Respond with only a \
             JSON array of passage numbers, most relevant first.\n\nQuestion: {query}\n\n"
        );
        for (index, candidate) in candidates.iter().enumerate() {
            prompt.push_str(&format!("[{index}] {}\n", candidate.passage.content.trim()));
        }

        let text = self.lightweight_completion(&prompt).await.map_err(|error| match error {
            LightweightFailure::Provider(error) => RetrievalError::Rerank(error.to_string()),
            LightweightFailure::Other(error) => error,
        })?;
        parse_rerank_order(&text)
            .ok_or_else(|| RetrievalError::Rerank(format!("unparseable ordering `{}`", text.trim())))
    }

    async fn lightweight_completion(&self, prompt: &str) -> Result<String, LightweightFailure> {
        let model = self.settings.lightweight_model.as_str();
        let provider = self
            .providers
            .chat(ProviderFamily::for_model(model))
            .ok_or(LightweightFailure::Other(RetrievalError::Unavailable("lightweight")))?;

        match tokio::time::timeout(self.settings.timeout, complete_text(provider.as_ref(), model, prompt))
            .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(error)) => Err(LightweightFailure::Provider(error)),
            Err(_) => Err(LightweightFailure::Other(RetrievalError::Timeout {
                stage: "lightweight completion",
                seconds: self.settings.timeout.as_secs(),
            })),
        }
    }
}

enum LightweightFailure {
    Provider(ProviderError),
    Other(RetrievalError),
}

/// First JSON array of non-negative integers found in `text`.
pub fn parse_rerank_order(text: &str) -> Option<Vec<usize>> {
    let start = text.find('[')?;
    let end = text[start..].find(']')? + start;
    let values: Vec<Value> = serde_json::from_str(&text[start..=end]).ok()?;
    Some(
        values
            .iter()
            .filter_map(|value| value.as_u64().and_then(|index| usize::try_from(index).ok()))
            .collect(),
    )
}

/// Maps a re-rank ordering back onto candidates, ignoring out-of-range and repeated indices.
pub fn apply_rerank_order(candidates: &[ScoredPassage], order: &[usize], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    order
        .iter()
        .filter(|index| **index < candidates.len() && seen.insert(**index))
        .take(limit)
        .map(|index| candidates[*index].passage.content.clone())
        .collect()
}
