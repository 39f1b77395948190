//! Concrete model backends and the per-family registry the fallback chain draws from.

mod openai_compat;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parley_core::config::{LlmConfig, ProviderFamily, RetrievalConfig};

use crate::llm::{ChatProvider, ProviderError};
use crate::retrieval::embedding::Embedder;

pub use openai_compat::OpenAiCompatibleProvider;

/// Chat providers keyed by family. A family with no credentials is simply absent.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    chat: HashMap<ProviderFamily, Arc<dyn ChatProvider>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ProviderRegistry {
    pub fn from_config(llm: &LlmConfig, retrieval: &RetrievalConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::default();
        let timeout = Duration::from_secs(llm.timeout_secs.max(1));

        for family in [ProviderFamily::Gemini, ProviderFamily::OpenAi] {
            let Some(key) = llm.api_key(family) else {
                continue;
            };
            let provider = Arc::new(OpenAiCompatibleProvider::new(
                family,
                llm.base_url(family),
                key.clone(),
                retrieval.embedding_model.clone(),
                timeout,
            )?);
            if family == ProviderFamily::OpenAi {
                let embedder: Arc<dyn Embedder> = provider.clone();
                registry.embedder = Some(embedder);
            }
            registry.chat.insert(family, provider);
        }

        Ok(registry)
    }

    pub fn with_chat(mut self, family: ProviderFamily, provider: Arc<dyn ChatProvider>) -> Self {
        self.chat.insert(family, provider);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn chat(&self, family: ProviderFamily) -> Option<Arc<dyn ChatProvider>> {
        self.chat.get(&family).cloned()
    }

    pub fn has_family(&self, family: ProviderFamily) -> bool {
        self.chat.contains_key(&family)
    }

    pub fn embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.clone()
    }

    pub fn families(&self) -> Vec<ProviderFamily> {
        let mut families: Vec<_> = self.chat.keys().copied().collect();
        families.sort_by_key(|family| family.as_str());
        families
    }
}
