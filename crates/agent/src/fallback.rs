//! Ordered model fallback.
//!
//! A reply cycle tries each naming variant of the requested model, then one descriptor from
//! the configured fallback family. The first descriptor that answers is pinned for the rest of
//! the cycle.

use parley_core::config::ProviderFamily;

const VARIANT_SUFFIXES: [&str; 2] = ["-001", "-latest"];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelDescriptor {
    pub family: ProviderFamily,
    pub model: String,
}

impl ModelDescriptor {
    pub fn new(family: ProviderFamily, model: impl Into<String>) -> Self {
        Self { family, model: model.into() }
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.family.as_str(), self.model)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackChain {
    variants: Vec<ModelDescriptor>,
    fallback: Option<ModelDescriptor>,
}

impl FallbackChain {
    pub fn new(requested_model: &str, fallback_family: ProviderFamily, fallback_model: &str) -> Self {
        let family = ProviderFamily::for_model(requested_model);
        let variants: Vec<ModelDescriptor> = model_variants(requested_model)
            .into_iter()
            .map(|model| ModelDescriptor::new(family, model))
            .collect();

        let fallback = Some(ModelDescriptor::new(fallback_family, fallback_model.trim()))
            .filter(|candidate| !candidate.model.is_empty() && !variants.contains(candidate));

        Self { variants, fallback }
    }

    pub fn primary_family(&self) -> Option<ProviderFamily> {
        self.variants.first().map(|descriptor| descriptor.family)
    }

    pub fn variants(&self) -> &[ModelDescriptor] {
        &self.variants
    }

    pub fn fallback(&self) -> Option<&ModelDescriptor> {
        self.fallback.as_ref()
    }

    /// Descriptor to attempt in `state`, if that state attempts anything.
    pub fn descriptor_for<'a>(&'a self, state: &'a ChainState) -> Option<&'a ModelDescriptor> {
        match state {
            ChainState::TryVariant(index) => self.variants.get(*index),
            ChainState::FallbackFamily => self.fallback.as_ref(),
            ChainState::Bound(descriptor) => Some(descriptor),
            ChainState::Failed => None,
        }
    }

    /// Every descriptor the chain can ever attempt, in order.
    pub fn attempt_order(&self) -> Vec<&ModelDescriptor> {
        self.variants.iter().chain(self.fallback.iter()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainState {
    TryVariant(usize),
    FallbackFamily,
    Bound(ModelDescriptor),
    Failed,
}

impl ChainState {
    pub fn start() -> Self {
        Self::TryVariant(0)
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    /// Skips states that have nothing to attempt, so the result is attemptable or terminal.
    pub fn settle(self, chain: &FallbackChain) -> Self {
        match self {
            Self::TryVariant(index) if index >= chain.variants.len() => {
                Self::FallbackFamily.settle(chain)
            }
            Self::FallbackFamily if chain.fallback.is_none() => Self::Failed,
            other => other,
        }
    }

    pub fn on_success(self, chain: &FallbackChain) -> Self {
        match chain.descriptor_for(&self) {
            Some(descriptor) => Self::Bound(descriptor.clone()),
            None => Self::Failed,
        }
    }

    /// A bound descriptor is never retried and never abandoned for another one.
    pub fn on_failure(self, chain: &FallbackChain) -> Self {
        match self {
            Self::TryVariant(index) => Self::TryVariant(index + 1).settle(chain),
            Self::FallbackFamily => Self::Failed,
            Self::Bound(descriptor) => Self::Bound(descriptor),
            Self::Failed => Self::Failed,
        }
    }
}

/// `m`, `m-001`, `m-latest` for the base name of `m`, de-duplicated in that order.
pub fn model_variants(model: &str) -> Vec<String> {
    let model = model.trim();
    if model.is_empty() {
        return Vec::new();
    }
    let base = VARIANT_SUFFIXES
        .iter()
        .find_map(|suffix| model.strip_suffix(suffix))
        .unwrap_or(model);

    let mut variants = vec![model.to_string()];
    for suffix in VARIANT_SUFFIXES {
        let candidate = format!("{base}{suffix}");
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use parley_core::config::ProviderFamily;

    use super::{model_variants, ChainState, FallbackChain, ModelDescriptor};

    #[test]
    fn variants_cover_pinned_and_latest_names() {
        assert_eq!(
            model_variants("gemini-1.5-flash"),
            vec!["gemini-1.5-flash", "gemini-1.5-flash-001", "gemini-1.5-flash-latest"]
        );
        assert_eq!(
            model_variants("gemini-1.5-flash-latest"),
            vec!["gemini-1.5-flash-latest", "gemini-1.5-flash-001"]
        );
        assert!(model_variants("  ").is_empty());
    }

    #[test]
    fn chain_appends_one_fallback_family_descriptor() {
        let chain = FallbackChain::new("gemini-1.5-flash", ProviderFamily::OpenAi, "gpt-4o-mini");

        assert_eq!(chain.primary_family(), Some(ProviderFamily::Gemini));
        let order: Vec<String> = chain.attempt_order().iter().map(|d| d.label()).collect();
        assert_eq!(
            order,
            vec![
                "gemini/gemini-1.5-flash",
                "gemini/gemini-1.5-flash-001",
                "gemini/gemini-1.5-flash-latest",
                "openai/gpt-4o-mini",
            ]
        );
    }

    #[test]
    fn fallback_equal_to_a_variant_is_dropped() {
        let chain = FallbackChain::new("gpt-4o-mini", ProviderFamily::OpenAi, "gpt-4o-mini");
        assert!(chain.fallback().is_none());
        assert_eq!(chain.attempt_order().len(), 3);
    }

    #[test]
    fn failures_walk_every_descriptor_then_fail() {
        let chain = FallbackChain::new("gemini-pro", ProviderFamily::OpenAi, "gpt-4o-mini");
        let mut state = ChainState::start().settle(&chain);
        let mut attempted = Vec::new();

        while let Some(descriptor) = chain.descriptor_for(&state).cloned() {
            attempted.push(descriptor.model);
            state = state.on_failure(&chain);
        }

        assert_eq!(state, ChainState::Failed);
        assert_eq!(attempted, vec!["gemini-pro", "gemini-pro-001", "gemini-pro-latest", "gpt-4o-mini"]);
    }

    #[test]
    fn success_pins_the_descriptor() {
        let chain = FallbackChain::new("gemini-pro", ProviderFamily::OpenAi, "gpt-4o-mini");
        let state = ChainState::start().on_failure(&chain).on_success(&chain);

        assert_eq!(state, ChainState::Bound(ModelDescriptor::new(ProviderFamily::Gemini, "gemini-pro-001")));
        assert_eq!(state.clone().on_failure(&chain), state);
    }

    #[test]
    fn empty_model_goes_straight_to_fallback_family() {
        let chain = FallbackChain::new("", ProviderFamily::Gemini, "gemini-1.5-flash");
        let state = ChainState::start().settle(&chain);
        assert_eq!(state, ChainState::FallbackFamily);
    }
}
