//! Curated model metadata shipped with the crate
//!
//! Entries are layered: generic defaults, then the model's own defaults,
//! then provider-specific overrides.

use super::feature::{Feature, FeatureSet};
use serde::{Deserialize, Serialize};

/// Context window assumed when a model entry does not declare one
pub const GENERIC_CONTEXT_TOKENS: usize = 8192;

/// Priority weight of a provider marked stable
pub const STABLE_WEIGHT: u32 = 10;

/// Priority weight of an unstable or discovered provider
pub const UNSTABLE_WEIGHT: u32 = 1;

/// Static facts about one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub max_context_tokens: usize,
    pub capabilities: FeatureSet,
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

/// Provider-specific overrides for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    /// Overrides the model's context window on this provider
    #[serde(default)]
    pub context_tokens: Option<usize>,
    /// Features this provider adds on top of the model's
    #[serde(default)]
    pub extra_features: FeatureSet,
    #[serde(default)]
    pub stable: bool,
}

impl ModelEntry {
    /// A chat model with the generic defaults
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            max_context_tokens: GENERIC_CONTEXT_TOKENS,
            capabilities: FeatureSet::chat(),
            providers: Vec::new(),
        }
    }

    pub fn context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    /// Replace the capability set
    pub fn features(mut self, features: impl IntoIterator<Item = Feature>) -> Self {
        self.capabilities = features.into_iter().collect();
        self
    }

    pub fn provider(mut self, provider: ProviderEntry) -> Self {
        self.providers.push(provider);
        self
    }
}

impl ProviderEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_tokens: None,
            extra_features: FeatureSet::new(),
            stable: false,
        }
    }

    pub fn context_tokens(mut self, tokens: usize) -> Self {
        self.context_tokens = Some(tokens);
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.extra_features.insert(feature);
        self
    }

    pub fn stable(mut self) -> Self {
        self.stable = true;
        self
    }

    pub fn weight(&self) -> u32 {
        if self.stable {
            STABLE_WEIGHT
        } else {
            UNSTABLE_WEIGHT
        }
    }
}

/// The static half of the model catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticTable {
    entries: Vec<ModelEntry>,
}

impl StaticTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in table
    pub fn builtin() -> Self {
        let chat_vision = [Feature::Chat, Feature::Vision];

        Self::empty()
            .with_model(
                ModelEntry::new("gpt-4o")
                    .context_tokens(128_000)
                    .features(chat_vision)
                    .provider(
                        ProviderEntry::new("Bing")
                            .context_tokens(32_768)
                            .with_feature(Feature::WebSearch)
                            .stable(),
                    )
                    .provider(
                        ProviderEntry::new("GptGo")
                            .context_tokens(8192)
                            .with_feature(Feature::WebSearch)
                            .stable(),
                    )
                    .provider(
                        ProviderEntry::new("You")
                            .context_tokens(4096)
                            .with_feature(Feature::WebSearch),
                    ),
            )
            .with_model(
                ModelEntry::new("claude-3-opus")
                    .context_tokens(200_000)
                    .features(chat_vision)
                    .provider(ProviderEntry::new("ClaudeDev").stable())
                    .provider(ProviderEntry::new("Poe").context_tokens(8192)),
            )
            .with_model(
                ModelEntry::new("gemini")
                    .context_tokens(32_768)
                    .features(chat_vision)
                    .provider(ProviderEntry::new("Google").stable())
                    .provider(ProviderEntry::new("GeminiAdvanced").context_tokens(128_000)),
            )
            .with_model(
                ModelEntry::new("dall-e-3")
                    .features([Feature::Image])
                    .provider(ProviderEntry::new("Bing").stable())
                    .provider(ProviderEntry::new("GptGo").stable()),
            )
            .with_model(ModelEntry::new("whisper-1").features([Feature::Audio]))
            .with_model(
                ModelEntry::new("tts-1")
                    .context_tokens(4096)
                    .features([Feature::Audio]),
            )
    }

    /// Add or replace a model entry
    pub fn with_model(mut self, entry: ModelEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn insert(&mut self, entry: ModelEntry) {
        match self.entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, model: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.id == model)
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_layers_provider_overrides() {
        let table = StaticTable::builtin();
        let gpt = table.get("gpt-4o").unwrap();
        assert_eq!(gpt.max_context_tokens, 128_000);
        assert!(gpt.capabilities.contains(Feature::Vision));

        let you = gpt.providers.iter().find(|p| p.id == "You").unwrap();
        assert_eq!(you.context_tokens, Some(4096));
        assert!(you.extra_features.contains(Feature::WebSearch));
        assert_eq!(you.weight(), UNSTABLE_WEIGHT);

        let bing = gpt.providers.iter().find(|p| p.id == "Bing").unwrap();
        assert_eq!(bing.weight(), STABLE_WEIGHT);
    }

    #[test]
    fn test_generic_defaults() {
        let whisper = StaticTable::builtin().get("whisper-1").cloned().unwrap();
        assert_eq!(whisper.max_context_tokens, GENERIC_CONTEXT_TOKENS);
        assert!(whisper.capabilities.contains(Feature::Audio));
        assert!(!whisper.capabilities.contains(Feature::Chat));
    }

    #[test]
    fn test_insert_replaces_existing_entry() {
        let table = StaticTable::builtin().with_model(ModelEntry::new("gpt-4o").context_tokens(1000));
        assert_eq!(table.get("gpt-4o").unwrap().max_context_tokens, 1000);
        assert_eq!(
            table.entries().iter().filter(|e| e.id == "gpt-4o").count(),
            1
        );
    }
}
