//! Model capability catalog: static metadata merged with discovered providers

use super::feature::{Feature, FeatureSet};
use super::static_table::{StaticTable, UNSTABLE_WEIGHT};
use crate::config::{ClientConfig, UnknownModelPolicy};
use crate::error::{Error, Result};
use crate::providers::{DiscoveredProvider, HealthRegistry, ProviderInfo, Transport};
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where a piece of model metadata came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSource {
    Static,
    Dynamic,
    /// Unknown model filled in with defaults
    Assumed,
}

/// What one provider offers for one model
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderBinding {
    pub provider: String,
    /// Overrides the model's window on this provider
    pub context_tokens: Option<usize>,
    pub capabilities: FeatureSet,
    pub priority: u32,
    pub stable: bool,
    pub source: ModelSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub max_context_tokens: usize,
    pub capabilities: FeatureSet,
    pub source: ModelSource,
    pub providers: BTreeMap<String, ProviderBinding>,
}

impl ModelInfo {
    /// Effective context window for this model on `provider`
    pub fn context_limit_for(&self, provider: &str) -> usize {
        self.providers
            .get(provider)
            .and_then(|b| b.context_tokens)
            .unwrap_or(self.max_context_tokens)
    }

    pub fn supports(&self, provider: &str, feature: Feature) -> bool {
        self.providers
            .get(provider)
            .map(|b| b.capabilities.contains(feature))
            .unwrap_or(false)
    }
}

#[derive(Debug)]
struct Snapshot {
    /// `None` until the first successful discovery
    fetched_at: Option<Instant>,
    models: BTreeMap<String, ModelInfo>,
    provider_models: BTreeMap<String, BTreeSet<String>>,
}

/// Catalog settings taken from the client configuration
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub ttl: Duration,
    pub default_context_tokens: usize,
    pub unknown_model_policy: UnknownModelPolicy,
    pub weight_overrides: BTreeMap<String, u32>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for CatalogSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            ttl: config.provider_cache_ttl_duration(),
            default_context_tokens: config.default_context_tokens,
            unknown_model_policy: config.unknown_model_policy,
            weight_overrides: config.provider_weights.clone(),
        }
    }
}

/// Answers "which providers serve model M with feature F, and how large is
/// M's window there".
///
/// Reads go through an atomically swapped snapshot. A snapshot older than
/// the TTL is refreshed by whichever caller notices first; concurrent
/// refreshes simply race to store equivalent snapshots.
#[derive(Debug)]
pub struct ModelCatalog {
    table: StaticTable,
    settings: CatalogSettings,
    snapshot: ArcSwap<Snapshot>,
}

impl ModelCatalog {
    pub fn new(table: StaticTable, settings: CatalogSettings) -> Self {
        let snapshot = build_snapshot(&table, &settings, &[], None);
        Self {
            table,
            settings,
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    pub fn is_stale(&self) -> bool {
        match self.snapshot.load().fetched_at {
            Some(fetched_at) => fetched_at.elapsed() >= self.settings.ttl,
            None => true,
        }
    }

    /// Refresh from the transport's discovery feed when the snapshot is stale
    pub async fn refresh_if_stale(&self, transport: &dyn Transport) {
        if self.is_stale() {
            self.refresh(transport).await;
        }
    }

    /// Rebuild the snapshot from discovery. On failure the previous snapshot
    /// stays in place.
    pub async fn refresh(&self, transport: &dyn Transport) {
        match transport.discover().await {
            Ok(discovered) => {
                let snapshot =
                    build_snapshot(&self.table, &self.settings, &discovered, Some(Instant::now()));
                info!(
                    discovered = discovered.len(),
                    models = snapshot.models.len(),
                    providers = snapshot.provider_models.len(),
                    "provider catalog refreshed"
                );
                self.snapshot.store(Arc::new(snapshot));
            }
            Err(e) => {
                warn!(error = %e, "provider discovery failed; keeping previous catalog");
            }
        }
    }

    pub fn resolve(&self, model: &str) -> Result<ModelInfo> {
        let snapshot = self.snapshot.load();
        if let Some(info) = snapshot.models.get(model) {
            return Ok(info.clone());
        }

        match self.settings.unknown_model_policy {
            UnknownModelPolicy::FailClosed => Err(Error::UnknownModel {
                model: model.to_string(),
            }),
            UnknownModelPolicy::AssumeDefault => {
                debug!(model, "unknown model; assuming defaults");
                Ok(self.assumed(model, &snapshot))
            }
        }
    }

    /// Chat-only defaults, offered by every provider the catalog knows
    fn assumed(&self, model: &str, snapshot: &Snapshot) -> ModelInfo {
        let providers = snapshot
            .provider_models
            .keys()
            .map(|provider| {
                (
                    provider.clone(),
                    ProviderBinding {
                        provider: provider.clone(),
                        context_tokens: None,
                        capabilities: FeatureSet::chat(),
                        priority: self.weight_for(provider, UNSTABLE_WEIGHT),
                        stable: false,
                        source: ModelSource::Assumed,
                    },
                )
            })
            .collect();

        ModelInfo {
            id: model.to_string(),
            max_context_tokens: self.settings.default_context_tokens,
            capabilities: FeatureSet::chat(),
            source: ModelSource::Assumed,
            providers,
        }
    }

    fn weight_for(&self, provider: &str, default: u32) -> u32 {
        self.settings
            .weight_overrides
            .get(provider)
            .copied()
            .unwrap_or(default)
    }

    pub fn supports(&self, provider: &str, model: &str, feature: Feature) -> bool {
        self.snapshot
            .load()
            .models
            .get(model)
            .map(|info| info.supports(provider, feature))
            .unwrap_or(false)
    }

    /// Providers serving `model`, highest priority first (ties by id)
    pub fn list_providers_for(&self, model: &str, registry: &HealthRegistry) -> Result<Vec<ProviderInfo>> {
        let info = self.resolve(model)?;
        let mut providers: Vec<ProviderInfo> = info
            .providers
            .values()
            .map(|binding| self.provider_info(binding, registry))
            .collect();
        providers.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(providers)
    }

    pub(crate) fn provider_info(&self, binding: &ProviderBinding, registry: &HealthRegistry) -> ProviderInfo {
        ProviderInfo {
            id: binding.provider.clone(),
            models: self
                .snapshot
                .load()
                .provider_models
                .get(&binding.provider)
                .cloned()
                .unwrap_or_default(),
            priority: binding.priority,
            health: registry.snapshot(&binding.provider),
        }
    }

    /// Ids of every provider in the current snapshot
    pub fn working_providers(&self) -> Vec<String> {
        self.snapshot.load().provider_models.keys().cloned().collect()
    }
}

fn build_snapshot(
    table: &StaticTable,
    settings: &CatalogSettings,
    discovered: &[DiscoveredProvider],
    fetched_at: Option<Instant>,
) -> Snapshot {
    let weight = |provider: &str, default: u32| {
        settings
            .weight_overrides
            .get(provider)
            .copied()
            .unwrap_or(default)
    };

    let mut models: BTreeMap<String, ModelInfo> = BTreeMap::new();
    for entry in table.entries() {
        let providers = entry
            .providers
            .iter()
            .map(|p| {
                let mut capabilities = entry.capabilities.clone();
                capabilities.extend(p.extra_features.iter());
                (
                    p.id.clone(),
                    ProviderBinding {
                        provider: p.id.clone(),
                        context_tokens: p.context_tokens,
                        capabilities,
                        priority: weight(&p.id, p.weight()),
                        stable: p.stable,
                        source: ModelSource::Static,
                    },
                )
            })
            .collect();

        models.insert(
            entry.id.clone(),
            ModelInfo {
                id: entry.id.clone(),
                max_context_tokens: entry.max_context_tokens,
                capabilities: entry.capabilities.clone(),
                source: ModelSource::Static,
                providers,
            },
        );
    }

    for provider in discovered.iter().filter(|p| p.working) {
        for model in &provider.models {
            let info = models.entry(model.id.clone()).or_insert_with(|| ModelInfo {
                id: model.id.clone(),
                max_context_tokens: model
                    .context_tokens
                    .unwrap_or(settings.default_context_tokens),
                capabilities: model.capabilities.clone().unwrap_or_else(FeatureSet::chat),
                source: ModelSource::Dynamic,
                providers: BTreeMap::new(),
            });

            // Static bindings win; discovery only fills gaps.
            if info.providers.contains_key(&provider.id) {
                continue;
            }
            let capabilities = info.capabilities.clone();
            info.providers.insert(
                provider.id.clone(),
                ProviderBinding {
                    provider: provider.id.clone(),
                    context_tokens: None,
                    capabilities,
                    priority: weight(&provider.id, UNSTABLE_WEIGHT),
                    stable: false,
                    source: ModelSource::Dynamic,
                },
            );
        }
    }

    let mut provider_models: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for info in models.values() {
        for provider in info.providers.keys() {
            provider_models
                .entry(provider.clone())
                .or_default()
                .insert(info.id.clone());
        }
    }

    Snapshot {
        fetched_at,
        models,
        provider_models,
    }
}
