//! Deterministic provider ordering for one logical request

use super::health::{HealthRegistry, ProviderInfo};
use crate::capabilities::{FeatureSet, ModelCatalog};
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A provider to try, with the context window it offers for the model
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub provider: ProviderInfo,
    pub context_tokens: usize,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.provider.id
    }
}

/// Orders capable providers: preferred ones first in the caller's order,
/// then the rest by health and priority.
#[derive(Debug, Clone)]
pub struct ProviderSelector {
    catalog: Arc<ModelCatalog>,
    registry: Arc<HealthRegistry>,
}

impl ProviderSelector {
    pub fn new(catalog: Arc<ModelCatalog>, registry: Arc<HealthRegistry>) -> Self {
        Self { catalog, registry }
    }

    /// Providers able to serve `model` with every feature in `required`.
    ///
    /// Returns `NoCapableProvider` instead of an empty ordering.
    pub fn select(
        &self,
        model: &str,
        required: &FeatureSet,
        preferred: &[String],
    ) -> Result<Vec<Candidate>> {
        let info = self.catalog.resolve(model)?;

        let mut capable: Vec<Candidate> = info
            .providers
            .values()
            .filter(|binding| binding.capabilities.is_superset(required))
            .map(|binding| Candidate {
                provider: self.catalog.provider_info(binding, &self.registry),
                context_tokens: info.context_limit_for(&binding.provider),
            })
            .collect();

        let mut ordering = Vec::with_capacity(capable.len());
        let mut seen = HashSet::new();
        for id in preferred {
            if !seen.insert(id.as_str()) {
                continue;
            }
            if let Some(pos) = capable.iter().position(|c| c.id() == id) {
                ordering.push(capable.remove(pos));
            }
        }

        capable.sort_by(compare_candidates);
        ordering.extend(capable);

        if ordering.is_empty() {
            return Err(Error::NoCapableProvider {
                model: model.to_string(),
                required_features: required.clone(),
            });
        }

        debug!(
            model,
            required = %required,
            ordering = ?ordering.iter().map(Candidate::id).collect::<Vec<_>>(),
            "provider ordering selected"
        );
        Ok(ordering)
    }
}

/// Fewest consecutive failures, then highest priority, then most recent
/// success, then id.
fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    let (ha, hb) = (&a.provider.health, &b.provider.health);
    ha.consecutive_failures
        .cmp(&hb.consecutive_failures)
        .then_with(|| b.provider.priority.cmp(&a.provider.priority))
        .then_with(|| match (ha.last_success, hb.last_success) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.id().cmp(b.id()))
}
