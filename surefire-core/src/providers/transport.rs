//! The seam between the resilience core and whatever actually talks to providers

use super::error::ProviderError;
use crate::capabilities::FeatureSet;
use crate::protocol::{ChatPayload, Payload, Response};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use uuid::Uuid;

/// Text chunks of one streaming attempt; may end with an error at any point
pub type ChunkStream = BoxStream<'static, Result<String, ProviderError>>;

/// Per-attempt routing information handed to the transport
#[derive(Debug, Clone)]
pub struct AttemptOptions {
    /// Shared by every attempt of one logical request
    pub request_id: Uuid,
    pub provider: String,
    pub model: String,
    pub timeout: Duration,
}

impl AttemptOptions {
    pub fn new(request_id: Uuid, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            request_id,
            provider: provider.into(),
            model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A model reported by provider discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredModel {
    pub id: String,
    /// Used only for models the static table does not know
    pub capabilities: Option<FeatureSet>,
    pub context_tokens: Option<usize>,
}

impl DiscoveredModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: None,
            context_tokens: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: FeatureSet) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_context_tokens(mut self, tokens: usize) -> Self {
        self.context_tokens = Some(tokens);
        self
    }
}

/// A provider reported by discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredProvider {
    pub id: String,
    pub models: Vec<DiscoveredModel>,
    pub working: bool,
}

impl DiscoveredProvider {
    pub fn working<I, S>(id: impl Into<String>, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            models: models.into_iter().map(DiscoveredModel::new).collect(),
            working: true,
        }
    }
}

/// Executes single attempts against a named provider.
///
/// Implementations do not retry; the orchestrator owns retries, timeouts and
/// failover.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn attempt(
        &self,
        options: &AttemptOptions,
        payload: &Payload,
    ) -> Result<Response, ProviderError>;

    /// Open a chunked chat response. The returned stream is dropped to cancel.
    async fn stream_attempt(
        &self,
        options: &AttemptOptions,
        payload: &ChatPayload,
    ) -> Result<ChunkStream, ProviderError>;

    /// Providers this transport can currently reach
    async fn discover(&self) -> Result<Vec<DiscoveredProvider>, ProviderError> {
        Ok(Vec::new())
    }
}
