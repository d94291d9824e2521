//! Shared fixtures for the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use surefire_core::capabilities::{ModelEntry, ProviderEntry, StaticTable};
use surefire_core::protocol::{ChatPayload, Payload, Response};
use surefire_core::providers::{AttemptOptions, ChunkStream, DiscoveredProvider, ProviderError, Transport};
use surefire_core::{Client, ClientConfig};

/// What a provider does on one non-streaming attempt
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    Fail(ProviderError),
    /// Never answers; the orchestrator's timeout has to fire
    Hang,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Respond(Response::Text(text.to_string()))
    }
}

/// One recorded attempt
#[derive(Debug, Clone)]
pub struct Call {
    pub provider: String,
    pub model: String,
    pub payload: Option<Payload>,
    pub stream_payload: Option<ChatPayload>,
}

impl Call {
    /// Messages sent in a chat attempt, streaming or not
    pub fn chat(&self) -> Option<&ChatPayload> {
        match (&self.payload, &self.stream_payload) {
            (Some(Payload::Chat(chat)), _) => Some(chat),
            (_, Some(chat)) => Some(chat),
            _ => None,
        }
    }
}

/// Scripted transport: queued replies per provider, then a fallback
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<String, Reply>>,
    streams: Mutex<HashMap<String, VecDeque<Vec<Result<String, ProviderError>>>>>,
    discovery: Mutex<Option<Result<Vec<DiscoveredProvider>, ProviderError>>>,
    calls: Mutex<Vec<Call>>,
    discover_calls: Mutex<usize>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a one-shot reply for `provider`
    pub fn then(&self, provider: &str, reply: Reply) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(provider.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Reply used once the queue for `provider` is empty
    pub fn always(&self, provider: &str, reply: Reply) -> &Self {
        self.fallback.lock().unwrap().insert(provider.to_string(), reply);
        self
    }

    /// Queue the chunk script for the next stream opened on `provider`
    pub fn stream(&self, provider: &str, chunks: Vec<Result<String, ProviderError>>) -> &Self {
        self.streams
            .lock()
            .unwrap()
            .entry(provider.to_string())
            .or_default()
            .push_back(chunks);
        self
    }

    pub fn discovery(&self, result: Result<Vec<DiscoveredProvider>, ProviderError>) -> &Self {
        *self.discovery.lock().unwrap() = Some(result);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn providers_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.provider).collect()
    }

    pub fn discover_calls(&self) -> usize {
        *self.discover_calls.lock().unwrap()
    }

    fn next_reply(&self, provider: &str) -> Reply {
        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(provider)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.fallback
            .lock()
            .unwrap()
            .get(provider)
            .cloned()
            .unwrap_or_else(|| Reply::Fail(ProviderError::network(provider, "connection refused")))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn attempt(&self, options: &AttemptOptions, payload: &Payload) -> Result<Response, ProviderError> {
        self.calls.lock().unwrap().push(Call {
            provider: options.provider.clone(),
            model: options.model.clone(),
            payload: Some(payload.clone()),
            stream_payload: None,
        });

        match self.next_reply(&options.provider) {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(err) => Err(err),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Err(ProviderError::network(&options.provider, "hung"))
            }
        }
    }

    async fn stream_attempt(&self, options: &AttemptOptions, payload: &ChatPayload) -> Result<ChunkStream, ProviderError> {
        self.calls.lock().unwrap().push(Call {
            provider: options.provider.clone(),
            model: options.model.clone(),
            payload: None,
            stream_payload: Some(payload.clone()),
        });

        let script = self
            .streams
            .lock()
            .unwrap()
            .get_mut(&options.provider)
            .and_then(VecDeque::pop_front);
        match script {
            Some(chunks) => Ok(futures::stream::iter(chunks).boxed()),
            None => Err(ProviderError::network(&options.provider, "connection refused")),
        }
    }

    async fn discover(&self) -> Result<Vec<DiscoveredProvider>, ProviderError> {
        *self.discover_calls.lock().unwrap() += 1;
        self.discovery
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// One model "m" served by `alpha` (stable, 10k window), `beta` (stable,
/// 10k) and `gamma` (unstable, 2k)
pub fn three_provider_table() -> StaticTable {
    StaticTable::empty().with_model(
        ModelEntry::new("m")
            .context_tokens(10_000)
            .provider(ProviderEntry::new("alpha").stable())
            .provider(ProviderEntry::new("beta").stable())
            .provider(ProviderEntry::new("gamma").context_tokens(2_000)),
    )
}

/// Fast retries, generous history budget, whole-budget trimming
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        default_model: "m".to_string(),
        retries: 3,
        retry_delay: 0.0,
        context_reduction_factor: 1.0,
        max_history_tokens: 100_000,
        ..Default::default()
    }
}

pub fn client_with(config: ClientConfig, table: StaticTable, transport: Arc<MockTransport>) -> Client {
    Client::builder(config, transport)
        .static_table(table)
        .build()
        .expect("test client")
}

pub fn client(transport: Arc<MockTransport>) -> Client {
    client_with(fast_config(), three_provider_table(), transport)
}
