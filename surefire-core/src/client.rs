//! Client facade: owns the shared state every session and request uses

use crate::capabilities::{CatalogSettings, Feature, FeatureSet, ModelCatalog, StaticTable};
use crate::config::{ClientConfig, ResolvedConfig};
use crate::context::{CharRatioCounter, ContextTrimmer, SharedTokenCounter};
use crate::error::{Error, Result};
use crate::protocol::{
    ChatPayload, ImagePayload, Message, Payload, RequestContext, Response, SpeechPayload,
    TranscriptionPayload,
};
use crate::providers::{
    HealthRegistry, HealthSnapshot, ProviderError, ProviderSelector, RetryOrchestrator,
    RetryPolicy, StreamingController, Success, Transport,
};
use crate::session::ChatSession;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Per-call knobs for the one-shot media requests
#[derive(Debug, Clone, Default)]
pub struct MediaOptions {
    /// Replaces the configured model for this kind of request
    pub model: Option<String>,
    /// Replaces the configured preferred providers for this call
    pub preferred_providers: Option<Vec<String>>,
    /// Replaces the configured per-attempt timeout for this call
    pub timeout: Option<Duration>,
}

impl MediaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn preferred_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) catalog: Arc<ModelCatalog>,
    pub(crate) registry: Arc<HealthRegistry>,
    pub(crate) selector: ProviderSelector,
    pub(crate) orchestrator: RetryOrchestrator,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) counter: SharedTokenCounter,
    pub(crate) trimmer: ContextTrimmer,
}

/// Entry point: creates chat sessions and runs one-shot media requests.
///
/// Cloning is cheap; clones share the catalog, the health registry and the
/// transport.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    table: StaticTable,
    counter: SharedTokenCounter,
}

impl ClientBuilder {
    /// Replace the built-in static model table
    pub fn static_table(mut self, table: StaticTable) -> Self {
        self.table = table;
        self
    }

    pub fn token_counter(mut self, counter: SharedTokenCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn build(self) -> Result<Client> {
        self.config
            .validate()
            .map_err(|e| Error::Config(e.into()))?;

        let config = self.config;
        let registry = Arc::new(HealthRegistry::new());
        let catalog = Arc::new(ModelCatalog::new(self.table, CatalogSettings::from(&config)));
        let selector = ProviderSelector::new(Arc::clone(&catalog), Arc::clone(&registry));
        let orchestrator = RetryOrchestrator::new(
            Arc::clone(&registry),
            RetryPolicy::from(&config),
            config.timeout_duration(),
        );
        let trimmer =
            ContextTrimmer::new(config.context_reduction_factor, config.truncation_head_fraction);

        debug!(
            default_model = %config.default_model,
            retries = config.retries,
            timeout_s = config.timeout,
            "client created"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                catalog,
                registry,
                selector,
                orchestrator,
                transport: self.transport,
                counter: self.counter,
                trimmer,
            }),
        })
    }
}

impl Client {
    pub fn builder(config: ClientConfig, transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder {
            config,
            transport,
            table: StaticTable::builtin(),
            counter: Arc::new(CharRatioCounter::default()),
        }
    }

    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder(config, transport).build()
    }

    pub fn from_resolved(resolved: ResolvedConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::new(resolved.into_config(), transport)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.inner.catalog
    }

    pub fn health(&self, provider: &str) -> HealthSnapshot {
        self.inner.registry.snapshot(provider)
    }

    /// A new conversation on the default model
    pub fn new_chat(&self) -> ChatSession {
        ChatSession::new(self.clone(), self.inner.config.default_model.clone())
    }

    pub(crate) fn streaming_controller(&self, orchestrator: RetryOrchestrator) -> StreamingController {
        StreamingController::new(
            Arc::clone(&self.inner.transport),
            orchestrator,
            self.inner.trimmer.clone(),
            Arc::clone(&self.inner.counter),
        )
    }

    /// Ids of the providers the catalog currently knows to be usable
    pub async fn working_providers(&self) -> Vec<String> {
        self.inner
            .catalog
            .refresh_if_stale(self.inner.transport.as_ref())
            .await;
        self.inner.catalog.working_providers()
    }

    /// One-off chat completion with no session history and no cleaning
    pub async fn complete(&self, messages: Vec<Message>, model: &str) -> Result<String> {
        let payload = Payload::Chat(ChatPayload::new(messages.clone()));
        let ctx = RequestContext::new(model, FeatureSet::chat())
            .with_history(messages, self.inner.config.max_history_tokens);
        let success = self.run(ctx, payload, &MediaOptions::new()).await?;
        into_kind(success.value, &success.provider, Response::into_text)
    }

    pub async fn generate_image(&self, prompt: impl Into<String>, options: MediaOptions) -> Result<Vec<String>> {
        let model = options.model.as_deref().unwrap_or(&self.inner.config.image_model);
        let payload = Payload::Image(ImagePayload {
            prompt: prompt.into(),
            size: None,
            n: None,
        });
        let ctx = RequestContext::new(model, FeatureSet::new().with(Feature::Image));
        let success = self.run(ctx, payload, &options).await?;
        into_kind(success.value, &success.provider, Response::into_images)
    }

    pub async fn transcribe_audio(
        &self,
        audio: Vec<u8>,
        file_name: impl Into<String>,
        options: MediaOptions,
    ) -> Result<String> {
        let model = options.model.as_deref().unwrap_or(&self.inner.config.transcription_model);
        let payload = Payload::Transcription(TranscriptionPayload {
            audio,
            file_name: file_name.into(),
            language: None,
        });
        let ctx = RequestContext::new(model, FeatureSet::new().with(Feature::Audio));
        let success = self.run(ctx, payload, &options).await?;
        into_kind(success.value, &success.provider, Response::into_text)
    }

    pub async fn text_to_speech(
        &self,
        text: impl Into<String>,
        voice: impl Into<String>,
        options: MediaOptions,
    ) -> Result<Vec<u8>> {
        let model = options.model.as_deref().unwrap_or(&self.inner.config.speech_model);
        let payload = Payload::Speech(SpeechPayload {
            input: text.into(),
            voice: voice.into(),
        });
        let ctx = RequestContext::new(model, FeatureSet::new().with(Feature::Audio));
        let success = self.run(ctx, payload, &options).await?;
        into_kind(success.value, &success.provider, Response::into_audio)
    }

    /// Select, then retry one payload across providers
    async fn run(&self, ctx: RequestContext, payload: Payload, options: &MediaOptions) -> Result<Success<Response>> {
        let inner = &self.inner;
        inner.catalog.refresh_if_stale(inner.transport.as_ref()).await;
        let preferred = options
            .preferred_providers
            .as_deref()
            .unwrap_or(&inner.config.preferred_providers);
        let ordering = inner
            .selector
            .select(&ctx.model, &ctx.required_features, preferred)?;
        let orchestrator = match options.timeout {
            Some(timeout) => inner.orchestrator.clone().with_timeout(timeout),
            None => inner.orchestrator.clone(),
        };

        let transport = &inner.transport;
        let payload = &payload;
        let kind = payload.kind();
        let success = orchestrator
            .execute(&ctx, &ordering, |_candidate, options| async move {
                let response = transport.attempt(&options, payload).await?;
                if response.is_empty() {
                    return Err(ProviderError::invalid_response(
                        &options.provider,
                        format!("empty {} response", kind),
                    ));
                }
                Ok(response)
            })
            .await?;
        Ok(success)
    }
}

/// Unwrap the expected response variant. A provider answering with the wrong
/// kind already succeeded as far as retries go, so this is not retried.
fn into_kind<T>(response: Response, provider: &str, extract: fn(Response) -> Option<T>) -> Result<T> {
    extract(response).ok_or_else(|| {
        Error::Api(crate::error::ApiError::new(
            Vec::new(),
            Some(ProviderError::invalid_response(provider, "unexpected response kind")),
        ))
    })
}
