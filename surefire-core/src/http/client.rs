//! HTTP transport implementation using reqwest

use super::error::{map_http_error, map_request_error};
use super::wire::{
    ChatRequest, ChatResponse, ImageRequest, ImageResponse, ModelList, SpeechRequest, StreamChunk,
    TranscriptionResponse, WireMessage,
};
use crate::config::{ClientConfig, ConfigError, EndpointConfig, SecretString};
use crate::protocol::{
    ChatPayload, ImagePayload, Payload, Response as ApiResponse, SpeechPayload, TranscriptionPayload,
};
use crate::providers::{
    AttemptOptions, ChunkStream, DiscoveredModel, DiscoveredProvider, ErrorMapper, ProviderError, Transport,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{multipart, Client, ClientBuilder, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum response size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

const USER_AGENT: &str = concat!("surefire/", env!("CARGO_PKG_VERSION"));

/// Timeout for model discovery requests
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Talks to OpenAI-compatible endpoints; each configured endpoint is a
/// provider named after it.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoints: BTreeMap<String, EndpointConfig>,
    default_api_key: Option<SecretString>,
    max_response_size: usize,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("max_response_size", &self.max_response_size)
            .finish()
    }
}

impl HttpTransport {
    /// Build a transport from the `endpoints`, `proxy` and `api_key` settings
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| ConfigError::HttpClient {
                message: format!("invalid proxy '{}': {}", proxy, e),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| ConfigError::HttpClient {
            message: format!("failed to create HTTP client: {}", e),
        })?;

        let endpoints = config
            .endpoints
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect();

        Ok(Self {
            client,
            endpoints,
            default_api_key: config.api_key.clone(),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    pub fn with_max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    fn endpoint(&self, provider: &str) -> Result<&EndpointConfig, ProviderError> {
        self.endpoints
            .get(provider)
            .ok_or_else(|| ProviderError::fatal(provider, "no endpoint configured for this provider"))
    }

    fn build_url(endpoint: &EndpointConfig, path: &str) -> String {
        format!("{}{}", endpoint.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, endpoint: &EndpointConfig, builder: RequestBuilder) -> RequestBuilder {
        match endpoint.api_key.as_ref().or(self.default_api_key.as_ref()) {
            Some(key) if !key.is_empty() => builder.bearer_auth(key.expose_secret()),
            _ => builder,
        }
    }

    fn post(&self, options: &AttemptOptions, path: &str) -> Result<RequestBuilder, ProviderError> {
        let endpoint = self.endpoint(&options.provider)?;
        let url = Self::build_url(endpoint, path);
        debug!(
            request_id = %options.request_id,
            provider = %options.provider,
            url = %url,
            "sending request"
        );
        let builder = self
            .client
            .post(url)
            .timeout(options.timeout)
            .header("X-Request-ID", options.request_id.to_string());
        Ok(self.authorize(endpoint, builder))
    }

    /// Send and turn transport failures and non-success statuses into errors
    async fn send(&self, options: &AttemptOptions, builder: RequestBuilder) -> Result<Response, ProviderError> {
        let response = builder
            .send()
            .await
            .map_err(|e| map_request_error(&options.provider, e, options.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.ok();
            warn!(
                request_id = %options.request_id,
                provider = %options.provider,
                status = status.as_u16(),
                "request failed"
            );
            return Err(map_http_error(&options.provider, status, Some(&headers), body));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_response_size {
                return Err(ProviderError::invalid_response(
                    &options.provider,
                    format!("response size {} exceeds maximum {}", length, self.max_response_size),
                ));
            }
        }

        Ok(response)
    }

    async fn read_bytes(&self, provider: &str, response: Response, timeout: Duration) -> Result<Vec<u8>, ProviderError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_request_error(provider, e, timeout))?;
        if bytes.is_empty() {
            return Err(ProviderError::invalid_response(provider, "empty response body"));
        }
        if bytes.len() > self.max_response_size {
            return Err(ProviderError::invalid_response(
                provider,
                format!("response size {} exceeds maximum {}", bytes.len(), self.max_response_size),
            ));
        }
        Ok(bytes.to_vec())
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        options: &AttemptOptions,
        response: Response,
    ) -> Result<T, ProviderError> {
        let body = self.read_bytes(&options.provider, response, options.timeout).await?;
        serde_json::from_slice(&body).map_err(|e| {
            warn!(
                request_id = %options.request_id,
                provider = %options.provider,
                error = %e,
                "unparseable response"
            );
            ProviderError::invalid_response(&options.provider, format!("invalid response format: {}", e))
        })
    }

    async fn chat(&self, options: &AttemptOptions, payload: &ChatPayload) -> Result<ApiResponse, ProviderError> {
        let request = chat_request(&options.model, payload, false);
        let response = self.send(options, self.post(options, "/chat/completions")?.json(&request)).await?;
        let parsed: ChatResponse = self.read_json(options, response).await?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(ApiResponse::Text(text))
    }

    async fn image(&self, options: &AttemptOptions, payload: &ImagePayload) -> Result<ApiResponse, ProviderError> {
        let request = ImageRequest {
            model: &options.model,
            prompt: &payload.prompt,
            n: payload.n,
            size: payload.size.as_deref(),
        };
        let response = self.send(options, self.post(options, "/images/generations")?.json(&request)).await?;
        let parsed: ImageResponse = self.read_json(options, response).await?;
        Ok(ApiResponse::Images(parsed.into_images()))
    }

    async fn transcribe(
        &self,
        options: &AttemptOptions,
        payload: &TranscriptionPayload,
    ) -> Result<ApiResponse, ProviderError> {
        let file = multipart::Part::bytes(payload.audio.clone()).file_name(payload.file_name.clone());
        let mut form = multipart::Form::new()
            .text("model", options.model.clone())
            .part("file", file);
        if let Some(language) = &payload.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .send(options, self.post(options, "/audio/transcriptions")?.multipart(form))
            .await?;
        let parsed: TranscriptionResponse = self.read_json(options, response).await?;
        Ok(ApiResponse::Text(parsed.text))
    }

    async fn speech(&self, options: &AttemptOptions, payload: &SpeechPayload) -> Result<ApiResponse, ProviderError> {
        let request = SpeechRequest {
            model: &options.model,
            input: &payload.input,
            voice: &payload.voice,
        };
        let response = self.send(options, self.post(options, "/audio/speech")?.json(&request)).await?;
        let audio = self.read_bytes(&options.provider, response, options.timeout).await?;
        Ok(ApiResponse::Audio(audio))
    }

    async fn list_models(&self, endpoint: &EndpointConfig) -> Result<Vec<String>, ProviderError> {
        let builder = self
            .client
            .get(Self::build_url(endpoint, "/models"))
            .timeout(DISCOVERY_TIMEOUT);
        let response = self
            .authorize(endpoint, builder)
            .send()
            .await
            .map_err(|e| map_request_error(&endpoint.name, e, DISCOVERY_TIMEOUT))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            return Err(map_http_error(&endpoint.name, status, None, body));
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(&endpoint.name, e.to_string()))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

fn chat_request<'a>(model: &'a str, payload: &ChatPayload, stream: bool) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: payload.messages.iter().map(WireMessage::from).collect(),
        stream,
        web_search: payload.web_search,
    }
}

/// Turn an SSE body into text chunks. `[DONE]` ends the stream; chunks with
/// no text are skipped.
fn parse_event_stream(provider: String, response: Response) -> ChunkStream {
    response
        .bytes_stream()
        .eventsource()
        .take_while(|event| {
            let done = matches!(event, Ok(event) if event.data.trim() == "[DONE]");
            futures::future::ready(!done)
        })
        .filter_map(move |event| {
            let provider = provider.clone();
            async move {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => return Some(Err(ProviderError::network(&provider, format!("stream error: {}", e)))),
                };

                let value: serde_json::Value = match serde_json::from_str(&event.data) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(provider = %provider, error = %e, "failed to parse stream chunk");
                        return None;
                    }
                };

                if let Some(error) = value.get("error") {
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string());
                    return Some(Err(ErrorMapper::from_message(&provider, &message)));
                }

                match serde_json::from_value::<StreamChunk>(value) {
                    Ok(chunk) => {
                        let text = chunk.text();
                        (!text.is_empty()).then_some(Ok(text))
                    }
                    Err(e) => {
                        warn!(provider = %provider, error = %e, "unexpected stream chunk shape");
                        None
                    }
                }
            }
        })
        .boxed()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn attempt(&self, options: &AttemptOptions, payload: &Payload) -> Result<ApiResponse, ProviderError> {
        match payload {
            Payload::Chat(chat) => self.chat(options, chat).await,
            Payload::Image(image) => self.image(options, image).await,
            Payload::Transcription(audio) => self.transcribe(options, audio).await,
            Payload::Speech(speech) => self.speech(options, speech).await,
        }
    }

    async fn stream_attempt(&self, options: &AttemptOptions, payload: &ChatPayload) -> Result<ChunkStream, ProviderError> {
        let request = chat_request(&options.model, payload, true);
        // The whole-request timeout would cut long streams; idle time is
        // bounded by the streaming controller instead.
        let builder = self
            .post(options, "/chat/completions")?
            .timeout(Duration::from_secs(24 * 60 * 60))
            .header("Accept", "text/event-stream")
            .json(&request);
        let response = self.send(options, builder).await?;
        Ok(parse_event_stream(options.provider.clone(), response))
    }

    async fn discover(&self) -> Result<Vec<DiscoveredProvider>, ProviderError> {
        let mut discovered = Vec::with_capacity(self.endpoints.len());
        for endpoint in self.endpoints.values() {
            if !endpoint.models.is_empty() {
                discovered.push(DiscoveredProvider::working(&endpoint.name, endpoint.models.iter().cloned()));
                continue;
            }

            match self.list_models(endpoint).await {
                Ok(models) => discovered.push(DiscoveredProvider::working(&endpoint.name, models)),
                Err(e) => {
                    warn!(provider = %endpoint.name, error = %e, "model discovery failed");
                    discovered.push(DiscoveredProvider {
                        id: endpoint.name.clone(),
                        models: Vec::<DiscoveredModel>::new(),
                        working: false,
                    });
                }
            }
        }
        Ok(discovered)
    }
}
