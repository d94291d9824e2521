//! Streaming with mid-stream failover and continuation seeding
//!
//! A stream starts `Connecting` to the first candidate and moves to
//! `Streaming` once chunks flow. When a provider fails (connect error,
//! mid-stream error, idle timeout, or an end of stream with nothing new) the
//! controller reconnects to the next candidate and asks it to continue from
//! the text already delivered. If that provider starts over instead, the
//! repeated prefix is swallowed.

use super::error::ProviderError;
use super::retry::{AttemptOutcome, AttemptRecord, RetryOrchestrator};
use super::selector::Candidate;
use super::transport::{AttemptOptions, ChunkStream, Transport};
use crate::context::{ContextTrimmer, SharedTokenCounter};
use crate::error::{ApiError, Error};
use crate::protocol::{ChatPayload, Message, RequestContext};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Caller-facing stream of text chunks
pub type TextStream = BoxStream<'static, Result<String, Error>>;

/// Instruction appended after the partial answer when failing over
pub const CONTINUATION_PROMPT: &str =
    "Continue your previous response exactly where it stopped. Do not repeat any text you have already written.";

/// Everything the stream produces, including how it ended
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(String),
    Finished(StreamSummary),
    Failed(Error),
}

#[derive(Debug, Clone)]
pub struct StreamSummary {
    /// The whole assembled response
    pub text: String,
    /// Provider that finished the response
    pub provider: String,
    pub attempts: Vec<AttemptRecord>,
}

/// Opens resilient chat streams over a [`Transport`]
#[derive(Clone)]
pub struct StreamingController {
    transport: Arc<dyn Transport>,
    orchestrator: RetryOrchestrator,
    trimmer: ContextTrimmer,
    counter: SharedTokenCounter,
}

impl StreamingController {
    pub fn new(
        transport: Arc<dyn Transport>,
        orchestrator: RetryOrchestrator,
        trimmer: ContextTrimmer,
        counter: SharedTokenCounter,
    ) -> Self {
        Self {
            transport,
            orchestrator,
            trimmer,
            counter,
        }
    }

    /// Stream text chunks; the final item is an error if every attempt failed
    pub fn stream(&self, ctx: RequestContext, ordering: Vec<Candidate>, payload: ChatPayload) -> TextStream {
        self.events(ctx, ordering, payload)
            .filter_map(|event| async move {
                match event {
                    StreamEvent::Chunk(text) => Some(Ok(text)),
                    StreamEvent::Finished(_) => None,
                    StreamEvent::Failed(err) => Some(Err(err)),
                }
            })
            .boxed()
    }

    /// Like [`stream`](Self::stream), but also reports the terminal summary
    pub fn events(
        &self,
        ctx: RequestContext,
        ordering: Vec<Candidate>,
        payload: ChatPayload,
    ) -> BoxStream<'static, StreamEvent> {
        let state = StreamState {
            controller: self.clone(),
            ctx,
            ordering,
            payload,
            attempt: 0,
            emitted: String::new(),
            attempts: Vec::new(),
            last_error: None,
            phase: Phase::Connecting,
        };

        futures::stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        })
        .boxed()
    }

    /// Messages for one attempt: the original conversation, plus the partial
    /// answer and a continuation instruction when failing over, fitted to the
    /// candidate's window.
    ///
    /// A continuation always carries the system message, the latest user
    /// turn and the partial answer whole; only older turns are dropped. When
    /// even those do not fit, the provider gets the original conversation
    /// and restarts the answer, and the repeated prefix is swallowed.
    fn prepare_payload(&self, ctx: &RequestContext, payload: &ChatPayload, emitted: &str, candidate: &Candidate) -> ChatPayload {
        let model = Some(ctx.model.as_str());
        let window = self.trimmer.effective_budget(candidate.context_tokens);

        let continued = if emitted.is_empty() {
            None
        } else {
            let seeded = self.continuation(&payload.messages, emitted, window, model);
            if seeded.is_none() {
                debug!(
                    request_id = %ctx.request_id,
                    provider = %candidate.id(),
                    window,
                    emitted = emitted.len(),
                    "partial answer does not fit provider window, restarting the response"
                );
            }
            seeded
        };

        let messages = match continued {
            Some(messages) => messages,
            None => self.fit(ctx, &payload.messages, candidate),
        };

        ChatPayload {
            messages,
            web_search: payload.web_search,
        }
    }

    /// The conversation followed by the partial answer and the continuation
    /// instruction, dropping the oldest turns between the system message and
    /// the latest user turn until it fits `window`.
    fn continuation(&self, messages: &[Message], emitted: &str, window: usize, model: Option<&str>) -> Option<Vec<Message>> {
        let tail = [Message::assistant(emitted), Message::user(CONTINUATION_PROMPT)];
        let (system, rest) = match messages.first() {
            Some(first) if first.is_system() => (Some(first), &messages[1..]),
            _ => (None, messages),
        };
        let (latest, earlier) = match rest.split_last() {
            Some((latest, earlier)) => (Some(latest), earlier),
            None => (None, rest),
        };

        let count = |message: &Message| self.counter.count_message(message, model);
        let pinned: usize = system.into_iter().chain(latest).chain(tail.iter()).map(&count).sum();
        let mut available = window.checked_sub(pinned)?;

        let mut kept = 0usize;
        for message in earlier.iter().rev() {
            let tokens = count(message);
            if tokens > available {
                break;
            }
            available -= tokens;
            kept += 1;
        }

        let mut out = Vec::with_capacity(kept + 4);
        out.extend(system.cloned());
        out.extend_from_slice(&earlier[earlier.len() - kept..]);
        out.extend(latest.cloned());
        out.extend(tail);
        Some(out)
    }

    /// The original conversation, trimmed if it exceeds the candidate window
    fn fit(&self, ctx: &RequestContext, messages: &[Message], candidate: &Candidate) -> Vec<Message> {
        let model = Some(ctx.model.as_str());
        if self.counter.count_messages(messages, model) <= candidate.context_tokens {
            return messages.to_vec();
        }
        let outcome = self
            .trimmer
            .trim(messages, candidate.context_tokens, self.counter.as_ref(), model);
        debug!(
            request_id = %ctx.request_id,
            provider = %candidate.id(),
            dropped = outcome.dropped,
            forced_truncated = outcome.forced_truncated,
            "stream prompt trimmed for provider window"
        );
        outcome.history
    }
}

enum Phase {
    Connecting,
    Streaming(ActiveAttempt),
    Done,
}

struct ActiveAttempt {
    provider: String,
    chunks: ChunkStream,
    started_at: DateTime<Utc>,
    start: Instant,
    /// Bytes of new text this provider contributed
    fresh: usize,
    /// Still checking whether the provider restarted from the beginning
    suppressing: bool,
    /// Output held back while it is still a prefix of what was emitted
    pending: String,
}

struct StreamState {
    controller: StreamingController,
    ctx: RequestContext,
    ordering: Vec<Candidate>,
    payload: ChatPayload,
    attempt: u32,
    emitted: String,
    attempts: Vec<AttemptRecord>,
    last_error: Option<ProviderError>,
    phase: Phase,
}

enum ChunkStep {
    Emit(String),
    Hold,
}

impl StreamState {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return None,
                Phase::Connecting => {
                    if let Some(event) = self.connect().await {
                        return Some(event);
                    }
                }
                Phase::Streaming(active) => {
                    if let Some(event) = self.pump(active).await {
                        return Some(event);
                    }
                }
            }
        }
    }

    /// Try to open a stream on the next candidate. Returns an event only
    /// when the request is over.
    async fn connect(&mut self) -> Option<StreamEvent> {
        let policy = self.controller.orchestrator.policy().clone();
        let max_attempts = policy.max_attempts.max(1);

        if self.ordering.is_empty() || self.attempt >= max_attempts {
            return Some(self.exhausted());
        }

        if let Some(last) = &self.last_error {
            let delay = policy.calculate_delay(self.attempt, last);
            if !delay.is_zero() {
                debug!(request_id = %self.ctx.request_id, delay_ms = delay.as_millis() as u64, "stream failover backoff");
                tokio::time::sleep(delay).await;
            }
        }

        let candidate = self.ordering[self.attempt as usize % self.ordering.len()].clone();
        self.attempt += 1;

        let payload = self
            .controller
            .prepare_payload(&self.ctx, &self.payload, &self.emitted, &candidate);
        let timeout = self.controller.orchestrator.timeout();
        let provider = candidate.id().to_string();
        let options = AttemptOptions::new(self.ctx.request_id, &provider, &self.ctx.model)
            .with_timeout(timeout);

        debug!(
            request_id = %self.ctx.request_id,
            provider = %provider,
            attempt = self.attempt,
            continuing = !self.emitted.is_empty(),
            "connecting stream"
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let opened = match tokio::time::timeout(timeout, self.controller.transport.stream_attempt(&options, &payload)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: provider.clone(),
                after: Some(timeout),
            }),
        };

        match opened {
            Ok(chunks) => {
                self.phase = Phase::Streaming(ActiveAttempt {
                    provider,
                    chunks,
                    started_at,
                    start,
                    fresh: 0,
                    suppressing: !self.emitted.is_empty(),
                    pending: String::new(),
                });
                None
            }
            Err(err) => self.fail(&provider, err, started_at, start),
        }
    }

    /// Pull the next chunk of the active attempt
    async fn pump(&mut self, mut active: ActiveAttempt) -> Option<StreamEvent> {
        let timeout = self.controller.orchestrator.timeout();
        match tokio::time::timeout(timeout, active.chunks.next()).await {
            Ok(Some(Ok(chunk))) => {
                let step = self.absorb(&mut active, chunk);
                self.phase = Phase::Streaming(active);
                match step {
                    ChunkStep::Emit(text) => Some(StreamEvent::Chunk(text)),
                    ChunkStep::Hold => None,
                }
            }
            Ok(Some(Err(err))) => {
                warn!(
                    request_id = %self.ctx.request_id,
                    provider = %active.provider,
                    emitted = self.emitted.len(),
                    error = %err,
                    "stream broke mid-response"
                );
                self.fail(&active.provider, err, active.started_at, active.start)
            }
            Ok(None) => {
                if active.fresh == 0 {
                    let err = ProviderError::invalid_response(&active.provider, "stream ended without new output");
                    return self.fail(&active.provider, err, active.started_at, active.start);
                }
                Some(self.finish(active))
            }
            Err(_) => {
                let err = ProviderError::Timeout {
                    provider: active.provider.clone(),
                    after: Some(timeout),
                };
                self.fail(&active.provider, err, active.started_at, active.start)
            }
        }
    }

    /// Apply restart suppression to a chunk and record what gets emitted
    fn absorb(&mut self, active: &mut ActiveAttempt, chunk: String) -> ChunkStep {
        let out = if active.suppressing {
            active.pending.push_str(&chunk);
            if self.emitted.starts_with(active.pending.as_str()) {
                return ChunkStep::Hold;
            }
            active.suppressing = false;
            let pending = std::mem::take(&mut active.pending);
            match pending.strip_prefix(self.emitted.as_str()) {
                Some(rest) => {
                    debug!(
                        request_id = %self.ctx.request_id,
                        provider = %active.provider,
                        swallowed = self.emitted.len(),
                        "provider restarted; repeated prefix swallowed"
                    );
                    rest.to_string()
                }
                None => pending,
            }
        } else {
            chunk
        };

        if out.is_empty() {
            return ChunkStep::Hold;
        }
        active.fresh += out.len();
        self.emitted.push_str(&out);
        ChunkStep::Emit(out)
    }

    fn fail(
        &mut self,
        provider: &str,
        err: ProviderError,
        started_at: DateTime<Utc>,
        start: Instant,
    ) -> Option<StreamEvent> {
        let registry = self.controller.orchestrator.registry();
        registry.record_failure(provider);
        self.attempts.push(AttemptRecord {
            provider: provider.to_string(),
            started_at,
            outcome: AttemptOutcome::Failed(err.clone()),
            latency: start.elapsed(),
        });
        warn!(
            request_id = %self.ctx.request_id,
            provider,
            attempt = self.attempt,
            class = %err.class(),
            error = %err,
            "stream attempt failed"
        );

        if !err.is_retryable() {
            error!(request_id = %self.ctx.request_id, provider, "fatal error, aborting stream");
            self.last_error = Some(err);
            return Some(self.exhausted());
        }

        self.last_error = Some(err);
        self.phase = Phase::Connecting;
        None
    }

    fn finish(&mut self, active: ActiveAttempt) -> StreamEvent {
        self.controller.orchestrator.registry().record_success(&active.provider);
        self.attempts.push(AttemptRecord {
            provider: active.provider.clone(),
            started_at: active.started_at,
            outcome: AttemptOutcome::Success,
            latency: active.start.elapsed(),
        });
        info!(
            request_id = %self.ctx.request_id,
            provider = %active.provider,
            attempts = self.attempts.len(),
            chars = self.emitted.chars().count(),
            "stream completed"
        );
        self.phase = Phase::Done;
        StreamEvent::Finished(StreamSummary {
            text: self.emitted.clone(),
            provider: active.provider,
            attempts: std::mem::take(&mut self.attempts),
        })
    }

    fn exhausted(&mut self) -> StreamEvent {
        error!(
            request_id = %self.ctx.request_id,
            attempts = self.attempts.len(),
            partial_chars = self.emitted.chars().count(),
            "stream attempts exhausted"
        );
        self.phase = Phase::Done;
        let err = ApiError::new(std::mem::take(&mut self.attempts), self.last_error.take())
            .with_partial_output(self.emitted.clone());
        StreamEvent::Failed(Error::Api(err))
    }
}
