//! Stateful conversations
//!
//! A [`ChatSession`] owns its history. Every turn works on a copy: the user
//! message and the assistant reply are committed together once the request
//! succeeds, so a failed or cancelled turn leaves the history untouched.

use crate::capabilities::{Feature, FeatureSet};
use crate::cleaner;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::protocol::{find_misplaced_system, Attachment, ChatPayload, Message, Payload, RequestContext, Response};
use crate::providers::{AttemptRecord, Candidate, ContextOverflow, ProviderError, StreamEvent};
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Lowest token budget adaptive reduction will go to
pub const MIN_CONTEXT_BUDGET: usize = 500;

/// Safety margin subtracted from a limit reported by a provider
const OVERFLOW_MARGIN: usize = 500;

/// Per-call knobs for [`ChatSession::generate`] and
/// [`ChatSession::stream_generate`]
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub web_search: bool,
    pub attachments: Vec<Attachment>,
    /// Replaces the configured preferred providers for this call
    pub preferred_providers: Option<Vec<String>>,
    /// Replaces the configured per-attempt timeout for this call
    pub timeout: Option<Duration>,
    /// Overrides `use_ai_cleaner` for this call
    pub clean: Option<bool>,
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
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

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = Some(clean);
        self
    }
}

/// Result of one successful [`ChatSession::generate`] call
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub text: String,
    /// The committed history, ending with the assistant reply
    pub history: Vec<Message>,
    pub provider: String,
    pub attempts: Vec<AttemptRecord>,
    /// The user message had to be cut to fit the context window
    pub forced_truncation: bool,
}

/// A conversation with one model
pub struct ChatSession {
    client: Client,
    model: String,
    history: Vec<Message>,
}

impl ChatSession {
    pub(crate) fn new(client: Client, model: String) -> Self {
        Self {
            client,
            model,
            history: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets or replaces the leading system message
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        match self.history.first_mut() {
            Some(first) if first.is_system() => first.content = prompt.into(),
            _ => self.history.insert(0, Message::system(prompt)),
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Replace the whole history. A system message may only appear first.
    pub fn set_history(&mut self, history: Vec<Message>) -> Result<()> {
        if let Some(index) = find_misplaced_system(&history) {
            return Err(Error::InvalidHistory {
                message: format!("system message at position {index}; it must be the first message"),
            });
        }
        self.history = history;
        Ok(())
    }

    pub fn clear(&mut self, keep_system: bool) {
        let system = if keep_system {
            self.history.first().filter(|m| m.is_system()).cloned()
        } else {
            None
        };
        self.history.clear();
        self.history.extend(system);
    }

    /// Send `message` and wait for the full reply.
    ///
    /// The history is trimmed per attempt to the smallest of
    /// `max_history_tokens`, the candidate's context window and the adaptive
    /// budget, which shrinks whenever a provider reports a context overflow.
    pub async fn generate(&mut self, message: impl Into<String>, options: GenerateOptions) -> Result<ChatTurn> {
        let user = user_message(message, &options);
        let (ctx, ordering, working) = self.prepare(user, &options).await?;

        let inner = &self.client.inner;
        let orchestrator = match options.timeout {
            Some(timeout) => inner.orchestrator.clone().with_timeout(timeout),
            None => inner.orchestrator.clone(),
        };

        let max_history = inner.config.max_history_tokens;
        let adaptive = AtomicUsize::new(max_history);
        let adaptive = &adaptive;
        let working = &working;
        let transport = &inner.transport;
        let trimmer = &inner.trimmer;
        let counter = inner.counter.as_ref();
        let model = self.model.as_str();
        let web_search = options.web_search;

        let success = orchestrator
            .execute(&ctx, &ordering, |candidate: Candidate, attempt| async move {
                let budget = adaptive
                    .load(Ordering::SeqCst)
                    .min(candidate.context_tokens)
                    .min(max_history);
                let outcome = trimmer.trim(working, budget, counter, Some(model));
                let payload = Payload::Chat(ChatPayload {
                    messages: outcome.history.clone(),
                    web_search,
                });

                match transport.attempt(&attempt, &payload).await {
                    Ok(Response::Text(text)) if !text.trim().is_empty() => Ok((text, outcome)),
                    Ok(Response::Text(_)) => Err(ProviderError::invalid_response(&attempt.provider, "empty response")),
                    Ok(_) => Err(ProviderError::invalid_response(&attempt.provider, "expected a text response")),
                    Err(err) => {
                        if let Some(overflow) = err.context_overflow() {
                            lower_budget(adaptive, overflow, budget);
                        }
                        Err(err)
                    }
                }
            })
            .await?;

        let (raw, outcome) = success.value;
        let clean = options.clean.unwrap_or(inner.config.use_ai_cleaner);
        let text = if clean {
            cleaner::clean_with_ai(&self.client, &raw).await
        } else {
            raw
        };

        let mut history = outcome.history;
        history.push(Message::assistant(text.clone()));
        self.history = history.clone();

        Ok(ChatTurn {
            text,
            history,
            provider: success.provider,
            attempts: success.attempts,
            forced_truncation: outcome.forced_truncated,
        })
    }

    /// Send `message` and stream the reply.
    ///
    /// The user message and the reply are committed when the stream ends:
    /// the whole reply on success, the partial reply when every provider
    /// failed after producing some text. Dropping the stream early commits
    /// nothing. Chunks reach the caller as produced; with cleaning enabled
    /// only the committed reply is cleaned.
    pub fn stream_generate(
        &mut self,
        message: impl Into<String>,
        options: GenerateOptions,
    ) -> BoxStream<'_, Result<String>> {
        let user = user_message(message, &options);
        let start = PendingStream::Start {
            session: self,
            user,
            options,
        };
        futures::stream::unfold(start, |state| state.advance()).boxed()
    }

    /// Refresh the catalog, select providers and build the working copy
    async fn prepare(
        &self,
        user: Message,
        options: &GenerateOptions,
    ) -> Result<(RequestContext, Vec<Candidate>, Vec<Message>)> {
        let inner = &self.client.inner;
        inner.catalog.refresh_if_stale(inner.transport.as_ref()).await;

        let features = required_features(options);
        let preferred = options
            .preferred_providers
            .as_deref()
            .unwrap_or(&inner.config.preferred_providers);
        let ordering = inner.selector.select(&self.model, &features, preferred)?;

        let mut working = self.history.clone();
        working.push(user);

        let budget = inner.config.max_history_tokens;
        let initial = inner
            .trimmer
            .trim(&working, budget, inner.counter.as_ref(), Some(&self.model));
        let ctx = RequestContext::new(self.model.clone(), features)
            .with_history(initial.history, budget)
            .with_attachments(options.attachments.clone());

        debug!(
            request_id = %ctx.request_id,
            model = %self.model,
            candidates = ordering.len(),
            history = ctx.history.len(),
            "turn prepared"
        );
        Ok((ctx, ordering, working))
    }

    fn commit(&mut self, mut history: Vec<Message>, reply: String) {
        history.push(Message::assistant(reply));
        self.history = history;
    }
}

fn user_message(message: impl Into<String>, options: &GenerateOptions) -> Message {
    options
        .attachments
        .iter()
        .cloned()
        .fold(Message::user(message), Message::with_attachment)
}

fn required_features(options: &GenerateOptions) -> FeatureSet {
    let mut features = FeatureSet::chat();
    if options.web_search {
        features.insert(Feature::WebSearch);
    }
    features.extend(options.attachments.iter().map(Attachment::required_feature));
    features
}

/// Shrink the adaptive budget after a context overflow. Never raises it.
fn lower_budget(adaptive: &AtomicUsize, overflow: ContextOverflow, used: usize) {
    let lowered = match overflow {
        ContextOverflow::Limit(limit) => limit.saturating_sub(OVERFLOW_MARGIN),
        ContextOverflow::Unspecified => (used as f64 * 0.8) as usize,
    }
    .max(MIN_CONTEXT_BUDGET);
    let previous = adaptive.fetch_min(lowered, Ordering::SeqCst);
    if lowered < previous {
        info!(previous, lowered, "context budget reduced after overflow");
    }
}

enum PendingStream<'a> {
    Start {
        session: &'a mut ChatSession,
        user: Message,
        options: GenerateOptions,
    },
    Running {
        session: &'a mut ChatSession,
        history: Vec<Message>,
        clean: bool,
        events: BoxStream<'static, StreamEvent>,
    },
    Done,
}

impl<'a> PendingStream<'a> {
    async fn advance(self) -> Option<(Result<String>, Self)> {
        let mut state = self;
        loop {
            state = match state {
                PendingStream::Done => return None,
                PendingStream::Start { session, user, options } => {
                    let (ctx, ordering, _) = match session.prepare(user, &options).await {
                        Ok(prepared) => prepared,
                        Err(err) => return Some((Err(err), PendingStream::Done)),
                    };
                    let inner = &session.client.inner;
                    let orchestrator = match options.timeout {
                        Some(timeout) => inner.orchestrator.clone().with_timeout(timeout),
                        None => inner.orchestrator.clone(),
                    };
                    let clean = options.clean.unwrap_or(inner.config.use_ai_cleaner);
                    let history = ctx.history.clone();
                    let payload = ChatPayload {
                        messages: ctx.history.clone(),
                        web_search: options.web_search,
                    };
                    let events = session
                        .client
                        .streaming_controller(orchestrator)
                        .events(ctx.streaming(true), ordering, payload);
                    PendingStream::Running {
                        session,
                        history,
                        clean,
                        events,
                    }
                }
                PendingStream::Running {
                    session,
                    history,
                    clean,
                    mut events,
                } => match events.next().await {
                    Some(StreamEvent::Chunk(text)) => {
                        return Some((
                            Ok(text),
                            PendingStream::Running {
                                session,
                                history,
                                clean,
                                events,
                            },
                        ))
                    }
                    Some(StreamEvent::Finished(summary)) => {
                        let text = if clean {
                            cleaner::clean_with_ai(&session.client, &summary.text).await
                        } else {
                            summary.text
                        };
                        session.commit(history, text);
                        return None;
                    }
                    Some(StreamEvent::Failed(err)) => {
                        if let Some(partial) = err.partial_output() {
                            session.commit(history, partial.to_string());
                        }
                        return Some((Err(err), PendingStream::Done));
                    }
                    None => return None,
                },
            };
        }
    }
}
