//! Failover Demo - retries, health-aware ordering and stream continuation
//!
//! Drives a client against an in-process transport where one provider
//! always fails and another cuts its stream short, so every resilience
//! path runs without network access.
//!
//! Run with: cargo run --example failover_demo

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use surefire_core::capabilities::{ModelEntry, ProviderEntry, StaticTable};
use surefire_core::protocol::{ChatPayload, Payload, Response};
use surefire_core::providers::{AttemptOptions, ChunkStream, DiscoveredProvider, ProviderError, Transport};
use surefire_core::{Client, ClientConfig, GenerateOptions};

/// `flaky` always fails, `choppy` drops its first stream, `steady` works
#[derive(Default)]
struct DemoTransport {
    choppy_streams: AtomicUsize,
}

#[async_trait]
impl Transport for DemoTransport {
    async fn attempt(&self, options: &AttemptOptions, payload: &Payload) -> Result<Response, ProviderError> {
        match options.provider.as_str() {
            "flaky" => Err(ProviderError::network("flaky", "connection reset by peer")),
            provider => {
                let turns = match payload {
                    Payload::Chat(chat) => chat.messages.len(),
                    _ => 0,
                };
                Ok(Response::Text(format!("{provider} answered a {turns}-message conversation")))
            }
        }
    }

    async fn stream_attempt(&self, options: &AttemptOptions, _payload: &ChatPayload) -> Result<ChunkStream, ProviderError> {
        let chunks: Vec<Result<String, ProviderError>> = match options.provider.as_str() {
            "flaky" => return Err(ProviderError::network("flaky", "connection refused")),
            "choppy" if self.choppy_streams.fetch_add(1, Ordering::SeqCst) == 0 => vec![
                Ok("Rust ownership means ".to_string()),
                Err(ProviderError::network("choppy", "stream interrupted")),
            ],
            _ => vec![
                Ok("every value has exactly one owner, ".to_string()),
                Ok("and the value is dropped when that owner goes out of scope.".to_string()),
            ],
        };
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn discover(&self) -> Result<Vec<DiscoveredProvider>, ProviderError> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    surefire_core::logging::init("info");

    println!("\n🚀 Surefire Demo - Failover & Stream Continuation\n");
    println!("=================================================\n");

    let table = StaticTable::empty().with_model(
        ModelEntry::new("demo-model")
            .context_tokens(16_000)
            .provider(ProviderEntry::new("flaky").stable())
            .provider(ProviderEntry::new("choppy").stable())
            .provider(ProviderEntry::new("steady")),
    );
    let config = ClientConfig {
        default_model: "demo-model".to_string(),
        retries: 4,
        retry_delay: 0.1,
        ..Default::default()
    };
    let client = Client::builder(config, Arc::new(DemoTransport::default()))
        .static_table(table)
        .build()?;

    // Example 1: a failing provider is skipped
    println!("📝 Example 1: Failover");
    println!("──────────────────────");
    let mut chat = client.new_chat().with_system_prompt("You are a concise Rust tutor.");
    let turn = chat.generate("What is a lifetime?", GenerateOptions::new()).await?;
    println!("  provider: {}", turn.provider);
    println!("  attempts: {}", turn.attempts.len());
    println!("  reply:    {}", turn.text);
    println!("  flaky failures so far: {}\n", client.health("flaky").consecutive_failures);

    // Example 2: the stream is resumed on another provider
    println!("📝 Example 2: Mid-stream Continuation");
    println!("─────────────────────────────────────");
    {
        let mut stream = chat.stream_generate("Explain ownership in one sentence.", GenerateOptions::new());
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            print!("{chunk}");
        }
    }
    println!("\n");

    // Example 3: the session remembers both turns
    println!("📝 Example 3: Conversation History");
    println!("──────────────────────────────────");
    for message in chat.history() {
        println!("  {:?}: {}", message.role, message.content);
    }

    println!("\n✅ Demo complete");
    Ok(())
}
