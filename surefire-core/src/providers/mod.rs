//! Provider selection, health tracking, retries and streaming failover
//!
//! Everything here works against the [`Transport`] trait; nothing in this
//! module knows how a provider is actually reached.

pub mod error;
pub mod health;
pub mod retry;
pub mod selector;
pub mod streaming;
pub mod transport;

pub use error::{ContextOverflow, ErrorClass, ErrorMapper, ProviderError, ProviderResult};
pub use health::{HealthRegistry, HealthSnapshot, ProviderInfo};
pub use retry::{AttemptOutcome, AttemptRecord, RetryOrchestrator, RetryPolicy, Success};
pub use selector::{Candidate, ProviderSelector};
pub use streaming::{StreamEvent, StreamSummary, StreamingController, TextStream, CONTINUATION_PROMPT};
pub use transport::{AttemptOptions, ChunkStream, DiscoveredModel, DiscoveredProvider, Transport};
