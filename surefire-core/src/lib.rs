//! Surefire Core Library
//!
//! A resilience layer over unreliable AI completion backends. Requests are
//! routed to capable providers, retried with backoff across them, and
//! streamed with mid-stream failover that continues rather than restarts.
//!
//! ```no_run
//! use std::sync::Arc;
//! use surefire_core::{Client, ConfigBuilder, GenerateOptions, HttpTransport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigBuilder::new().file("surefire.yaml").build()?.into_config();
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let client = Client::new(config, transport)?;
//!
//! let mut chat = client.new_chat().with_system_prompt("Answer briefly.");
//! let turn = chat.generate("What is the capital of France?", GenerateOptions::new()).await?;
//! println!("{} (via {})", turn.text, turn.provider);
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod cleaner;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod logging;
pub mod protocol;
pub mod providers;
pub mod session;

pub use capabilities::{Feature, FeatureSet, ModelCatalog, ModelInfo, StaticTable};
pub use client::{Client, ClientBuilder, MediaOptions};
pub use config::{ClientConfig, ConfigBuilder, ConfigError, ConfigOverrides, ResolvedConfig};
pub use context::{CharRatioCounter, ContextTrimmer, TokenCounter};
pub use error::{ApiError, Error, Result};
pub use http::HttpTransport;
pub use protocol::{Attachment, Message, Role};
pub use providers::{ProviderError, RetryPolicy, Transport};
pub use session::{ChatSession, ChatTurn, GenerateOptions};

/// Returns the version of the Surefire Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
