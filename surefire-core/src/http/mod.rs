//! HTTP transport for OpenAI-compatible providers
//!
//! This module implements [`Transport`](crate::providers::Transport) over
//! reqwest, handling:
//! - Connection pooling and proxy configuration
//! - Per-endpoint base URLs and bearer keys
//! - Server-sent event parsing for streamed chat
//! - Error mapping and retry hints

pub mod client;
pub mod error;
pub mod wire;

pub use client::HttpTransport;
pub use error::{map_http_error, map_request_error};
