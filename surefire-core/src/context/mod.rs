//! Context-window management: token counting and history trimming

mod tokens;
mod trimmer;

pub use tokens::{CharRatioCounter, SharedTokenCounter, TokenCounter};
pub use trimmer::{ContextTrimmer, TrimOutcome, ELISION_MARKER};
