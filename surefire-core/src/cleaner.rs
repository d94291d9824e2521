//! Post-processing of assistant text
//!
//! The programmatic cleaner strips common disclaimer boilerplate and
//! normalises whitespace. The AI cleaner runs an isolated completion with a
//! cleaning prompt and falls back to the programmatic cleaner on any failure.

use crate::client::Client;
use crate::protocol::Message;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub const CLEANER_SYSTEM_PROMPT: &str = "You are a text cleaning expert. Your task is to remove any \
provider-specific artifacts, ads, disclaimers, or metadata from the given text. \
Return only the clean, core message that the user requested. Do not add any \
of your own commentary or introductions. Just return the cleaned text.";

struct Patterns {
    disclaimers: Vec<Regex>,
    spaces: Regex,
    newlines: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let disclaimers = [
            r"(?is)as an ai language model,\s*i cannot.*",
            r"(?is)i am not able to.*",
            r"(?is)i'm just an ai and do not have.*",
            r"(?is)disclaimer:.*",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("disclaimer pattern is a valid regex"))
        .collect();

        Patterns {
            disclaimers,
            spaces: Regex::new(r"[ \t]{2,}").expect("space pattern is a valid regex"),
            newlines: Regex::new(r"\n{3,}").expect("newline pattern is a valid regex"),
        }
    })
}

/// Rule-based cleaning: removes disclaimer tails and collapses runs of
/// blanks and blank lines.
pub fn clean_programmatic(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let patterns = patterns();
    let mut cleaned = text.to_string();
    for pattern in &patterns.disclaimers {
        cleaned = pattern.replace_all(&cleaned, "").trim().to_string();
    }

    let cleaned = patterns.spaces.replace_all(&cleaned, " ");
    let cleaned = patterns.newlines.replace_all(&cleaned, "\n\n");
    cleaned.trim().to_string()
}

/// Clean `text` with an isolated completion on the client's default model.
///
/// Nothing is written to any session history.
pub async fn clean_with_ai(client: &Client, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let messages = vec![Message::system(CLEANER_SYSTEM_PROMPT), Message::user(text)];
    let model = client.config().default_model.clone();
    match client.complete(messages, &model).await {
        Ok(cleaned) => {
            debug!(before = text.len(), after = cleaned.len(), "response cleaned by model");
            cleaned
        }
        Err(e) => {
            warn!(error = %e, "AI response cleaning failed; falling back to programmatic cleaning");
            clean_programmatic(text)
        }
    }
}
