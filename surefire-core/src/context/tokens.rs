use crate::protocol::Message;
use std::sync::Arc;

/// Counts (or estimates) the tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str, model: Option<&str>) -> usize;

    fn count_message(&self, message: &Message, model: Option<&str>) -> usize {
        self.count(&message.content, model)
    }

    fn count_messages(&self, messages: &[Message], model: Option<&str>) -> usize {
        messages
            .iter()
            .map(|m| self.count_message(m, model))
            .sum()
    }
}

/// Estimates tokens by dividing the character count by a fixed ratio.
#[derive(Debug, Clone)]
pub struct CharRatioCounter {
    chars_per_token: usize,
}

impl CharRatioCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }
}

impl Default for CharRatioCounter {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenCounter for CharRatioCounter {
    fn count(&self, text: &str, _model: Option<&str>) -> usize {
        if text.is_empty() {
            return 0;
        }

        let chars = text.chars().count();
        chars.div_ceil(self.chars_per_token).max(1)
    }
}

/// Shared token counter handle.
pub type SharedTokenCounter = Arc<dyn TokenCounter>;
