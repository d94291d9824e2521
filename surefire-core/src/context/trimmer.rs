//! History trimming against a token budget

use super::tokens::TokenCounter;
use crate::protocol::Message;
use tracing::{debug, warn};

/// Inserted where the middle of a force-truncated message was cut
pub const ELISION_MARKER: &str = "\n[...]\n";

/// Result of trimming a conversation history
#[derive(Debug, Clone, PartialEq)]
pub struct TrimOutcome {
    pub history: Vec<Message>,
    /// The most recent message had to be cut to fit
    pub forced_truncated: bool,
    /// Number of older messages dropped
    pub dropped: usize,
}

/// Fits a history into a token budget by dropping the oldest messages.
///
/// The system message is always kept whole and message order never
/// changes. When not even the newest message fits next to the system
/// message, its middle is cut out instead.
#[derive(Debug, Clone)]
pub struct ContextTrimmer {
    reduction_factor: f64,
    head_fraction: f64,
}

impl Default for ContextTrimmer {
    fn default() -> Self {
        Self::new(0.7, 0.5)
    }
}

impl ContextTrimmer {
    /// `reduction_factor` in (0, 1] scales the budget; above 1 it caps the
    /// number of kept messages instead.
    pub fn new(reduction_factor: f64, head_fraction: f64) -> Self {
        Self {
            reduction_factor: if reduction_factor.is_finite() && reduction_factor > 0.0 {
                reduction_factor
            } else {
                1.0
            },
            head_fraction: head_fraction.clamp(0.0, 1.0),
        }
    }

    /// Tokens actually available for history under `budget`
    pub fn effective_budget(&self, budget: usize) -> usize {
        if self.reduction_factor <= 1.0 {
            (budget as f64 * self.reduction_factor).floor() as usize
        } else {
            budget
        }
    }

    fn max_messages(&self) -> Option<usize> {
        if self.reduction_factor > 1.0 {
            Some((self.reduction_factor.floor() as usize).max(1))
        } else {
            None
        }
    }

    pub fn trim(
        &self,
        history: &[Message],
        budget: usize,
        counter: &dyn TokenCounter,
        model: Option<&str>,
    ) -> TrimOutcome {
        let (system, rest) = match history.first() {
            Some(first) if first.is_system() => (Some(first), &history[1..]),
            _ => (None, history),
        };

        if rest.is_empty() {
            return TrimOutcome {
                history: history.to_vec(),
                forced_truncated: false,
                dropped: 0,
            };
        }

        let effective = self.effective_budget(budget);
        let system_tokens = system.map(|m| counter.count_message(m, model)).unwrap_or(0);
        let available = effective.saturating_sub(system_tokens);
        let max_messages = self.max_messages().unwrap_or(usize::MAX);

        let mut used = 0usize;
        let mut kept = 0usize;
        for message in rest.iter().rev() {
            if kept >= max_messages {
                break;
            }
            let tokens = counter.count_message(message, model);
            if used + tokens > available {
                break;
            }
            used += tokens;
            kept += 1;
        }

        let mut trimmed = Vec::with_capacity(kept + 1);
        if let Some(system) = system {
            trimmed.push(system.clone());
        }

        let mut forced_truncated = false;
        if kept == 0 {
            // Even the newest message alone does not fit.
            let newest = &rest[rest.len() - 1];
            let mut cut = newest.clone();
            cut.content = self.truncate_middle(&newest.content, available, counter, model);
            warn!(
                budget,
                available,
                original_tokens = counter.count_message(newest, model),
                "most recent message truncated to fit the context window"
            );
            trimmed.push(cut);
            kept = 1;
            forced_truncated = true;
        } else {
            trimmed.extend_from_slice(&rest[rest.len() - kept..]);
        }

        let dropped = rest.len() - kept;
        if dropped > 0 {
            debug!(dropped, kept, budget, effective, "trimmed conversation history");
        }

        TrimOutcome {
            history: trimmed,
            forced_truncated,
            dropped,
        }
    }

    /// Keep a head and tail window of `text` joined by [`ELISION_MARKER`],
    /// as large as fits in `limit` tokens.
    pub fn truncate_middle(
        &self,
        text: &str,
        limit: usize,
        counter: &dyn TokenCounter,
        model: Option<&str>,
    ) -> String {
        if counter.count(text, model) <= limit {
            return text.to_string();
        }

        let chars: Vec<char> = text.chars().collect();
        let mut low = 0usize;
        let mut high = chars.len();
        let mut best = self.window(&chars, 0);

        while low <= high {
            let keep = low + (high - low) / 2;
            let candidate = self.window(&chars, keep);
            if counter.count(&candidate, model) <= limit {
                best = candidate;
                low = keep + 1;
            } else if keep == 0 {
                break;
            } else {
                high = keep - 1;
            }
        }

        best
    }

    fn window(&self, chars: &[char], keep: usize) -> String {
        let keep = keep.min(chars.len());
        let head = ((keep as f64) * self.head_fraction).round() as usize;
        let head = head.min(keep);
        let tail = keep - head;

        let mut out: String = chars[..head].iter().collect();
        out.push_str(ELISION_MARKER);
        out.extend(chars[chars.len() - tail..].iter());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CharRatioCounter;

    /// One token per character keeps the arithmetic obvious.
    fn counter() -> CharRatioCounter {
        CharRatioCounter::new(1)
    }

    fn full_budget() -> ContextTrimmer {
        ContextTrimmer::new(1.0, 0.5)
    }

    #[test]
    fn test_fitting_history_is_untouched() {
        let history = vec![Message::system("sys"), Message::user("hello"), Message::assistant("hi")];
        let outcome = full_budget().trim(&history, 100, &counter(), None);
        assert_eq!(outcome.history, history);
        assert_eq!(outcome.dropped, 0);
        assert!(!outcome.forced_truncated);
    }

    #[test]
    fn test_drops_oldest_and_keeps_system() {
        let history = vec![
            Message::system("sys"),
            Message::user("aaaaaaaaaa"),
            Message::assistant("bbbbbbbbbb"),
            Message::user("cccccccccc"),
        ];
        // 3 for system + 20 for the two newest
        let outcome = full_budget().trim(&history, 23, &counter(), None);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.history.len(), 3);
        assert!(outcome.history[0].is_system());
        assert_eq!(outcome.history[1].content, "bbbbbbbbbb");
        assert_eq!(outcome.history[2].content, "cccccccccc");
    }

    #[test]
    fn test_reduction_factor_reserves_headroom() {
        let trimmer = ContextTrimmer::new(0.5, 0.5);
        assert_eq!(trimmer.effective_budget(100), 50);

        let history = vec![Message::user("a".repeat(30)), Message::user("b".repeat(30))];
        let outcome = trimmer.trim(&history, 100, &counter(), None);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.history[0].content, "b".repeat(30));
    }

    #[test]
    fn test_factor_above_one_keeps_last_n_messages() {
        let trimmer = ContextTrimmer::new(2.0, 0.5);
        let history = vec![
            Message::system("s"),
            Message::user("1"),
            Message::assistant("2"),
            Message::user("3"),
        ];
        let outcome = trimmer.trim(&history, 1000, &counter(), None);
        let contents: Vec<&str> = outcome.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["s", "2", "3"]);
        assert_eq!(outcome.dropped, 1);
    }

    #[test]
    fn test_forced_truncation_keeps_head_and_tail() {
        let history = vec![Message::system("sys"), Message::user(format!("{}{}", "h".repeat(50), "t".repeat(50)))];
        let outcome = full_budget().trim(&history, 40, &counter(), None);

        assert!(outcome.forced_truncated);
        assert_eq!(outcome.dropped, 0);
        let content = &outcome.history[1].content;
        assert!(content.starts_with('h'));
        assert!(content.ends_with('t'));
        assert!(content.contains(ELISION_MARKER));
        assert!(content.chars().count() <= 37);
    }

    #[test]
    fn test_trim_is_idempotent() {
        let history = vec![
            Message::system("sys"),
            Message::user("x".repeat(40)),
            Message::assistant("y".repeat(40)),
            Message::user("z".repeat(200)),
        ];
        let trimmer = ContextTrimmer::new(0.7, 0.5);
        let once = trimmer.trim(&history, 100, &counter(), None);
        let twice = trimmer.trim(&once.history, 100, &counter(), None);
        assert_eq!(once.history, twice.history);
        let larger = trimmer.trim(&once.history, 500, &counter(), None);
        assert_eq!(once.history, larger.history);
    }

    #[test]
    fn test_oversized_system_message_is_kept_whole() {
        let system = Message::system("s".repeat(100));
        let history = vec![system.clone(), Message::user("question")];
        let outcome = full_budget().trim(&history, 10, &counter(), None);
        assert_eq!(outcome.history[0], system);
        assert!(outcome.forced_truncated);
        assert_eq!(outcome.history[1].content, ELISION_MARKER);
    }

    #[test]
    fn test_empty_history() {
        let outcome = full_budget().trim(&[], 10, &counter(), None);
        assert!(outcome.history.is_empty());
    }
}
