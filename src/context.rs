//! Context window budgeting and compaction.
//!
//! Token counts are a characters/4 heuristic, not a tokenizer.

use tracing::debug;

use crate::ai_sdk::{Message, Role};

const MESSAGE_OVERHEAD: usize = 4;
const MIN_COMPACTABLE: usize = 4;
const MIN_KEEP: usize = 6;
const KEEP_FRACTION: f64 = 0.3;
const PREVIEW_CHARS: usize = 150;

pub(crate) const COMPACTION_ACK: &str =
    "Understood. I have the context from our earlier conversation. How can I continue helping you?";

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn estimate_fragment_tokens(fragment: &str) -> usize {
    ((fragment.chars().count() as f64 / 4.0).round() as usize).max(1)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls()
        .iter()
        .map(|call| estimate_tokens(&call.function.name) + estimate_tokens(&call.function.arguments))
        .sum();
    MESSAGE_OVERHEAD + estimate_tokens(message.text()) + calls
}

pub fn count_context_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextBudget {
    pub max_context_tokens: usize,
    pub compact_threshold: f64,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_context_tokens: 32_768,
            compact_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    pub used: usize,
    pub max: usize,
    pub pct: usize,
}

impl ContextBudget {
    pub fn should_compact(&self, messages: &[Message]) -> bool {
        let used = count_context_tokens(messages) as f64;
        used >= self.max_context_tokens as f64 * self.compact_threshold
    }

    pub fn stats(&self, messages: &[Message]) -> ContextStats {
        let used = count_context_tokens(messages);
        let max = self.max_context_tokens;
        let pct = if max == 0 {
            100
        } else {
            ((used as f64 / max as f64) * 100.0).round() as usize
        };
        ContextStats { used, max, pct }
    }
}

/// Replaces everything between the system message and the recent tail with
/// a one-message summary plus an acknowledgement. Lossy.
pub fn compact_messages(messages: Vec<Message>) -> Vec<Message> {
    if messages.len() <= MIN_COMPACTABLE {
        return messages;
    }

    let has_system = messages.first().is_some_and(|m| m.role == Role::System);
    let start = usize::from(has_system);
    let keep = MIN_KEEP.max((messages.len() as f64 * KEEP_FRACTION).floor() as usize);
    let cutoff = messages.len().saturating_sub(keep);

    if cutoff <= start {
        return messages;
    }

    let older = &messages[start..cutoff];
    let summary: Vec<String> = older.iter().filter_map(summarize).collect();
    debug!(
        compressed = older.len(),
        kept = messages.len() - cutoff,
        "compacting transcript"
    );

    let summary_text = format!(
        "[Context compacted - earlier conversation summarized]\n\nPrevious conversation summary ({} messages compressed):\n{}",
        older.len(),
        summary.join("\n")
    );

    let mut messages = messages;
    let tail = messages.split_off(cutoff);
    let system = has_system.then(|| messages.swap_remove(0));

    let mut compacted = Vec::with_capacity(tail.len() + 3);
    compacted.extend(system);
    compacted.push(Message::user(summary_text));
    compacted.push(Message::assistant_text(COMPACTION_ACK));
    compacted.extend(tail);
    compacted
}

fn summarize(message: &Message) -> Option<String> {
    match message.role {
        Role::User => Some(format!("- User asked: {}", preview(message.text()))),
        Role::Assistant if !message.tool_calls().is_empty() => {
            let names: Vec<&str> = message.tool_calls().iter().map(|c| c.name()).collect();
            Some(format!("- Assistant used tools: {}", names.join(", ")))
        }
        Role::Assistant if !message.text().is_empty() => {
            Some(format!("- Assistant responded: {}", preview(message.text())))
        }
        _ => None,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_sdk::ToolCall;

    fn transcript(len: usize, with_system: bool) -> Vec<Message> {
        let mut messages = Vec::new();
        if with_system {
            messages.push(Message::system("You are a coding assistant."));
        }
        let mut i = 0;
        while messages.len() < len {
            let message = match i % 4 {
                0 => Message::user(format!("question {i}")),
                1 => Message::assistant(
                    String::new(),
                    vec![ToolCall::new(format!("call_{i}"), "read_file", r#"{"path":"a"}"#)],
                )
                .unwrap(),
                2 => Message::tool_result(format!("call_{}", i - 1), "file contents"),
                _ => Message::assistant_text(format!("answer {i}")),
            };
            messages.push(message);
            i += 1;
        }
        messages
    }

    #[test]
    fn estimates_round_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn fragment_estimate_is_at_least_one() {
        assert_eq!(estimate_fragment_tokens("a"), 1);
        assert_eq!(estimate_fragment_tokens("abcdef"), 2);
        assert_eq!(estimate_fragment_tokens("abcdefghij"), 3);
    }

    #[test]
    fn message_cost_includes_overhead_and_tool_calls() {
        assert_eq!(estimate_message_tokens(&Message::user("test")), 5);

        let call = Message::assistant(
            String::new(),
            vec![ToolCall::new("id", "read_file", r#"{"path":"a"}"#)],
        )
        .unwrap();
        // "read_file" = 9 chars -> 3, the arguments = 12 chars -> 3
        assert_eq!(estimate_message_tokens(&call), 4 + 3 + 3);
    }

    #[test]
    fn small_transcripts_are_untouched() {
        for len in 0..=4 {
            let messages = transcript(len, true);
            assert_eq!(compact_messages(messages.clone()), messages);
        }
        // Above four but nothing older than the six-message tail.
        let messages = transcript(7, true);
        assert_eq!(compact_messages(messages.clone()), messages);
    }

    #[test]
    fn keeps_system_and_exact_tail() {
        for (len, with_system) in [(12, true), (20, true), (40, false), (9, false)] {
            let messages = transcript(len, with_system);
            let keep = 6usize.max(len * 3 / 10);
            let compacted = compact_messages(messages.clone());

            let offset = usize::from(with_system);
            if with_system {
                assert_eq!(compacted[0], messages[0]);
            }
            assert_eq!(compacted[offset].role, Role::User);
            assert!(compacted[offset].text().starts_with("[Context compacted"));
            assert_eq!(compacted[offset + 1].text(), COMPACTION_ACK);
            assert_eq!(&compacted[offset + 2..], &messages[len - keep..]);
        }
    }

    #[test]
    fn summary_lines_skip_tool_results() {
        let long_question = "q".repeat(400);
        let mut messages = vec![
            Message::system("sys"),
            Message::user(long_question),
            Message::assistant(
                String::new(),
                vec![
                    ToolCall::new("a", "list_files", "{}"),
                    ToolCall::new("b", "read_file", "{}"),
                ],
            )
            .unwrap(),
            Message::tool_result("a", "SECRET TOOL OUTPUT"),
            Message::tool_result("b", "SECRET TOOL OUTPUT"),
            Message::assistant_text("Here is what I found"),
        ];
        messages.extend(transcript(6, false));

        let compacted = compact_messages(messages);
        let summary = compacted[1].text();

        assert!(summary.contains("(5 messages compressed)"));
        assert!(summary.contains(&format!("- User asked: {}\n", "q".repeat(150))));
        assert!(summary.contains("- Assistant used tools: list_files, read_file"));
        assert!(summary.contains("- Assistant responded: Here is what I found"));
        assert!(!summary.contains("SECRET"));
    }

    #[test]
    fn threshold_is_inclusive() {
        let messages = vec![Message::user("a".repeat(24))]; // 4 + 6 = 10 tokens
        let budget = ContextBudget {
            max_context_tokens: 20,
            compact_threshold: 0.5,
        };
        assert!(budget.should_compact(&messages));

        let budget = ContextBudget {
            max_context_tokens: 21,
            compact_threshold: 0.5,
        };
        assert!(!budget.should_compact(&messages));
    }

    #[test]
    fn should_compact_is_monotonic_in_size() {
        let budget = ContextBudget {
            max_context_tokens: 100,
            compact_threshold: 0.5,
        };
        let mut messages = transcript(3, true);
        while !budget.should_compact(&messages) {
            messages.push(Message::user("padding padding"));
        }
        for extra in ["x", "more text", ""] {
            messages.push(Message::assistant_text(extra));
            assert!(budget.should_compact(&messages));
        }
    }

    #[test]
    fn stats_report_percentage() {
        let budget = ContextBudget {
            max_context_tokens: 100,
            compact_threshold: 0.75,
        };
        let stats = budget.stats(&[Message::user("a".repeat(36))]); // 4 + 9
        assert_eq!(stats, ContextStats { used: 13, max: 100, pct: 13 });
    }
}
