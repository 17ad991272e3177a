//! Keeping the agent prompt inside the model's context window
//!
//! Token counts are estimated (about four bytes per token) rather than
//! computed with the model tokenizer. When the rendered conversation is over
//! budget, the oldest turns after the question are dropped first, an
//! assistant turn together with the observation that answered it. If the
//! prompt is still too long with no history left, its oldest text is clipped.

use rearag_ai::{ChatTemplate, Message, Role};

/// Configuration for prompt truncation
#[derive(Debug, Clone)]
pub struct TruncationConfig {
    pub enabled: bool,
    /// Prompt budget in estimated tokens
    pub model_max_length: u32,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_max_length: 8192 - 2 - 1024,
        }
    }
}

/// What truncation did to a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationReport {
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub dropped_messages: usize,
    pub clipped: bool,
}

/// Estimate the token count of a text
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() / 4) as u32
}

/// Render `messages` with a generation prompt, shrinking it to fit the budget.
///
/// The system prompt, the question and the trailing generation slot are
/// never dropped.
pub fn fit_prompt(
    messages: &[Message],
    template: &dyn ChatTemplate,
    config: &TruncationConfig,
) -> (String, Option<TruncationReport>) {
    let prompt = template.render(messages, true);
    let tokens_before = estimate_tokens(&prompt);
    if !config.enabled || tokens_before <= config.model_max_length {
        return (prompt, None);
    }

    let head = messages
        .iter()
        .position(|m| m.role == Role::User)
        .map_or(0, |i| i + 1);
    let tail = match messages.last() {
        Some(last) if last.is_placeholder() => 1,
        _ => 0,
    };

    let mut kept = messages.to_vec();
    let mut dropped = 0;
    let mut prompt = prompt;
    while estimate_tokens(&prompt) > config.model_max_length && kept.len() > head + tail {
        let pair = kept.len() > head + tail + 1
            && kept[head].role == Role::Assistant
            && kept[head + 1].role == Role::Observation;
        let n = if pair { 2 } else { 1 };
        kept.drain(head..head + n);
        dropped += n;
        prompt = template.render(&kept, true);
    }

    let mut clipped = false;
    let budget = config.model_max_length as usize * 4;
    if prompt.len() > budget {
        let mut cut = prompt.len() - budget;
        while !prompt.is_char_boundary(cut) {
            cut += 1;
        }
        prompt = prompt.split_off(cut);
        clipped = true;
    }

    let report = TruncationReport {
        tokens_before,
        tokens_after: estimate_tokens(&prompt),
        dropped_messages: dropped,
        clipped,
    };
    (prompt, Some(report))
}
