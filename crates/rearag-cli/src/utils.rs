//! Shared display helpers

use rearag_agent::{AgentEvent, StopReason};

/// Shorten `s` to at most `max` characters on one line, appending "..." if cut
pub fn preview(s: &str, max: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

pub fn stop_reason_str(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Finished => "finished",
        StopReason::IterationBudget => "iteration budget exhausted",
        StopReason::RetryBudget => "retry budget exhausted",
        StopReason::Cancelled => "cancelled",
    }
}

/// One progress line per agent event, `None` for events not worth showing
pub fn event_line(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::RunStart { question } => Some(format!("[question] {}", preview(question, 200))),
        AgentEvent::IterationStart { .. } => None,
        AgentEvent::PromptTruncated {
            tokens_before,
            tokens_after,
            dropped_messages,
        } => Some(format!(
            "[truncated prompt: ~{tokens_before} -> ~{tokens_after} tokens, {dropped_messages} messages dropped]"
        )),
        AgentEvent::ActionDispatched {
            step,
            thought,
            action,
            observation,
        } => {
            let mut line = format!("[step {step}] {}\n  action: {action}", preview(thought, 160));
            if let Some(obs) = observation {
                line.push_str(&format!("\n  observation: {}", preview(obs, 200)));
            }
            Some(line)
        }
        AgentEvent::Repeat {
            iteration,
            retries,
            reason,
        } => Some(format!(
            "[retry {retries} at iteration {iteration}] {}",
            preview(reason, 160)
        )),
        AgentEvent::RunEnd {
            stop_reason,
            iterations,
            retries,
            ..
        } => Some(format!(
            "[{}: {iterations} iterations, {retries} retries]",
            stop_reason_str(*stop_reason)
        )),
    }
}
