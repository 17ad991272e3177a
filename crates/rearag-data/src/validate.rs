//! Structural and answer checks for constructed traces
//!
//! A trace is kept for training only if it reads as a well-formed reasoning
//! process: numbered steps in order, every search answered by an observation,
//! ending in a `finish` whose answer overlaps the ground truth.

use std::fmt;

use serde::Serialize;

use rearag_agent::parse::{RawStep, parse_reasoning_steps};
use rearag_agent::{Action, ActionKind};
use rearag_ai::{Message, Role};

use crate::metrics::qa_f1_score;
use crate::store::GroundTruth;

/// Why a trace was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    /// The record has no conversation at all
    NoConversation,
    Empty,
    FirstNotUser,
    MissingReasoning { index: usize },
    NonIntegerStep { number: String, index: usize },
    StepOutOfOrder { expected: u32, got: u32, index: usize },
    MalformedAction { index: usize, reason: String },
    MissingObservation { found: String, index: usize },
    ObservationWithoutSearch { found: Option<ActionKind>, index: usize },
    UnexpectedUser { index: usize },
    UnknownRole { role: String, index: usize },
    LastNotAssistant,
    LastNotFinish,
    Incorrect,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConversation => write!(f, "Empty conversation"),
            Self::Empty => write!(f, "Conversation is empty."),
            Self::FirstNotUser => write!(f, "First conversation must be from user."),
            Self::MissingReasoning { index } => {
                write!(f, "Assistant entry at index {index} missing reasoning or action.")
            }
            Self::NonIntegerStep { number, index } => {
                write!(f, "Thought number '{number}' at index {index} is not an integer.")
            }
            Self::StepOutOfOrder {
                expected,
                got,
                index,
            } => write!(
                f,
                "Thought number out of order. Expected {expected}, got {got} at index {index}."
            ),
            Self::MalformedAction { index, reason } => {
                write!(f, "Assistant action at index {index} is invalid: {reason}")
            }
            Self::MissingObservation { found, index } => write!(
                f,
                "Expected 'observation' after assistant action, but found '{found}' at index {index}."
            ),
            Self::ObservationWithoutSearch { found, index } => write!(
                f,
                "Expected 'search' action before 'observation' action, but found '{}' at index {index}.",
                found.map_or("none", |k| k.as_str())
            ),
            Self::UnexpectedUser { index } => write!(
                f,
                "Expected 'observation' after an assistant action (not reflect), but found 'user' at index {index}."
            ),
            Self::UnknownRole { role, index } => {
                write!(f, "Unknown role '{role}' at index {index}.")
            }
            Self::LastNotAssistant => {
                write!(f, "Last conversation entry must be from 'assistant'.")
            }
            Self::LastNotFinish => write!(f, "Last assistant action must be 'finish'."),
            Self::Incorrect => write!(f, "Prediction is incorrect."),
        }
    }
}

/// Result of validating one trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub valid: bool,
    pub reason: String,
    /// F1 of the final answer, when the trace got far enough to be scored
    pub score: Option<f64>,
}

impl Verdict {
    fn pass(score: f64) -> Self {
        Self {
            valid: true,
            reason: "Conversation is valid.".into(),
            score: Some(score),
        }
    }

    pub fn fail(failure: ValidationFailure) -> Self {
        let score = matches!(failure, ValidationFailure::Incorrect).then_some(0.0);
        Self {
            valid: false,
            reason: failure.to_string(),
            score,
        }
    }
}

/// A conversation entry after assistant turns are split into single steps
enum Entry {
    Step(RawStep),
    Turn(Role),
}

impl Entry {
    fn role_name(&self) -> &str {
        match self {
            Entry::Step(_) => "assistant",
            Entry::Turn(role) => role.as_str(),
        }
    }
}

fn entries(conversation: &[Message]) -> Vec<Entry> {
    let mut out = Vec::new();
    for msg in conversation {
        match msg.role {
            Role::System => {}
            Role::Assistant => {
                let steps = parse_reasoning_steps(&msg.content);
                if steps.is_empty() {
                    out.push(Entry::Step(RawStep::default()));
                } else {
                    out.extend(steps.into_iter().map(Entry::Step));
                }
            }
            ref role => out.push(Entry::Turn(role.clone())),
        }
    }
    out
}

/// Validate a trace against its ground-truth answers
pub fn validate_trace(conversation: &[Message], ground_truth: &GroundTruth) -> Verdict {
    match check(conversation, ground_truth) {
        Ok(score) => Verdict::pass(score),
        Err(failure) => Verdict::fail(failure),
    }
}

fn check(conversation: &[Message], ground_truth: &GroundTruth) -> Result<f64, ValidationFailure> {
    let entries = entries(conversation);
    let Some(first) = entries.first() else {
        return Err(ValidationFailure::Empty);
    };
    if !matches!(first, Entry::Turn(Role::User)) {
        return Err(ValidationFailure::FirstNotUser);
    }

    let mut expected = 1u32;
    let mut prev_action: Option<ActionKind> = None;
    let mut last_action: Option<Action> = None;

    for (index, entry) in entries.iter().enumerate() {
        match entry {
            Entry::Step(step) => {
                if let Some(number) = &step.bad_number {
                    return Err(ValidationFailure::NonIntegerStep {
                        number: number.clone(),
                        index,
                    });
                }
                let (Some(number), Some(action_text)) = (step.number, step.action.as_deref())
                else {
                    return Err(ValidationFailure::MissingReasoning { index });
                };
                if action_text.trim().is_empty() {
                    return Err(ValidationFailure::MissingReasoning { index });
                }
                if number != expected {
                    return Err(ValidationFailure::StepOutOfOrder {
                        expected,
                        got: number,
                        index,
                    });
                }
                expected += 1;

                let action =
                    Action::parse(action_text).map_err(|e| ValidationFailure::MalformedAction {
                        index,
                        reason: e.to_string(),
                    })?;
                let kind = action.kind();
                if kind != ActionKind::Reflect {
                    if let Some(next) = entries.get(index + 1) {
                        if !matches!(next, Entry::Turn(Role::Observation)) {
                            return Err(ValidationFailure::MissingObservation {
                                found: next.role_name().to_string(),
                                index: index + 1,
                            });
                        }
                    }
                }
                prev_action = Some(kind);
                last_action = Some(action);
            }
            Entry::Turn(Role::Observation) => {
                if prev_action != Some(ActionKind::Search) {
                    return Err(ValidationFailure::ObservationWithoutSearch {
                        found: prev_action,
                        index,
                    });
                }
                prev_action = None;
            }
            Entry::Turn(Role::User) => {
                if index != 0 {
                    return Err(ValidationFailure::UnexpectedUser { index });
                }
                prev_action = None;
            }
            Entry::Turn(role) => {
                return Err(ValidationFailure::UnknownRole {
                    role: role.as_str().to_string(),
                    index,
                });
            }
        }
    }

    let answer = match (entries.last(), last_action) {
        (Some(Entry::Step(_)), Some(Action::Finish { answer })) => answer,
        (Some(Entry::Step(_)), _) => return Err(ValidationFailure::LastNotFinish),
        _ => return Err(ValidationFailure::LastNotAssistant),
    };
    let score = qa_f1_score(ground_truth, &answer);
    if score == 0.0 {
        return Err(ValidationFailure::Incorrect);
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: u32, action: &str) -> Message {
        Message::assistant(format!("Thought {n}: thinking\nAction {n}: \n```\n{action}\n```"))
    }

    fn search(n: u32) -> Message {
        step(n, r#"{"function": "search", "parameters": {"query": "where?"}}"#)
    }

    fn finish(n: u32, answer: &str) -> Message {
        step(
            n,
            &format!(r#"{{"function": "finish", "parameters": {{"answer": "{answer}"}}}}"#),
        )
    }

    fn gt() -> GroundTruth {
        GroundTruth::One("Tucson".into())
    }

    fn reason(conv: &[Message]) -> String {
        validate_trace(conv, &gt()).reason
    }

    #[test]
    fn test_minimal_valid_trace() {
        let conv = vec![
            Message::system("sys"),
            Message::user("Question: q"),
            search(1),
            Message::observation("Arizona"),
            finish(2, "Tucson, Arizona"),
        ];
        let verdict = validate_trace(&conv, &gt());
        assert!(verdict.valid, "{}", verdict.reason);
        assert_eq!(verdict.reason, "Conversation is valid.");
        assert!(verdict.score.unwrap() > 0.0);
    }

    #[test]
    fn test_zero_overlap_is_incorrect() {
        let conv = vec![Message::user("q"), finish(1, "Phoenix")];
        let verdict = validate_trace(&conv, &gt());
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, "Prediction is incorrect.");
        assert_eq!(verdict.score, Some(0.0));
    }

    #[test]
    fn test_empty() {
        assert_eq!(reason(&[]), "Conversation is empty.");
        assert_eq!(reason(&[Message::system("only system")]), "Conversation is empty.");
    }

    #[test]
    fn test_first_not_user() {
        assert_eq!(reason(&[finish(1, "Tucson")]), "First conversation must be from user.");
    }

    #[test]
    fn test_steps_out_of_order() {
        let conv = vec![
            Message::user("q"),
            search(1),
            Message::observation("o"),
            finish(3, "Tucson"),
        ];
        assert_eq!(
            reason(&conv),
            "Thought number out of order. Expected 2, got 3 at index 3."
        );
    }

    #[test]
    fn test_search_needs_observation() {
        let conv = vec![Message::user("q"), search(1), finish(2, "Tucson")];
        assert_eq!(
            reason(&conv),
            "Expected 'observation' after assistant action, but found 'assistant' at index 2."
        );
    }

    #[test]
    fn test_combined_assistant_turn_is_split() {
        let combined = Message::assistant(format!("{}\n{}", search(1).content, search(2).content));
        let conv = vec![Message::user("q"), combined];
        assert_eq!(
            reason(&conv),
            "Expected 'observation' after assistant action, but found 'assistant' at index 2."
        );
    }

    #[test]
    fn test_must_end_in_finish() {
        let conv = vec![Message::user("q"), search(1), Message::observation("o")];
        assert_eq!(reason(&conv), "Last conversation entry must be from 'assistant'.");

        let conv = vec![
            Message::user("q"),
            search(1),
            Message::observation("o"),
            step(2, r#"{"function": "reflect"}"#),
        ];
        assert_eq!(reason(&conv), "Last assistant action must be 'finish'.");
    }

    #[test]
    fn test_reflect_needs_no_observation() {
        let conv = vec![
            Message::user("q"),
            step(1, r#"{"function": "reflect"}"#),
            finish(2, "Tucson"),
        ];
        assert!(validate_trace(&conv, &gt()).valid);
    }

    #[test]
    fn test_observation_without_search() {
        let conv = vec![
            Message::user("q"),
            step(1, r#"{"function": "reflect"}"#),
            Message::observation("o"),
        ];
        assert_eq!(
            reason(&conv),
            "Expected 'search' action before 'observation' action, but found 'reflect' at index 2."
        );
    }

    #[test]
    fn test_unknown_role_and_late_user() {
        let conv = vec![Message::user("q"), Message::new(Role::Other("tool".into()), "x")];
        assert_eq!(reason(&conv), "Unknown role 'tool' at index 1.");

        let conv = vec![Message::user("q"), Message::user("again")];
        assert!(reason(&conv).contains("found 'user' at index 1"));
    }

    #[test]
    fn test_missing_action_and_bad_literal() {
        let conv = vec![Message::user("q"), Message::assistant("no labels here")];
        assert_eq!(reason(&conv), "Assistant entry at index 1 missing reasoning or action.");

        let conv = vec![Message::user("q"), step(1, "{'function': __import__('os')}")];
        assert!(reason(&conv).starts_with("Assistant action at index 1 is invalid"));
    }

    #[test]
    fn test_non_integer_step_names_the_digits() {
        let conv = vec![
            Message::user("q"),
            Message::assistant("Thought 99999999999: x\nAction 99999999999: {\"function\": \"reflect\"}"),
        ];
        assert_eq!(
            reason(&conv),
            "Thought number '99999999999' at index 1 is not an integer."
        );
    }

    #[test]
    fn test_deeply_nested_action_is_rejected() {
        let action = format!("{{'function': 'finish', 'parameters': {{'answer': {}}}}}", "[".repeat(5_000));
        let conv = vec![Message::user("q"), step(1, &action)];
        assert!(reason(&conv).contains("nesting too deep"));
    }
}
