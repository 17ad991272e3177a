//! Splitting model text into Thought / Action / Observation steps

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::action::{Action, extract_code};
use crate::error::{Error, Result};

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(Thought|Action|Observation)(?:[ \t]+(\d+))?[ \t]*:").unwrap()
});

/// One labelled step as written in text, before the action is parsed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStep {
    /// The number after the label, when one was written and fits in a u32
    pub number: Option<u32>,
    /// The digits of a label whose number did not fit in a u32
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_number: Option<String>,
    pub thought: Option<String>,
    pub action: Option<String>,
    pub observation: Option<String>,
}

#[derive(Clone, Copy)]
enum Label {
    Thought,
    Action,
    Observation,
}

/// Split text into labelled steps.
///
/// Numbered labels are grouped by number. An unnumbered `Thought` opens a new
/// step and unnumbered `Action` / `Observation` labels attach to the step in
/// progress. When every step is numbered the result is sorted by number.
/// Text before the first label is ignored.
pub fn parse_reasoning_steps(text: &str) -> Vec<RawStep> {
    let labels: Vec<_> = LABEL_PATTERN.captures_iter(text).collect();
    let mut steps: Vec<RawStep> = Vec::new();

    for (i, caps) in labels.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = labels
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let body = text[whole.end()..end].trim().to_string();
        let label = match name.as_str() {
            "Thought" => Label::Thought,
            "Action" => Label::Action,
            _ => Label::Observation,
        };
        let digits = caps.get(2).map(|m| m.as_str());
        let number = digits.and_then(|d| d.parse::<u32>().ok());
        let bad_number = digits.filter(|_| number.is_none()).map(str::to_string);

        let index = match number {
            Some(n) => match steps.iter().position(|s| s.number == Some(n)) {
                Some(idx) => idx,
                None => push_step(&mut steps, Some(n), None),
            },
            None => match (label, steps.last()) {
                (Label::Thought, _) | (_, None) => push_step(&mut steps, None, bad_number),
                (_, Some(_)) => steps.len() - 1,
            },
        };

        let step = &mut steps[index];
        let slot = match label {
            Label::Thought => &mut step.thought,
            Label::Action => &mut step.action,
            Label::Observation => &mut step.observation,
        };
        match slot {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(&body);
            }
            None => *slot = Some(body),
        }
    }

    if steps.iter().all(|s| s.number.is_some()) {
        steps.sort_by_key(|s| s.number);
    }
    steps
}

fn push_step(steps: &mut Vec<RawStep>, number: Option<u32>, bad_number: Option<String>) -> usize {
    steps.push(RawStep {
        number,
        bad_number,
        ..RawStep::default()
    });
    steps.len() - 1
}

/// A thought paired with its parsed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThoughtAction {
    pub thought: String,
    pub action: Action,
}

/// Parse an agent generation into its thought/action pairs.
///
/// Every step must carry an action that passes the strict action parser;
/// a missing thought is treated as empty.
pub fn parse_agent_response(text: &str) -> Result<Vec<ThoughtAction>> {
    let steps = parse_reasoning_steps(text);
    if steps.is_empty() {
        return Err(Error::parse("no Thought or Action found in model output"));
    }
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            let action_text = step.action.ok_or_else(|| {
                Error::parse(format!("step {} has no action", step.number.unwrap_or(i as u32 + 1)))
            })?;
            Ok(ThoughtAction {
                thought: step.thought.unwrap_or_default(),
                action: Action::parse(&action_text)?,
            })
        })
        .collect()
}

/// Write one step in the canonical trace format
pub fn format_step(number: u32, thought: &str, action: &Action) -> String {
    format!(
        "Thought {number}: {thought}\nAction {number}: \n```\n{}\n```",
        action.to_json()
    )
}

/// The raw action text of a step with any code fence removed
pub fn action_code(step: &RawStep) -> Option<&str> {
    step.action.as_deref().map(|a| extract_code(a).trim())
}
