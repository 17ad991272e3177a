//! Building one reasoning trace with a construction model
//!
//! The construction model sees its own observations as assistant turns
//! (`Observation n: ...`), while the trace that is kept stores them as
//! `observation` messages. Both views grow in lockstep and roll back together
//! when an iteration fails.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rearag_agent::action::sanitize_query;
use rearag_agent::parse::{format_step, parse_reasoning_steps};
use rearag_agent::{Action, ActionKind, Error, RagClient, Result};
use rearag_ai::{ChatTemplate, GenerationParams, Generator, Message};

/// Construction loop settings
#[derive(Debug, Clone)]
pub struct ConstructionConfig {
    pub max_iterations: u32,
    /// Failed iterations allowed over the whole trace
    pub retry_budget: u32,
    pub allowed_actions: Vec<ActionKind>,
    pub generation: GenerationParams,
}

impl Default for ConstructionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            retry_budget: 20,
            allowed_actions: vec![ActionKind::Search, ActionKind::Finish],
            generation: GenerationParams {
                max_tokens: 256,
                top_p: 0.85,
                temperature: 0.99,
                stop: None,
                skip_special_tokens: true,
            },
        }
    }
}

/// How construction of one trace ended
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructionOutcome {
    /// A finished trace, system prompt excluded
    Built(Vec<Message>),
    /// Iteration or retry budget ran out
    GaveUp,
    Cancelled,
}

enum Progress {
    Continue,
    Finished,
}

pub struct TraceConstructor {
    generator: Arc<dyn Generator>,
    template: Arc<dyn ChatTemplate>,
    rag: Arc<RagClient>,
    config: ConstructionConfig,
}

impl TraceConstructor {
    pub fn new(
        generator: Arc<dyn Generator>,
        template: Arc<dyn ChatTemplate>,
        rag: Arc<RagClient>,
        config: ConstructionConfig,
    ) -> Self {
        Self {
            generator,
            template,
            rag,
            config,
        }
    }

    /// Build a trace for `question`
    pub async fn construct(&self, question: &str, cancel: &CancellationToken) -> ConstructionOutcome {
        let system = Message::system(self.rag.prompts().construction_system.as_str());
        let user = Message::user(format!(
            "Question: {question}\n\nReasoning process with function call:"
        ));
        let mut model_view = vec![system.clone(), user.clone()];
        let mut kept_view = vec![system, user];

        let mut iterations = 0;
        let mut retries = 0;
        while iterations < self.config.max_iterations {
            if cancel.is_cancelled() {
                return ConstructionOutcome::Cancelled;
            }
            let marks = (model_view.len(), kept_view.len());
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                r = self.step(&mut model_view, &mut kept_view, iterations + 1) => r,
            };
            match result {
                Ok(Progress::Finished) => {
                    kept_view.remove(0);
                    return ConstructionOutcome::Built(kept_view);
                }
                Ok(Progress::Continue) => iterations += 1,
                Err(Error::Cancelled) => return ConstructionOutcome::Cancelled,
                Err(e) => {
                    model_view.truncate(marks.0);
                    kept_view.truncate(marks.1);
                    tracing::warn!(question, iterations, retries, "construction step failed: {}", e);
                    if retries >= self.config.retry_budget {
                        return ConstructionOutcome::GaveUp;
                    }
                    retries += 1;
                }
            }
        }
        tracing::debug!(question, "construction hit the iteration limit");
        ConstructionOutcome::GaveUp
    }

    async fn step(
        &self,
        model_view: &mut Vec<Message>,
        kept_view: &mut Vec<Message>,
        fallback_number: u32,
    ) -> Result<Progress> {
        let prompt = self.template.render(model_view, true);
        let response = self.generator.generate(&prompt, &self.config.generation).await?;

        let first = parse_reasoning_steps(&response)
            .into_iter()
            .next()
            .ok_or_else(|| Error::parse("no reasoning step in construction output"))?;
        let action_text = first
            .action
            .as_deref()
            .ok_or_else(|| Error::parse("first reasoning step has no action"))?;
        let action = Action::parse(action_text)?;
        if !self.config.allowed_actions.contains(&action.kind()) {
            return Err(Error::ActionNotAllowed(action.kind().to_string()));
        }

        let number = first.number.unwrap_or(fallback_number);
        let text = format_step(number, first.thought.as_deref().unwrap_or_default(), &action);
        model_view.push(Message::assistant(text.clone()));
        kept_view.push(Message::assistant(text));

        match action {
            Action::Finish { .. } => Ok(Progress::Finished),
            Action::Search { query } => {
                let query = sanitize_query(&query);
                let docs = self.rag.search(&query).await?;
                let observation = self
                    .rag
                    .answer(&query, &self.rag.prompts().long_answer, &docs, &[])
                    .await?;
                model_view.push(Message::assistant(format!("Observation {number}: {observation}")));
                kept_view.push(Message::observation(observation));
                Ok(Progress::Continue)
            }
            Action::Reflect => Ok(Progress::Continue),
        }
    }
}
