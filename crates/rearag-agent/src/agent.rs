//! The reasoning loop
//!
//! Each iteration renders the conversation, asks the agent model for its next
//! thought and action, and dispatches the action against the knowledge
//! source. An iteration either commits completely or is rolled back to the
//! snapshot taken before it started; a rolled-back iteration consumes one
//! retry and is attempted again without advancing the iteration counter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use rearag_ai::{ChatTemplate, GenerationParams, Generator};

use crate::{
    action::ActionKind,
    conversation::ConversationState,
    dispatch::{ActionDispatcher, Dispatched, FinishMode},
    error::{Error, Result},
    events::AgentEvent,
    parse::parse_agent_response,
    rag::RagClient,
    truncate::{self, TruncationConfig},
};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on committed iterations
    pub max_iterations: u32,
    /// Rolled-back iterations allowed over the whole run
    pub retry_budget: u32,
    /// Action kinds the model may use; anything else repeats the iteration
    pub allowed_actions: Vec<ActionKind>,
    /// Sampling parameters for the agent model
    pub generation: GenerationParams,
    pub truncation: TruncationConfig,
    pub finish_mode: FinishMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            retry_budget: 20,
            allowed_actions: vec![ActionKind::Search, ActionKind::Finish],
            generation: GenerationParams {
                max_tokens: 1024,
                top_p: 0.85,
                temperature: 1.0,
                stop: None,
                skip_special_tokens: false,
            }
            .with_stop(["<|user|>", "<|observation|>", "<|assistant|>"]),
            truncation: TruncationConfig::default(),
            finish_mode: FinishMode::Extract,
        }
    }
}

/// Where a run ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running,
    Finished,
    Exhausted,
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Finished,
    IterationBudget,
    RetryBudget,
    Cancelled,
}

/// Outcome of a single iteration
#[derive(Debug)]
pub enum StepStatus {
    /// Roll back and try again
    Repeat(Error),
    /// Committed; move to the next iteration
    Continue,
    /// Committed with a final answer
    Finish(String),
}

/// Result of [`Agent::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub answer: Option<String>,
    pub state: LoopState,
    pub stop_reason: StopReason,
    /// Iterations committed
    pub iterations: u32,
    /// Retries consumed
    pub retries: u32,
}

/// Runs the reasoning loop for one question at a time
pub struct Agent {
    config: AgentConfig,
    generator: Arc<dyn Generator>,
    template: Arc<dyn ChatTemplate>,
    rag: Arc<RagClient>,
    state: Option<ConversationState>,
    event_tx: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl Agent {
    /// Create an agent. `generator` is the agent model endpoint, distinct from
    /// the answer generation endpoint inside `rag`.
    pub fn new(
        config: AgentConfig,
        generator: Arc<dyn Generator>,
        template: Arc<dyn ChatTemplate>,
        rag: Arc<RagClient>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            generator,
            template,
            rag,
            state: None,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// State of the most recent run
    pub fn state(&self) -> Option<&ConversationState> {
        self.state.as_ref()
    }

    /// Answer `question`
    pub async fn run(&mut self, question: &str) -> RunOutcome {
        let system = self.rag.prompts().agent_system.as_str().to_string();
        let mut state = ConversationState::new(system, question);
        let _ = self.event_tx.send(AgentEvent::RunStart {
            question: question.to_string(),
        });
        tracing::info!(question, "agent run started");

        let mut iteration = 1;
        let mut retries = 0;
        let (answer, loop_state, stop_reason) = loop {
            if self.cancel.is_cancelled() {
                break (None, LoopState::Exhausted, StopReason::Cancelled);
            }
            if iteration > self.config.max_iterations {
                break (None, LoopState::Exhausted, StopReason::IterationBudget);
            }
            let _ = self
                .event_tx
                .send(AgentEvent::IterationStart { iteration, retries });

            let snapshot = state.snapshot();
            match self.step(&mut state).await {
                StepStatus::Continue => iteration += 1,
                StepStatus::Finish(answer) => {
                    break (Some(answer), LoopState::Finished, StopReason::Finished);
                }
                StepStatus::Repeat(err) => {
                    state.restore(snapshot);
                    tracing::warn!(iteration, retries, "iteration rolled back: {}", err);
                    let _ = self.event_tx.send(AgentEvent::Repeat {
                        iteration,
                        retries,
                        reason: err.to_string(),
                    });
                    if self.cancel.is_cancelled() {
                        break (None, LoopState::Exhausted, StopReason::Cancelled);
                    }
                    if retries >= self.config.retry_budget {
                        break (None, LoopState::Exhausted, StopReason::RetryBudget);
                    }
                    retries += 1;
                }
            }
        };

        let iterations = match loop_state {
            LoopState::Finished => iteration,
            _ => iteration - 1,
        };
        tracing::info!(
            iterations,
            retries,
            ?stop_reason,
            answer = answer.as_deref().unwrap_or(""),
            "agent run ended"
        );
        let _ = self.event_tx.send(AgentEvent::RunEnd {
            answer: answer.clone(),
            stop_reason,
            iterations,
            retries,
        });
        self.state = Some(state);

        RunOutcome {
            answer,
            state: loop_state,
            stop_reason,
            iterations,
            retries,
        }
    }

    /// Run one iteration against `state`. On `Repeat` the caller restores
    /// the snapshot; `state` may be partially modified.
    pub async fn step(&self, state: &mut ConversationState) -> StepStatus {
        match self.try_step(state).await {
            Ok(Some(answer)) => StepStatus::Finish(answer),
            Ok(None) => StepStatus::Continue,
            Err(e) => StepStatus::Repeat(e),
        }
    }

    async fn try_step(&self, state: &mut ConversationState) -> Result<Option<String>> {
        let (prompt, report) =
            truncate::fit_prompt(state.messages(), self.template.as_ref(), &self.config.truncation);
        if let Some(report) = report {
            tracing::warn!(
                tokens_before = report.tokens_before,
                tokens_after = report.tokens_after,
                limit = self.config.truncation.model_max_length,
                "prompt exceeds model_max_length, truncating"
            );
            let _ = self.event_tx.send(AgentEvent::PromptTruncated {
                tokens_before: report.tokens_before,
                tokens_after: report.tokens_after,
                dropped_messages: report.dropped_messages,
            });
        }

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            r = self.generator.generate(&prompt, &self.config.generation) => r?,
        };
        tracing::debug!(response = %response, "agent response");

        let pairs = parse_agent_response(&response)?;
        let dispatcher = ActionDispatcher::new(&self.rag, self.config.finish_mode);
        for pair in pairs {
            let kind = pair.action.kind();
            if !self.config.allowed_actions.contains(&kind) {
                return Err(Error::ActionNotAllowed(kind.to_string()));
            }

            let dispatched = dispatcher
                .dispatch(state, &pair.thought, &pair.action, &response)
                .await?;
            if let Some(step) = state.reasoning_chain().last() {
                let _ = self.event_tx.send(AgentEvent::ActionDispatched {
                    step: step.step,
                    thought: step.thought.clone(),
                    action: step.action.clone(),
                    observation: step.observation.clone(),
                });
            }
            if let Dispatched::Finish(answer) = dispatched {
                return Ok(Some(answer));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rearag_ai::{PromptSet, Role, TemplateKind};

    use crate::action::Action;
    use crate::rag::RagConfig;
    use crate::testing::{ScriptedGenerator, ScriptedRetriever};

    const SEARCH: &str = "Thought 1: Find where Yuma is.\nAction 1: ```\n{'function': 'search', 'parameters': {'query': 'Where is Yuma?'}}\n```";
    const FINISH: &str = "Thought 2: Done.\nAction 2: ```\n{'function': 'finish', 'parameters': {'answer': 'Tucson, Arizona'}}\n```";
    const REFLECT: &str = "Thought 1: Wait.\nAction 1: ```\n{'function': 'reflect'}\n```";

    struct Harness {
        agent: Agent,
        agent_model: Arc<ScriptedGenerator>,
        answer_model: Arc<ScriptedGenerator>,
        retriever: Arc<ScriptedRetriever>,
    }

    fn harness(config: AgentConfig, agent_replies: Vec<rearag_ai::Result<String>>) -> Harness {
        let agent_model = Arc::new(ScriptedGenerator::with_results(agent_replies));
        let answer_model = Arc::new(ScriptedGenerator::from_fn(|prompt| {
            if prompt.contains("[Reference answer]") {
                Ok("Tucson".into())
            } else {
                Ok("It is in Arizona.".into())
            }
        }));
        let retriever = Arc::new(ScriptedRetriever::always(["Yuma is in Arizona."]));
        let rag = Arc::new(RagClient::new(
            answer_model.clone(),
            retriever.clone(),
            TemplateKind::Glm4.build(),
            Arc::new(PromptSet::default()),
            RagConfig::default(),
        ));
        let agent = Agent::new(config, agent_model.clone(), TemplateKind::Glm4.build(), rag);
        Harness {
            agent,
            agent_model,
            answer_model,
            retriever,
        }
    }

    fn ok(text: &str) -> rearag_ai::Result<String> {
        Ok(text.to_string())
    }

    fn http_500() -> rearag_ai::Result<String> {
        Err(rearag_ai::Error::Status {
            endpoint: "generation",
            status: 500,
            body: "overloaded".into(),
        })
    }

    #[tokio::test]
    async fn test_search_then_finish() {
        let mut h = harness(AgentConfig::default(), vec![ok(SEARCH), ok(FINISH)]);
        let outcome = h.agent.run("Second largest city in Yuma's state?").await;

        assert_eq!(outcome.answer.as_deref(), Some("Tucson"));
        assert_eq!(outcome.state, LoopState::Finished);
        assert_eq!(outcome.stop_reason, StopReason::Finished);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.retries, 0);

        let state = h.agent.state().unwrap();
        let roles: Vec<_> = state.messages().iter().map(|m| m.role.clone()).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Observation, Role::Assistant]
        );
        assert_eq!(state.messages()[2].content, SEARCH);
        assert_eq!(state.reasoning_chain().len(), 2);
        assert_eq!(state.reasoning_chain()[1].action, Action::finish("Tucson, Arizona"));
        assert_eq!(h.retriever.calls(), vec![("Where is Yuma?".to_string(), 5)]);
        assert_eq!(h.answer_model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_prompt_carries_observation() {
        let mut h = harness(AgentConfig::default(), vec![ok(SEARCH), ok(FINISH)]);
        h.agent.run("q").await;
        let prompts = h.agent_model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].ends_with("<|user|>\nq<|assistant|>"));
        assert!(prompts[1].ends_with("<|observation|>\nIt is in Arizona.<|assistant|>"));
    }

    #[tokio::test]
    async fn test_agent_params_sent() {
        let mut h = harness(AgentConfig::default(), vec![ok(FINISH)]);
        h.agent.run("q").await;
        let params = &h.agent_model.params()[0];
        assert_eq!(params.top_p, 0.85);
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.stop.as_ref().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_rolls_back_and_retries() {
        let mut h = harness(AgentConfig::default(), vec![http_500(), ok(FINISH)]);
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.answer.as_deref(), Some("Tucson"));
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(h.agent.state().unwrap().reasoning_chain().len(), 1);
    }

    #[tokio::test]
    async fn test_disallowed_action_repeats() {
        let mut h = harness(AgentConfig::default(), vec![ok(REFLECT), ok(FINISH)]);
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.retries, 1);
        let state = h.agent.state().unwrap();
        assert_eq!(state.reasoning_chain().len(), 1);
        assert_eq!(state.reasoning_chain()[0].action.kind(), ActionKind::Finish);
    }

    #[tokio::test]
    async fn test_partial_response_rolled_back() {
        let search_then_reflect = format!(
            "{}\n{}",
            SEARCH.replace('1', "2"),
            REFLECT.replace('1', "3")
        );
        let mut h = harness(
            AgentConfig::default(),
            vec![ok(SEARCH), ok(&search_then_reflect), ok(FINISH)],
        );
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.answer.as_deref(), Some("Tucson"));
        assert_eq!(outcome.retries, 1);
        assert_eq!(outcome.iterations, 2);
        // the search in the rolled-back response did run
        assert_eq!(h.retriever.calls().len(), 2);

        // the retried iteration saw exactly the pre-iteration conversation
        let prompts = h.agent_model.prompts();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[1], prompts[2]);

        let mut clean = harness(
            AgentConfig::default(),
            vec![ok(SEARCH), http_500(), ok(FINISH)],
        );
        clean.agent.run("q").await;
        let (got, want) = (h.agent.state().unwrap(), clean.agent.state().unwrap());
        assert_eq!(got.messages(), want.messages());
        assert_eq!(got.reasoning_chain(), want.reasoning_chain());
        assert_eq!(got.summary_chain(), want.summary_chain());
        assert_eq!(got.summary_chain().len(), 1);
    }

    #[tokio::test]
    async fn test_reflect_allowed_continues() {
        let config = AgentConfig {
            allowed_actions: ActionKind::ALL.to_vec(),
            ..AgentConfig::default()
        };
        let mut h = harness(config, vec![ok(REFLECT), ok(FINISH)]);
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.retries, 0);
        assert_eq!(h.agent.state().unwrap().messages().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let config = AgentConfig {
            retry_budget: 2,
            ..AgentConfig::default()
        };
        let replies = vec![ok("garbage"), ok("garbage"), ok("garbage"), ok(FINISH)];
        let mut h = harness(config, replies);
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.answer, None);
        assert_eq!(outcome.state, LoopState::Exhausted);
        assert_eq!(outcome.stop_reason, StopReason::RetryBudget);
        assert_eq!(outcome.retries, 2);
        assert_eq!(h.agent_model.call_count(), 3);

        let state = h.agent.state().unwrap();
        assert_eq!(state.messages().len(), 3);
        assert!(state.reasoning_chain().is_empty());
    }

    #[tokio::test]
    async fn test_iteration_budget_exhausted() {
        let config = AgentConfig {
            max_iterations: 2,
            ..AgentConfig::default()
        };
        let mut h = harness(config, vec![ok(SEARCH), ok(SEARCH), ok(FINISH)]);
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.answer, None);
        assert_eq!(outcome.stop_reason, StopReason::IterationBudget);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(h.agent_model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_finish_stops_remaining_actions() {
        let both = format!("{FINISH}\n{}", SEARCH.replace('1', "3"));
        let mut h = harness(AgentConfig::default(), vec![ok(&both)]);
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.answer.as_deref(), Some("Tucson"));
        assert!(h.retriever.calls().is_empty());
        assert_eq!(h.agent_model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut h = harness(AgentConfig::default(), vec![ok(FINISH)]);
        h.agent.cancel_token().cancel();
        let outcome = h.agent.run("q").await;
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(h.agent_model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let mut h = harness(AgentConfig::default(), vec![http_500(), ok(SEARCH), ok(FINISH)]);
        let mut rx = h.agent.subscribe();
        h.agent.run("q").await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(AgentEvent::RunStart { .. })));
        assert!(events.last().is_some_and(AgentEvent::is_terminal));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, AgentEvent::Repeat { .. }))
                .count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, AgentEvent::ActionDispatched { .. }))
                .count(),
            2
        );
    }
}
