//! Executing parsed actions against the knowledge source

use serde::{Deserialize, Serialize};

use crate::action::{Action, sanitize_query};
use crate::conversation::ConversationState;
use crate::error::Result;
use crate::rag::RagClient;

/// How a `finish` action becomes the final answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishMode {
    /// Condense the model's answer with the extraction prompt
    #[default]
    Extract,
    /// Retrieve for the question again and answer from those documents plus
    /// every observation gathered so far
    Summarize,
}

/// What the loop should do after an action ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Continue,
    Finish(String),
}

pub struct ActionDispatcher<'a> {
    rag: &'a RagClient,
    finish_mode: FinishMode,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(rag: &'a RagClient, finish_mode: FinishMode) -> Self {
        Self { rag, finish_mode }
    }

    /// Run `action` and record it on `state`.
    ///
    /// All endpoint calls happen before the state is touched, so an error
    /// leaves `state` as it was.
    pub async fn dispatch(
        &self,
        state: &mut ConversationState,
        thought: &str,
        action: &Action,
        response: &str,
    ) -> Result<Dispatched> {
        match action {
            Action::Search { query } => {
                let query = sanitize_query(query);
                let docs = self.rag.search(&query).await?;
                let observation = self
                    .rag
                    .answer(&query, &self.rag.prompts().long_answer, &docs, &[])
                    .await?;
                state.record_search(response, thought, action.clone(), &query, &observation)?;
                Ok(Dispatched::Continue)
            }
            Action::Finish { answer } => {
                let final_answer = match self.finish_mode {
                    FinishMode::Extract => {
                        self.rag
                            .extract_short_answer(state.question(), answer)
                            .await?
                    }
                    FinishMode::Summarize => {
                        let question = state.question().to_string();
                        let docs = self.rag.search(&question).await?;
                        self.rag
                            .answer(
                                &question,
                                &self.rag.prompts().short_answer,
                                &docs,
                                &state.summary_context(),
                            )
                            .await?
                    }
                };
                let final_answer = final_answer.trim().to_string();
                state.append_reasoning_step(thought, action.clone(), Some(final_answer.clone()));
                Ok(Dispatched::Finish(final_answer))
            }
            Action::Reflect => {
                state.append_reasoning_step(thought, Action::Reflect, None);
                Ok(Dispatched::Continue)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rearag_ai::{PromptSet, TemplateKind};

    use crate::rag::RagConfig;
    use crate::testing::{ScriptedGenerator, ScriptedRetriever};

    fn rag(generator: Arc<ScriptedGenerator>, retriever: Arc<ScriptedRetriever>) -> RagClient {
        RagClient::new(
            generator,
            retriever,
            TemplateKind::Glm4.build(),
            Arc::new(PromptSet::default()),
            RagConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_search_records_observation() {
        let generator = Arc::new(ScriptedGenerator::new(["Frank Herbert wrote it."]));
        let retriever = Arc::new(ScriptedRetriever::new([vec!["Dune is by Frank Herbert."]]));
        let rag = rag(generator, retriever);
        let dispatcher = ActionDispatcher::new(&rag, FinishMode::Extract);

        let mut state = ConversationState::new("sys", "Who wrote Dune?");
        let out = dispatcher
            .dispatch(&mut state, "look", &Action::search("Dune author"), "Thought 1: look")
            .await
            .unwrap();

        assert_eq!(out, Dispatched::Continue);
        assert_eq!(state.messages().len(), 5);
        assert_eq!(state.messages()[3].content, "Frank Herbert wrote it.");
        assert_eq!(state.summary_chain()[0].query, "Dune author");
    }

    #[tokio::test]
    async fn test_search_sanitizes_mixed_quotes() {
        let generator = Arc::new(ScriptedGenerator::new(["obs"]));
        let retriever = Arc::new(ScriptedRetriever::new([vec!["doc"]]));
        let rag = rag(generator, retriever.clone());
        let dispatcher = ActionDispatcher::new(&rag, FinishMode::Extract);
        let mut state = ConversationState::new("sys", "q");
        dispatcher
            .dispatch(&mut state, "t", &Action::search("it's \"x\""), "r")
            .await
            .unwrap();
        assert_eq!(retriever.calls()[0].0, "it\\'s \\\"x\\\"");
    }

    #[tokio::test]
    async fn test_search_failure_leaves_state_untouched() {
        let generator = Arc::new(ScriptedGenerator::with_results([Err(
            rearag_ai::Error::Status {
                endpoint: "generation",
                status: 500,
                body: "boom".into(),
            },
        )]));
        let retriever = Arc::new(ScriptedRetriever::new([vec!["doc"]]));
        let rag = rag(generator, retriever);
        let dispatcher = ActionDispatcher::new(&rag, FinishMode::Extract);

        let mut state = ConversationState::new("sys", "q");
        let before = state.clone();
        let err = dispatcher
            .dispatch(&mut state, "t", &Action::search("x"), "r")
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn test_finish_extracts_short_answer() {
        let generator = Arc::new(ScriptedGenerator::new(["  Tucson \n"]));
        let retriever = Arc::new(ScriptedRetriever::new(Vec::<Vec<&str>>::new()));
        let rag = rag(generator.clone(), retriever.clone());
        let dispatcher = ActionDispatcher::new(&rag, FinishMode::Extract);

        let mut state = ConversationState::new("sys", "Second largest city?");
        let out = dispatcher
            .dispatch(&mut state, "done", &Action::finish("It is Tucson, Arizona."), "r")
            .await
            .unwrap();
        assert_eq!(out, Dispatched::Finish("Tucson".into()));
        assert!(retriever.calls().is_empty());
        assert!(generator.prompts()[0].contains("It is Tucson, Arizona."));
        assert_eq!(state.reasoning_chain()[0].observation.as_deref(), Some("Tucson"));
    }

    #[tokio::test]
    async fn test_finish_summarize_uses_summary_chain() {
        let generator = Arc::new(ScriptedGenerator::new(["Tucson"]));
        let retriever = Arc::new(ScriptedRetriever::new([vec!["Arizona cities"]]));
        let rag = rag(generator.clone(), retriever.clone());
        let dispatcher = ActionDispatcher::new(&rag, FinishMode::Summarize);

        let mut state = ConversationState::new("sys", "Second largest city?");
        state.append_summary("Where is Yuma?", "Arizona");
        dispatcher
            .dispatch(&mut state, "done", &Action::finish("Tucson"), "r")
            .await
            .unwrap();
        assert_eq!(retriever.calls()[0].0, "Second largest city?");
        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("Arizona cities\n\nWhere is Yuma?\nArizona"));
    }

    #[tokio::test]
    async fn test_reflect_records_step_only() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<&str>::new()));
        let retriever = Arc::new(ScriptedRetriever::new(Vec::<Vec<&str>>::new()));
        let rag = rag(generator.clone(), retriever);
        let dispatcher = ActionDispatcher::new(&rag, FinishMode::Extract);

        let mut state = ConversationState::new("sys", "q");
        let out = dispatcher
            .dispatch(&mut state, "hmm", &Action::Reflect, "r")
            .await
            .unwrap();
        assert_eq!(out, Dispatched::Continue);
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.reasoning_chain().len(), 1);
        assert!(state.reasoning_chain()[0].observation.is_none());
        assert_eq!(generator.call_count(), 0);
    }
}
