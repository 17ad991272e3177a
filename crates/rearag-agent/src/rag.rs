//! Retrieval-augmented answering over the retrieval and generation endpoints

use std::sync::Arc;

use rearag_ai::{
    ChatTemplate, Document, GenerationParams, Generator, Message, PromptSet, PromptTemplate,
    Retriever,
};

use crate::error::Result;

/// Settings for the knowledge source
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Documents requested per search
    pub top_k: usize,
    /// Sampling parameters for answer generation
    pub generation: GenerationParams,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            generation: GenerationParams::default().with_stop([
                "<|user|>",
                "<|endoftext|>",
                "<|assistant|>",
            ]),
        }
    }
}

/// Searches the retriever and answers questions from what it returns
pub struct RagClient {
    generator: Arc<dyn Generator>,
    retriever: Arc<dyn Retriever>,
    template: Arc<dyn ChatTemplate>,
    prompts: Arc<PromptSet>,
    config: RagConfig,
}

impl RagClient {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        template: Arc<dyn ChatTemplate>,
        prompts: Arc<PromptSet>,
        config: RagConfig,
    ) -> Self {
        Self {
            generator,
            retriever,
            template,
            prompts,
            config,
        }
    }

    pub fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Retrieve the top-k documents for `query`
    pub async fn search(&self, query: &str) -> Result<Vec<Document>> {
        let docs = self.retriever.search(query, self.config.top_k).await?;
        tracing::debug!(query, count = docs.len(), "retrieved documents");
        Ok(docs)
    }

    /// Wrap `prompt` as a single user turn and generate a reply
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let text = self.template.render(&[Message::user(prompt)], true);
        Ok(self.generator.generate(&text, &self.config.generation).await?)
    }

    /// Answer `question` from retrieved documents plus optional extra context.
    ///
    /// Chunks are deduplicated by text, first occurrence wins, retrieved
    /// documents before extras.
    pub async fn answer(
        &self,
        question: &str,
        template: &PromptTemplate,
        retrieved: &[Document],
        extra: &[String],
    ) -> Result<String> {
        let context = build_context(retrieved, extra);
        let prompt = template.render(&[("context", &context), ("question", question)]);
        self.generate(&prompt).await
    }

    /// Condense a long reference answer into a short final answer
    pub async fn extract_short_answer(&self, question: &str, reference: &str) -> Result<String> {
        let prompt = self
            .prompts
            .extract_short_answer
            .render(&[("question", question), ("reference", reference)]);
        self.generate(&prompt).await
    }
}

/// Join unique chunk texts with blank lines, keeping first-seen order
pub fn build_context(retrieved: &[Document], extra: &[String]) -> String {
    let mut chunks: Vec<&str> = Vec::new();
    let candidates = retrieved
        .iter()
        .map(|d| d.contents.as_str())
        .chain(extra.iter().map(String::as_str));
    for chunk in candidates {
        if !chunks.contains(&chunk) {
            chunks.push(chunk);
        }
    }
    chunks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedGenerator, ScriptedRetriever};
    use rearag_ai::TemplateKind;

    fn client(generator: Arc<ScriptedGenerator>, retriever: Arc<ScriptedRetriever>) -> RagClient {
        RagClient::new(
            generator,
            retriever,
            TemplateKind::Glm4.build(),
            Arc::new(PromptSet::default()),
            RagConfig::default(),
        )
    }

    #[test]
    fn test_build_context_dedups_in_order() {
        let docs = vec![Document::new("a"), Document::new("b"), Document::new("a")];
        let extra = vec!["b".to_string(), "c".to_string()];
        assert_eq!(build_context(&docs, &extra), "a\n\nb\n\nc");
        assert_eq!(build_context(&[], &[]), "");
    }

    #[tokio::test]
    async fn test_answer_renders_prompt_through_template() {
        let generator = Arc::new(ScriptedGenerator::new(["Paris"]));
        let retriever = Arc::new(ScriptedRetriever::new(Vec::<Vec<&str>>::new()));
        let rag = client(generator.clone(), retriever);

        let template = PromptTemplate::new("C: {context} Q: {question}");
        let out = rag
            .answer("capital?", &template, &[Document::new("France")], &[])
            .await
            .unwrap();
        assert_eq!(out, "Paris");

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0], "[gMASK]<sop><|user|>\nC: France Q: capital?<|assistant|>");
    }

    #[tokio::test]
    async fn test_search_passes_top_k() {
        let generator = Arc::new(ScriptedGenerator::new(Vec::<&str>::new()));
        let retriever = Arc::new(ScriptedRetriever::new([vec!["d1", "d2"]]));
        let rag = client(generator, retriever.clone());
        let docs = rag.search("q").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(retriever.calls(), vec![("q".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_extract_short_answer_prompt() {
        let generator = Arc::new(ScriptedGenerator::new(["1905"]));
        let retriever = Arc::new(ScriptedRetriever::new(Vec::<Vec<&str>>::new()));
        let rag = client(generator.clone(), retriever);
        let out = rag
            .extract_short_answer("When?", "It was published in 1905.")
            .await
            .unwrap();
        assert_eq!(out, "1905");
        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("[Question]\nWhen?"));
        assert!(prompt.contains("[Reference answer]\nIt was published in 1905."));
    }
}
