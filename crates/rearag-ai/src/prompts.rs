//! Prompt templates
//!
//! Templates use `{name}` placeholders. Only the placeholders passed to
//! [`PromptTemplate::render`] are substituted, so literal braces (the JSON
//! function schemas in the system prompts) pass through untouched.

use serde::{Deserialize, Serialize};

/// A text template with named `{placeholder}` slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute each `{key}` with its value in a single pass, so values
    /// containing placeholder-like text are inserted verbatim
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut rest = self.0.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open + 1..];
            let value = tail.find('}').and_then(|close| {
                let key = &tail[..close];
                vars.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| (*v, close))
            });
            match value {
                Some((v, close)) => {
                    out.push_str(v);
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = tail;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl From<&str> for PromptTemplate {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Every prompt the agent and the data pipeline use
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// System prompt of the inference agent
    pub agent_system: PromptTemplate,
    /// System prompt of the trace construction model
    pub construction_system: PromptTemplate,
    /// Answer template used for observations mid-loop (`{context}`, `{question}`)
    pub long_answer: PromptTemplate,
    /// Answer template for grounded final answers (`{context}`, `{question}`)
    pub short_answer: PromptTemplate,
    /// Short-answer extraction (`{question}`, `{reference}`)
    pub extract_short_answer: PromptTemplate,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            agent_system: PromptTemplate::new(agent_system_prompt()),
            construction_system: PromptTemplate::new(construction_system_prompt()),
            long_answer: LONG_ANSWER_PROMPT.into(),
            short_answer: SHORT_ANSWER_PROMPT.into(),
            extract_short_answer: EXTRACT_SHORT_ANSWER_PROMPT.into(),
        }
    }
}

const FUNCTIONS: &str = r#"# Available functions:
(1) search
{
    "name": "search",
    "description": "It can help you find useful information through the internet or local knowledge base. You can use this tool to access external knowledge",
    "parameters": {
        "type": "object",
        "properties": {
            "query": {
                "description": "what you want to search"
            }
        },
        "required": [
            "query"
        ]
    }
}

(2) finish
{
    "name": "finish",
    "description": "You can use this function to make a conclusion from the reasoning process and give the final answer. The reasoning process is completed after this `finish` function is called",
    "parameters": {
        "type": "object",
        "properties": {
            "answer": {
                "description": "the final answer"
            }
        },
        "required": [
            "answer"
        ]
    }
}
"#;

/// Opening of the inference agent system prompt; the function list follows it
pub const AGENT_PREAMBLE: &str = "Your task is to solve a question answering task. To improve your solving accuracy, please conduct reasoning process interleaving Thought, Action, Observation steps. Thought can reason about the current situation, and Action are in the form of function, there are two types:";

/// Opening of the construction system prompt; the function list follows it
pub const CONSTRUCTION_PREAMBLE: &str = "Your task is to solve a question answering task. To improve your solving accuracy, please conduct reasoning process following this sequence: Thought, Action, Observation steps. Thought can reason about the current situation, and Action are in the form of function, there are two types:";

/// Rules and in-context example closing the construction system prompt
pub const CONSTRUCTION_RULES: &str = r#"# Some important rules you must follow:
(1) Please follow the function calling format above strictly.
(2) A set of `Thought`, `Action`, and `Observation` is considered as one reasoning step. Add numbering after each `Thought`, `Action`, and `Observation` to indicate the sequence of the reasoning steps.
(3) Give your `Thought` first, then the `Action`, and finally the `Observation`, following the in-context example below.
(4) In your `Thought`, perform reflection when necessary to ensure the correctness of your reasoning process, such as: "Wait! Maybe I made some mistakes! I need to rethink from scratch", "Alternatively, we can...", "Hold on, let's try another approach".
(5) Give your `Action` in the form of a function call, as shown in the example below.
(6) Do not provide information based on your own knowledge, only use the information provided in the context.

# In-context example:
Question:
What is the second largest city in the state where Yuma's Library District is located?

Reasoning process with function call:
Thought 1: First, we need to determine where Yuma's Library District is located.
Action 1:
```
{"function": "search", "parameters": {"query": "Which state is Yuma County Library District located in?"}}
```
Observation 1: It is located in Arizona.

Thought 2: Next, we need the second largest city in Arizona.
Action 2:
```
{"function": "search", "parameters": {"query": "What is the second largest city in Arizona?"}}
```
Observation 2: It should be Tucson.

Thought 3: Yuma's Library District is in Arizona, and the second largest city in Arizona is Tucson.
Action 3:
```
{"function": "finish", "parameters": {"answer": "Tucson"}}
```
"#;

/// Default mid-loop answer template
pub const LONG_ANSWER_PROMPT: &str = "If the Question is comparison type, do not refer the given Context, else, answer the Question based on the given Contexts.\n\nContext: {context}\n\nQuestion: {question}\n\nAnswer:";

/// Default grounded short answer template
pub const SHORT_ANSWER_PROMPT: &str = "Context: {context}\n\nAnswer the Question based on the given Contexts. Only give me the answer and do not output any other words.\n\nQuestion: {question}\n\nAnswer:";

/// Default short-answer extraction template
pub const EXTRACT_SHORT_ANSWER_PROMPT: &str = "The Reference Answer is the final answer to the question. It's the final deterministic answer, your task is to give concise version of it. Only give me the short answer and do not output any other words.\n[Question]\n{question}\n[Reference answer]\n{reference}\n\nOnly give me the short answer and do not output any other words. For yes, or no answer, only answer it short. Give the shortest answer possible.\n";

/// Default inference agent system prompt
pub fn agent_system_prompt() -> String {
    format!("{AGENT_PREAMBLE}\n\n{FUNCTIONS}\nPlease follow the format strictly.\n")
}

/// Default construction system prompt
pub fn construction_system_prompt() -> String {
    format!("{CONSTRUCTION_PREAMBLE}\n\n{FUNCTIONS}\n{CONSTRUCTION_RULES}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_named_placeholders() {
        let t = PromptTemplate::new("Context: {context}\nQ: {question}");
        assert_eq!(
            t.render(&[("context", "a\n\nb"), ("question", "why?")]),
            "Context: a\n\nb\nQ: why?"
        );
    }

    #[test]
    fn test_render_does_not_expand_inside_values() {
        let t = PromptTemplate::new("{context}|{question}");
        assert_eq!(
            t.render(&[("context", "see {question}"), ("question", "q")]),
            "see {question}|q"
        );
    }

    #[test]
    fn test_render_leaves_json_braces_alone() {
        let prompts = PromptSet::default();
        let rendered = prompts.agent_system.render(&[("question", "x")]);
        assert_eq!(rendered, agent_system_prompt());
        assert!(rendered.contains(r#""required": ["#));
    }

    #[test]
    fn test_default_templates_carry_their_slots() {
        let prompts = PromptSet::default();
        for t in [&prompts.long_answer, &prompts.short_answer] {
            assert!(t.as_str().contains("{context}"));
            assert!(t.as_str().contains("{question}"));
        }
        assert!(prompts.extract_short_answer.as_str().contains("{reference}"));
    }

    #[test]
    fn test_system_prompts_list_functions() {
        let prompts = PromptSet::default();
        assert!(prompts.agent_system.as_str().contains(FUNCTIONS));
        assert!(prompts.construction_system.as_str().contains(FUNCTIONS));
        assert!(prompts.construction_system.as_str().ends_with(CONSTRUCTION_RULES));
    }
}
