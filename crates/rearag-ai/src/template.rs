//! Chat templates: render a conversation into model-ready text
//!
//! The generation endpoint takes raw text, so every conversation is flattened
//! through a [`ChatTemplate`] first. A trailing empty assistant message is the
//! slot the next generation fills; it is never rendered as a turn of its own.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{Message, Role};

/// Renders an ordered message sequence into prompt text
pub trait ChatTemplate: Send + Sync {
    /// Template name, for logging
    fn name(&self) -> &'static str;

    /// Render `messages`, optionally opening an assistant turn at the end
    fn render(&self, messages: &[Message], add_generation_prompt: bool) -> String;
}

/// Built-in template selection used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// GLM-4 style role tags (`<|user|>`, `<|observation|>`, ...)
    #[default]
    Glm4,
    /// ChatML (`<|im_start|>role ... <|im_end|>`)
    ChatMl,
}

impl TemplateKind {
    /// Instantiate the template
    pub fn build(self) -> Arc<dyn ChatTemplate> {
        match self {
            TemplateKind::Glm4 => Arc::new(Glm4Template),
            TemplateKind::ChatMl => Arc::new(ChatMlTemplate),
        }
    }
}

/// Drop a trailing generation slot, if any
fn turns(messages: &[Message]) -> &[Message] {
    match messages.split_last() {
        Some((last, rest)) if last.is_placeholder() => rest,
        _ => messages,
    }
}

/// GLM-4 chat format
#[derive(Debug, Clone, Copy, Default)]
pub struct Glm4Template;

impl ChatTemplate for Glm4Template {
    fn name(&self) -> &'static str {
        "glm4"
    }

    fn render(&self, messages: &[Message], add_generation_prompt: bool) -> String {
        let mut out = String::from("[gMASK]<sop>");
        for msg in turns(messages) {
            out.push_str("<|");
            out.push_str(msg.role.as_str());
            out.push_str("|>\n");
            out.push_str(&msg.content);
        }
        if add_generation_prompt {
            out.push_str("<|assistant|>");
        }
        out
    }
}

/// ChatML format. Observation turns are rendered as `observation` blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatMlTemplate;

impl ChatTemplate for ChatMlTemplate {
    fn name(&self) -> &'static str {
        "chatml"
    }

    fn render(&self, messages: &[Message], add_generation_prompt: bool) -> String {
        let mut out = String::new();
        for msg in turns(messages) {
            let role = match &msg.role {
                Role::Other(_) => "user",
                r => r.as_str(),
            };
            out.push_str("<|im_start|>");
            out.push_str(role);
            out.push('\n');
            out.push_str(&msg.content);
            out.push_str("<|im_end|>\n");
        }
        if add_generation_prompt {
            out.push_str("<|im_start|>assistant\n");
        }
        out
    }
}
