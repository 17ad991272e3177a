//! Agent actions and their strict parser
//!
//! The model writes each action as a small literal, for example
//! `{"function": "search", "parameters": {"query": "..."}}`, or the same
//! thing with single-quoted strings as seen in older traces. The text is
//! parsed as JSON first and, failing that, with a literal parser that only
//! understands strings, numbers, booleans, null, lists and dicts. Nothing in
//! model output is ever evaluated.
//!
//! After parsing, the parameters are validated against a JSON schema for the
//! action kind, so a call that does not match the documented shape never
//! reaches dispatch.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// The kinds of action the model may call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Search,
    Finish,
    Reflect,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Search, ActionKind::Finish, ActionKind::Reflect];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Search => "search",
            ActionKind::Finish => "finish",
            ActionKind::Reflect => "reflect",
        }
    }

    fn schema(&self) -> Value {
        match self {
            ActionKind::Search => json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
            ActionKind::Finish => json!({
                "type": "object",
                "properties": { "answer": { "type": "string" } },
                "required": ["answer"]
            }),
            ActionKind::Reflect => json!({ "type": "object" }),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "search" => Ok(ActionKind::Search),
            "finish" => Ok(ActionKind::Finish),
            "reflect" => Ok(ActionKind::Reflect),
            other => Err(Error::ActionNotAllowed(other.to_string())),
        }
    }
}

/// Compiled parameter validators, one per action kind. A schema that fails
/// to compile leaves its kind unvalidated.
static VALIDATORS: LazyLock<HashMap<ActionKind, jsonschema::Validator>> = LazyLock::new(|| {
    ActionKind::ALL
        .iter()
        .filter_map(|kind| match jsonschema::validator_for(&kind.schema()) {
            Ok(validator) => Some((*kind, validator)),
            Err(e) => {
                tracing::warn!("Invalid parameter schema for '{}', skipping validation: {}", kind, e);
                None
            }
        })
        .collect()
});

fn validate_parameters(kind: ActionKind, parameters: &Value) -> Result<()> {
    let Some(validator) = VALIDATORS.get(&kind) else {
        return Ok(());
    };
    let errors: Vec<String> = validator
        .iter_errors(parameters)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::parse(format!(
            "invalid parameters for '{}':\n{}",
            kind,
            errors.join("\n")
        )))
    }
}

/// The wire form of an action: `{"function": ..., "parameters": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    #[serde(alias = "kind")]
    pub function: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// A validated action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ActionCall", into = "ActionCall")]
pub enum Action {
    Search { query: String },
    Finish { answer: String },
    Reflect,
}

impl Action {
    pub fn search(query: impl Into<String>) -> Self {
        Action::Search {
            query: query.into(),
        }
    }

    pub fn finish(answer: impl Into<String>) -> Self {
        Action::Finish {
            answer: answer.into(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Search { .. } => ActionKind::Search,
            Action::Finish { .. } => ActionKind::Finish,
            Action::Reflect => ActionKind::Reflect,
        }
    }

    /// Parse action text as the model wrote it, code fences included
    pub fn parse(text: &str) -> Result<Self> {
        let code = extract_code(text).trim();
        if code.is_empty() {
            return Err(Error::parse("empty action"));
        }
        let value = match serde_json::from_str::<Value>(code) {
            Ok(v) => v,
            Err(_) => parse_literal(code)?,
        };
        let call: ActionCall = serde_json::from_value(value)
            .map_err(|e| Error::parse(format!("action is not a function call: {e}")))?;
        Action::try_from(call)
    }

    /// Canonical single-line JSON form, as written into traces
    pub fn to_json(&self) -> String {
        serde_json::to_string(&ActionCall::from(self.clone())).unwrap_or_default()
    }
}

impl TryFrom<ActionCall> for Action {
    type Error = Error;

    fn try_from(call: ActionCall) -> Result<Self> {
        let kind: ActionKind = call.function.parse()?;
        let parameters = Value::Object(call.parameters);
        validate_parameters(kind, &parameters)?;

        let string_param = |name: &str| {
            parameters
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::parse(format!("missing '{name}' parameter")))
        };
        match kind {
            ActionKind::Search => Ok(Action::Search {
                query: string_param("query")?,
            }),
            ActionKind::Finish => Ok(Action::Finish {
                answer: string_param("answer")?,
            }),
            ActionKind::Reflect => Ok(Action::Reflect),
        }
    }
}

impl From<Action> for ActionCall {
    fn from(action: Action) -> Self {
        let kind = action.kind();
        let mut parameters = Map::new();
        match action {
            Action::Search { query } => {
                parameters.insert("query".into(), Value::String(query));
            }
            Action::Finish { answer } => {
                parameters.insert("answer".into(), Value::String(answer));
            }
            Action::Reflect => {}
        }
        ActionCall {
            function: kind.as_str().to_string(),
            parameters,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

static TRIPLE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").unwrap());
static SINGLE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());

/// Pull code out of a fenced block. Tries a triple-backtick block, then an
/// inline backtick span, and falls back to the whole text.
pub fn extract_code(text: &str) -> &str {
    if let Some(m) = TRIPLE_FENCE.captures(text).and_then(|c| c.get(1)) {
        return m.as_str();
    }
    if let Some(m) = SINGLE_FENCE.captures(text).and_then(|c| c.get(1)) {
        return m.as_str();
    }
    text
}

/// Escape quotes in a search query when it mixes both kinds, so the query
/// survives being re-embedded in a quoted literal
pub fn sanitize_query(query: &str) -> String {
    if query.contains('\'') && query.contains('"') {
        query.replace('\'', "\\'").replace('"', "\\\"")
    } else {
        query.to_string()
    }
}

/// Parse a relaxed literal (single quotes, `True`/`None`, trailing commas) into a JSON value
fn parse_literal(text: &str) -> Result<Value> {
    let mut parser = LiteralParser {
        chars: text.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

/// Same nesting limit as `serde_json`
const MAX_LITERAL_DEPTH: usize = 128;

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl LiteralParser {
    fn error(&self, what: &str) -> Error {
        Error::parse(format!("malformed action literal: {what} at offset {}", self.pos))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{want}'"))),
        }
    }

    fn value(&mut self) -> Result<Value> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.nested(Self::dict),
            Some('[') => self.nested(Self::list),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn nested(&mut self, parse: fn(&mut Self) -> Result<Value>) -> Result<Value> {
        if self.depth >= MAX_LITERAL_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn dict(&mut self) -> Result<Value> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => self.string()?,
                _ => return Err(self.error("dict keys must be strings")),
            };
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(Value::Object(map)),
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn list(&mut self) -> Result<Value> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some(']') => return Ok(Value::Array(items)),
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let escaped = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '\\' | '\'' | '"' => out.push(escaped),
                        'u' => out.push(self.unicode_escape()?),
                        '\n' => {}
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char> {
        let end = self.pos + 4;
        if end > self.chars.len() {
            return Err(self.error("short unicode escape"));
        }
        let hex: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-' | '_'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::from(i));
        }
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| self.error("invalid number"))
    }

    fn keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => {
                self.pos = start;
                Err(self.error(&format!("unknown name '{word}'")))
            }
        }
    }
}
