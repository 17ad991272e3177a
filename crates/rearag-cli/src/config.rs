//! Configuration file support

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use rearag_agent::{ActionKind, AgentConfig, FinishMode, RagConfig, TruncationConfig};
use rearag_ai::{GenerationParams, PromptSet, PromptTemplate, TemplateKind};
use rearag_data::{BuildConfig, ConstructionConfig};

/// Configuration for rearag
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: Endpoints,
    pub agent: AgentSection,
    pub rag: RagSection,
    pub build: BuildSection,
    pub clean: CleanSection,
    pub prompts: PromptFiles,
}

/// Service URLs and client timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Generation endpoint serving the reasoning model
    pub agent_api: String,
    /// Generation endpoint answering from retrieved documents
    pub generation_api: String,
    pub retriever_api: String,
    pub generation_timeout_secs: u64,
    pub retrieval_timeout_secs: u64,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            agent_api: "http://127.0.0.1:8000/generate".into(),
            generation_api: "http://127.0.0.1:8001/generate".into(),
            retriever_api: "http://127.0.0.1:8002/search".into(),
            generation_timeout_secs: 360,
            retrieval_timeout_secs: 300,
        }
    }
}

impl Endpoints {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }
}

/// `[agent]`: the inference loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_iterations: u32,
    pub retry_budget: u32,
    pub allowed_actions: Vec<ActionKind>,
    pub truncate: bool,
    pub model_max_length: u32,
    pub template: TemplateKind,
    pub finish_mode: FinishMode,
    pub generation: GenerationParams,
}

impl Default for AgentSection {
    fn default() -> Self {
        let agent = AgentConfig::default();
        Self {
            max_iterations: agent.max_iterations,
            retry_budget: agent.retry_budget,
            allowed_actions: agent.allowed_actions,
            truncate: agent.truncation.enabled,
            model_max_length: agent.truncation.model_max_length,
            template: TemplateKind::Glm4,
            finish_mode: agent.finish_mode,
            generation: agent.generation,
        }
    }
}

impl AgentSection {
    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.max_iterations,
            retry_budget: self.retry_budget,
            allowed_actions: self.allowed_actions.clone(),
            generation: self.generation.clone(),
            truncation: TruncationConfig {
                enabled: self.truncate,
                model_max_length: self.model_max_length,
            },
            finish_mode: self.finish_mode,
        }
    }
}

/// `[rag]`: retrieval and answer generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSection {
    pub top_k: usize,
    pub template: TemplateKind,
    pub generation: GenerationParams,
}

impl Default for RagSection {
    fn default() -> Self {
        let rag = RagConfig::default();
        Self {
            top_k: rag.top_k,
            template: TemplateKind::Glm4,
            generation: rag.generation,
        }
    }
}

impl RagSection {
    pub fn to_rag_config(&self) -> RagConfig {
        RagConfig {
            top_k: self.top_k,
            generation: self.generation.clone(),
        }
    }
}

/// `[build]`: offline trace construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// Glob patterns of JSONL question files
    pub input_files: Vec<String>,
    pub output_dir: PathBuf,
    pub output_file: String,
    /// Keep only the first N questions; 0 keeps all
    pub n_sample: usize,
    pub num_workers: usize,
    pub save_batch_size: usize,
    /// Construction model endpoint; `endpoints.agent_api` when unset
    pub llm_api: Option<String>,
    pub max_iterations: u32,
    pub retry_budget: u32,
    pub template: TemplateKind,
    pub generation: GenerationParams,
}

impl Default for BuildSection {
    fn default() -> Self {
        let construction = ConstructionConfig::default();
        Self {
            input_files: vec!["data/*.jsonl".into()],
            output_dir: PathBuf::from("output"),
            output_file: "conversations.jsonl".into(),
            n_sample: 0,
            num_workers: 8,
            save_batch_size: 16,
            llm_api: None,
            max_iterations: construction.max_iterations,
            retry_budget: construction.retry_budget,
            template: TemplateKind::ChatMl,
            generation: construction.generation,
        }
    }
}

impl BuildSection {
    pub fn llm_api<'a>(&'a self, endpoints: &'a Endpoints) -> &'a str {
        self.llm_api.as_deref().unwrap_or(&endpoints.agent_api)
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }

    pub fn to_construction_config(&self) -> ConstructionConfig {
        ConstructionConfig {
            max_iterations: self.max_iterations,
            retry_budget: self.retry_budget,
            generation: self.generation.clone(),
            ..ConstructionConfig::default()
        }
    }

    pub fn to_build_config(&self) -> BuildConfig {
        BuildConfig {
            output_path: self.output_path(),
            num_workers: self.num_workers,
            save_batch_size: self.save_batch_size,
        }
    }
}

/// `[clean]`: trace validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanSection {
    pub input_dir: PathBuf,
    pub input_file: String,
    pub output_dir: PathBuf,
    /// Valid conversations
    pub output_file: String,
    /// Every record with its verdict
    pub output_file_validity: String,
}

impl Default for CleanSection {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("output"),
            input_file: "conversations.jsonl".into(),
            output_dir: PathBuf::from("output"),
            output_file: "conversations_clean.json".into(),
            output_file_validity: "conversations_validity.json".into(),
        }
    }
}

impl CleanSection {
    pub fn input_path(&self) -> PathBuf {
        self.input_dir.join(&self.input_file)
    }

    pub fn clean_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }

    pub fn validity_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file_validity)
    }
}

/// `[prompts]`: files replacing the built-in prompt texts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptFiles {
    pub agent_system: Option<PathBuf>,
    pub construction_system: Option<PathBuf>,
    pub long_answer: Option<PathBuf>,
    pub short_answer: Option<PathBuf>,
    pub extract_short_answer: Option<PathBuf>,
}

impl PromptFiles {
    /// Built-in prompts with every configured file applied on top
    pub fn prompt_set(&self) -> Result<PromptSet> {
        let mut set = PromptSet::default();
        let slots = [
            (&self.agent_system, &mut set.agent_system),
            (&self.construction_system, &mut set.construction_system),
            (&self.long_answer, &mut set.long_answer),
            (&self.short_answer, &mut set.short_answer),
            (&self.extract_short_answer, &mut set.extract_short_answer),
        ];
        for (path, slot) in slots {
            if let Some(path) = path {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading prompt file {}", path.display()))?;
                *slot = PromptTemplate::new(text);
            }
        }
        Ok(set)
    }
}

impl Config {
    /// Get the per-user config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rearag")
    }

    /// Resolve the config file path: explicit flag, then `REARAG_CONFIG_PATH`,
    /// then `rearag.toml` in the working directory, then the user config dir
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("REARAG_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        let local = PathBuf::from("rearag.toml");
        if local.exists() {
            return local;
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from `path`; a missing file means defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the example config to `path` unless a file is already there
    pub fn init(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating config directory {}", dir.display()))?;
        }
        fs::write(path, example_config())
            .with_context(|| format!("writing config file {}", path.display()))?;
        Ok(true)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# rearag configuration file
# Looked up from --config, $REARAG_CONFIG_PATH, ./rearag.toml, then
# ~/.config/rearag/config.toml. Every key is optional.

[endpoints]
agent_api = "http://127.0.0.1:8000/generate"
generation_api = "http://127.0.0.1:8001/generate"
retriever_api = "http://127.0.0.1:8002/search"
generation_timeout_secs = 360
retrieval_timeout_secs = 300

[agent]
max_iterations = 15
retry_budget = 20
allowed_actions = ["search", "finish"]
truncate = true
model_max_length = 7166
# glm4 or chatml
template = "glm4"
# extract: condense the model's answer; summarize: answer from all observations
finish_mode = "extract"

[agent.generation]
max_tokens = 1024
top_p = 0.85
temperature = 1.0
stop = ["<|user|>", "<|observation|>", "<|assistant|>"]

[rag]
top_k = 5
template = "glm4"

[rag.generation]
max_tokens = 1024
top_p = 0.7
temperature = 0.95
stop = ["<|user|>", "<|endoftext|>", "<|assistant|>"]

[build]
input_files = ["data/*.jsonl"]
output_dir = "output"
output_file = "conversations.jsonl"
n_sample = 0
num_workers = 8
save_batch_size = 16
# llm_api = "http://127.0.0.1:8003/generate"
max_iterations = 15
retry_budget = 20
template = "chatml"

[build.generation]
max_tokens = 256
top_p = 0.85
temperature = 0.99
skip_special_tokens = true

[clean]
input_dir = "output"
input_file = "conversations.jsonl"
output_dir = "output"
output_file = "conversations_clean.json"
output_file_validity = "conversations_validity.json"

# Replace built-in prompts with file contents (optional)
[prompts]
# agent_system = "prompts/agent_system.txt"
# construction_system = "prompts/construction_system.txt"
# long_answer = "prompts/long_answer.txt"
# short_answer = "prompts/short_answer.txt"
# extract_short_answer = "prompts/extract_short_answer.txt"
"#
}
