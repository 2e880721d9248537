use extract::SamplingConfig;
use ingest::DatasetSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use summarize::{SummaryJob, SummaryMode};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: String,
    /// Isolation key of the graph written by `merge`.
    pub exp_name: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub model: ModelConfig,
    pub extraction: ExtractionConfig,
    pub summarization: SummarizationConfig,
    pub neo4j: Neo4jConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// Inferred from the model name when unset: "gpt*" models go to OpenAI.
    pub backend: Option<Backend>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub save_every: usize,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    pub mode: SummaryMode,
    pub group_size: Option<usize>,
    pub save_every: usize,
    pub max_reviews: Option<usize>,
    pub sampling: SamplingConfig,
    /// Aspect -> example summaries for `fewshot`.
    pub examples: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset: "space".to_string(),
            exp_name: "default".to_string(),
            log_level: "info".to_string(),
            log_file: None,
            model: ModelConfig::default(),
            extraction: ExtractionConfig::default(),
            summarization: SummarizationConfig::default(),
            neo4j: Neo4jConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "mistral".to_string(),
            backend: None,
            base_url: None,
            api_key: None,
            request_timeout_secs: 120,
            max_retries: 5,
            retry_wait_secs: 1,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            save_every: 1,
            sampling: SamplingConfig::default(),
        }
    }
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            mode: SummaryMode::ZeroShot,
            group_size: None,
            save_every: 1,
            max_reviews: None,
            sampling: SamplingConfig {
                max_tokens: 256,
                ..SamplingConfig::default()
            },
            examples: HashMap::new(),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

impl ModelConfig {
    pub fn backend(&self) -> Backend {
        self.backend.unwrap_or_else(|| {
            if self.name.contains("gpt") { Backend::OpenAi } else { Backend::Ollama }
        })
    }

    pub fn base_url(&self) -> String {
        match (&self.base_url, self.backend()) {
            (Some(url), _) => url.clone(),
            (None, Backend::Ollama) => "http://localhost:11434".to_string(),
            (None, Backend::OpenAi) => "https://api.openai.com/v1".to_string(),
        }
    }
}

impl SummarizationConfig {
    pub fn job(&self) -> SummaryJob {
        SummaryJob {
            mode: self.mode,
            group_size: self.group_size,
            save_every: self.save_every,
            max_reviews: self.max_reviews,
            sampling: self.sampling.clone(),
            examples: self.examples.clone(),
        }
    }
}

impl PipelineConfig {
    /// Read a TOML file. Without a path the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the dataset schema, checking every setting a run depends on.
    pub fn validate(&self) -> Result<DatasetSchema, ConfigError> {
        let schema = DatasetSchema::by_name(&self.dataset).map_err(|e| ConfigError::Invalid {
            field: "dataset",
            reason: e.to_string(),
        })?;

        let invalid = |field: &'static str, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };

        if self.exp_name.trim().is_empty() {
            return Err(invalid("exp_name", "must not be empty"));
        }
        if self.model.name.trim().is_empty() {
            return Err(invalid("model.name", "must not be empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(invalid("model.request_timeout_secs", "must be positive"));
        }
        if self.model.max_retries == 0 {
            return Err(invalid("model.max_retries", "must be at least 1"));
        }
        if self.extraction.save_every == 0 {
            return Err(invalid("extraction.save_every", "must be at least 1"));
        }
        if self.summarization.save_every == 0 {
            return Err(invalid("summarization.save_every", "must be at least 1"));
        }
        if matches!(self.summarization.group_size, Some(size) if size < 2) {
            return Err(invalid("summarization.group_size", "must be at least 2"));
        }
        if self.summarization.max_reviews == Some(0) {
            return Err(invalid("summarization.max_reviews", "must be at least 1"));
        }
        if self.merge.workers == 0 {
            return Err(invalid("merge.workers", "must be at least 1"));
        }
        for (field, sampling) in [
            ("extraction.sampling", &self.extraction.sampling),
            ("summarization.sampling", &self.summarization.sampling),
        ] {
            if sampling.temperature < 0.0 || !(sampling.top_p > 0.0 && sampling.top_p <= 1.0) {
                return Err(invalid(field, "temperature must be >= 0 and top_p in (0, 1]"));
            }
        }

        Ok(schema)
    }
}
