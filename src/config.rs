use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::llm::store::ModelSource;

/// The subset of a HuggingFace Llama `config.json` the forward pass needs.
#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
    #[serde(default)]
    pub eos_token_id: Option<EosTokenId>,
    #[serde(rename = "hidden_act", default = "default_hidden_act")]
    pub hidden_activation: String,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    pub vocab_size: usize,
}

/// Llama 3 style configs list several end-of-sequence ids.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum EosTokenId {
    Single(u32),
    Multiple(Vec<u32>),
}

impl EosTokenId {
    pub fn first(&self) -> Option<u32> {
        match self {
            EosTokenId::Single(id) => Some(*id),
            EosTokenId::Multiple(ids) => ids.first().copied(),
        }
    }
}

impl ModelConfig {
    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id.as_ref().and_then(EosTokenId::first)
    }
}

/// Special tokens declared in `tokenizer_config.json` or `special_tokens_map.json`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialTokensConfig {
    #[serde(default)]
    pub pad_token: Option<SpecialToken>,
    #[serde(default)]
    pub eos_token: Option<SpecialToken>,
}

/// Either a bare token string or a serialized `AddedToken` object.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    pub fn content(&self) -> &str {
        match self {
            SpecialToken::Text(text) => text,
            SpecialToken::Added { content } => content,
        }
    }
}

impl SpecialTokensConfig {
    pub fn pad_token(&self) -> Option<&str> {
        self.pad_token.as_ref().map(SpecialToken::content)
    }

    pub fn eos_token(&self) -> Option<&str> {
        self.eos_token.as_ref().map(SpecialToken::content)
    }

    /// Keeps entries already set and fills the gaps from `other`.
    pub fn or(self, other: SpecialTokensConfig) -> SpecialTokensConfig {
        SpecialTokensConfig {
            pad_token: self.pad_token.or(other.pad_token),
            eos_token: self.eos_token.or(other.eos_token),
        }
    }
}

fn default_hidden_act() -> String {
    "silu".to_string()
}

fn default_rms_norm_eps() -> f64 {
    1e-6
}

fn default_rope_theta() -> f32 {
    10_000.0
}

/// Process configuration, read from the environment at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub model_repo: Option<String>,
    pub model_revision: String,
    pub static_dir: PathBuf,
    pub force_cpu: bool,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("invalid PORT value: {raw:?}"))?,
            None => 5059,
        };

        let force_cpu = match lookup("FORCE_CPU") {
            Some(raw) => parse_flag(&raw).with_context(|| format!("invalid FORCE_CPU value: {raw:?}"))?,
            None => false,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            model_path: lookup("MODEL_PATH").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("model")),
            model_repo: lookup("MODEL_REPO").filter(|repo| !repo.trim().is_empty()),
            model_revision: lookup("MODEL_REVISION").unwrap_or_else(|| "main".to_string()),
            static_dir: lookup("STATIC_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("static")),
            force_cpu,
        })
    }

    /// Hub repo wins over the local directory when both are configured.
    pub fn model_source(&self) -> ModelSource {
        match &self.model_repo {
            Some(repo) => ModelSource::Hub {
                repo: repo.clone(),
                revision: self.model_revision.clone(),
            },
            None => ModelSource::Local(self.model_path.clone()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}
