use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device};
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::{ModelConfig, SpecialTokensConfig};
use crate::error::InitError;
use crate::llm::models::{LlamaModel, Model};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
const SPECIAL_TOKENS_MAP_FILE: &str = "special_tokens_map.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Tokenizer plus the special tokens the checkpoint declares outside `tokenizer.json`.
pub struct LoadedTokenizer {
    pub tokenizer: Tokenizer,
    pub special_tokens: SpecialTokensConfig,
    pub eos_token_id: Option<u32>,
}

/// Produces the artifacts the model store is populated with.
pub trait ModelLoader {
    fn describe(&self) -> String;

    fn load_tokenizer(&self) -> Result<LoadedTokenizer, InitError>;

    fn load_model(&self, device: &Device) -> Result<Box<dyn Model>, InitError>;
}

/// Where checkpoint artifacts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Directory with `config.json`, `tokenizer.json` and safetensors weights.
    Local(PathBuf),
    /// HuggingFace Hub model repository, downloaded into the local hub cache.
    Hub { repo: String, revision: String },
}

impl ModelSource {
    fn artifacts(&self) -> Result<Artifacts<'_>, InitError> {
        match self {
            ModelSource::Local(dir) => Ok(Artifacts::Local(dir)),
            ModelSource::Hub { repo, revision } => {
                let api = Api::new()?;
                Ok(Artifacts::Hub(api.repo(Repo::with_revision(
                    repo.clone(),
                    RepoType::Model,
                    revision.clone(),
                ))))
            }
        }
    }
}

/// File resolver for one load; the Hub client is built once and reused for every file.
enum Artifacts<'a> {
    Local(&'a Path),
    Hub(ApiRepo),
}

impl Artifacts<'_> {
    fn fetch(&self, file: &str) -> Result<PathBuf, InitError> {
        match self {
            Artifacts::Local(dir) => {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(InitError::MissingArtifact(path))
                }
            }
            Artifacts::Hub(repo) => Ok(repo.get(file)?),
        }
    }

    fn fetch_optional(&self, file: &str) -> Option<PathBuf> {
        match self.fetch(file) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(file, "optional artifact unavailable: {e}");
                None
            }
        }
    }

    fn model_config(&self) -> Result<ModelConfig, InitError> {
        let path = self.fetch(CONFIG_FILE)?;
        Ok(serde_json::from_reader::<File, ModelConfig>(File::open(path)?)?)
    }

    /// `tokenizer_config.json` entries, gaps filled from `special_tokens_map.json`.
    fn special_tokens(&self) -> Result<SpecialTokensConfig, InitError> {
        let mut merged = SpecialTokensConfig::default();
        for file in [TOKENIZER_CONFIG_FILE, SPECIAL_TOKENS_MAP_FILE] {
            if let Some(path) = self.fetch_optional(file) {
                let declared: SpecialTokensConfig = serde_json::from_reader(File::open(path)?)?;
                merged = merged.or(declared);
            }
        }
        Ok(merged)
    }

    /// A single `model.safetensors`, or every shard named by the index file.
    fn weight_files(&self) -> Result<Vec<PathBuf>, InitError> {
        let single_err = match self.fetch(WEIGHTS_FILE) {
            Ok(path) => return Ok(vec![path]),
            Err(err) => err,
        };
        let Ok(index_path) = self.fetch(WEIGHTS_INDEX_FILE) else {
            return Err(single_err);
        };

        let index: serde_json::Value = serde_json::from_reader(File::open(&index_path)?)?;
        let shards: BTreeSet<&str> = index
            .get("weight_map")
            .and_then(serde_json::Value::as_object)
            .map(|map| map.values().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default();
        if shards.is_empty() {
            return Err(InitError::InvalidIndex(index_path));
        }

        shards.into_iter().map(|shard| self.fetch(shard)).collect()
    }
}

impl ModelLoader for ModelSource {
    fn describe(&self) -> String {
        match self {
            ModelSource::Local(dir) => dir.display().to_string(),
            ModelSource::Hub { repo, revision } => format!("{repo}@{revision}"),
        }
    }

    fn load_tokenizer(&self) -> Result<LoadedTokenizer, InitError> {
        let artifacts = self.artifacts()?;
        let path = artifacts.fetch(TOKENIZER_FILE)?;
        let tokenizer = Tokenizer::from_file(&path).map_err(|e| InitError::Tokenizer(e.to_string()))?;
        Ok(LoadedTokenizer {
            tokenizer,
            special_tokens: artifacts.special_tokens()?,
            eos_token_id: artifacts.model_config()?.eos_token_id(),
        })
    }

    fn load_model(&self, device: &Device) -> Result<Box<dyn Model>, InitError> {
        let artifacts = self.artifacts()?;
        let cfg = artifacts.model_config()?;
        let files = artifacts.weight_files()?;
        let weights = load_weights_mmap(&files)?;
        let dtype = dtype_for(device);

        let model = LlamaModel::new(&weights, &cfg, device, dtype)?;
        info!(
            layers = model.num_layers(),
            vocab = cfg.vocab_size,
            shards = files.len(),
            ?dtype,
            "model weights loaded"
        );
        Ok(Box::new(model))
    }
}

fn load_weights_mmap(paths: &[PathBuf]) -> Result<MmapedSafetensors, InitError> {
    // SAFETY: checkpoint files are treated as read-only for the process lifetime.
    let weights = match paths {
        [single] => unsafe { MmapedSafetensors::new(single)? },
        shards => unsafe { MmapedSafetensors::multi(shards)? },
    };
    Ok(weights)
}

/// Half precision on accelerators, full precision on CPU.
pub fn dtype_for(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::F16
    }
}

pub fn select_device(force_cpu: bool) -> candle_core::Result<Device> {
    if force_cpu {
        Ok(Device::Cpu)
    } else {
        Device::cuda_if_available(0)
    }
}

pub fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

/// Tokenizer and model slots, written once by the initializer and read-only afterwards.
pub struct ModelStore {
    device: Device,
    tokenizer: OnceLock<Tokenizer>,
    model: OnceLock<Box<dyn Model>>,
}

impl ModelStore {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            tokenizer: OnceLock::new(),
            model: OnceLock::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn tokenizer(&self) -> Option<&Tokenizer> {
        self.tokenizer.get()
    }

    pub fn model(&self) -> Option<&dyn Model> {
        self.model.get().map(|model| model.as_ref())
    }

    pub fn tokenizer_loaded(&self) -> bool {
        self.tokenizer.get().is_some()
    }

    pub fn model_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    pub(crate) fn set_tokenizer(&self, tokenizer: Tokenizer) -> Result<(), InitError> {
        self.tokenizer.set(tokenizer).map_err(|_| InitError::AlreadyInitialized)
    }

    pub(crate) fn set_model(&self, model: Box<dyn Model>) -> Result<(), InitError> {
        self.model.set(model).map_err(|_| InitError::AlreadyInitialized)
    }
}
