#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::{DType, Device, Result as CandleResult, Tensor};
use codegen_serve::config::SpecialTokensConfig;
use codegen_serve::error::InitError;
use codegen_serve::llm::models::Model;
use codegen_serve::llm::store::{LoadedTokenizer, ModelLoader};
use tokenizers::Tokenizer;

pub const VOCAB: &[&str] = &["</s>", "[UNK]", "fn", "main", "(", ")", "{", "}", "let", "x", "=", "1", ";"];
pub const EOS_ID: u32 = 0;

pub fn tokenizer_json() -> String {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), serde_json::json!(id)))
        .collect();

    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [{
            "id": EOS_ID,
            "content": "</s>",
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        }],
        "normalizer": null,
        "pre_tokenizer": {"type": "WhitespaceSplit"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    })
    .to_string()
}

pub fn tokenizer() -> Tokenizer {
    Tokenizer::from_bytes(tokenizer_json().as_bytes()).unwrap()
}

/// Logits are a one-hot of the input ids, so argmax echoes the prompt.
pub struct IdentityModel {
    pub calls: Arc<AtomicUsize>,
}

impl Model for IdentityModel {
    fn forward(&self, input_ids: &Tensor, _attention_mask: &Tensor) -> CandleResult<Tensor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let vocab = VOCAB.len();
        let rows = input_ids.to_vec2::<u32>()?;
        let (batch, seq) = (rows.len(), rows[0].len());
        let mut logits = vec![0f32; batch * seq * vocab];
        for (b, row) in rows.iter().enumerate() {
            for (s, &id) in row.iter().enumerate() {
                logits[(b * seq + s) * vocab + id as usize] = 1.0;
            }
        }
        Tensor::from_vec(logits, (batch, seq, vocab), input_ids.device())
    }
}

pub struct FailingModel;

impl Model for FailingModel {
    fn forward(&self, _input_ids: &Tensor, _attention_mask: &Tensor) -> CandleResult<Tensor> {
        Err(candle_core::Error::msg("device lost"))
    }
}

pub enum StubModel {
    Identity,
    Failing,
    LoadError,
}

/// Loader that hands out an in-memory tokenizer and a stub model.
pub struct StubLoader {
    pub model: StubModel,
    pub calls: Arc<AtomicUsize>,
}

impl StubLoader {
    pub fn new(model: StubModel) -> Self {
        Self {
            model,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ModelLoader for StubLoader {
    fn describe(&self) -> String {
        "stub".to_string()
    }

    fn load_tokenizer(&self) -> Result<LoadedTokenizer, InitError> {
        Ok(LoadedTokenizer {
            tokenizer: tokenizer(),
            special_tokens: SpecialTokensConfig::default(),
            eos_token_id: Some(EOS_ID),
        })
    }

    fn load_model(&self, _device: &Device) -> Result<Box<dyn Model>, InitError> {
        match self.model {
            StubModel::Identity => Ok(Box::new(IdentityModel {
                calls: Arc::clone(&self.calls),
            })),
            StubModel::Failing => Ok(Box::new(FailingModel)),
            StubModel::LoadError => Err(InitError::Model(candle_core::Error::msg("weights truncated"))),
        }
    }
}

/// Writes a one-layer Llama checkpoint with random weights into `dir`.
pub fn write_tiny_llama(dir: &Path, with_lm_head: bool, tie_word_embeddings: bool) -> CandleResult<()> {
    const HIDDEN: usize = 8;
    const HEADS: usize = 2;
    const KV_HEADS: usize = 1;
    const INTERMEDIATE: usize = 16;
    let head_dim = HIDDEN / HEADS;
    let vocab = VOCAB.len();
    let device = Device::Cpu;

    let randn = |shape: &[usize]| Tensor::randn(0f32, 0.02, shape, &device);
    let ones = |len: usize| Tensor::ones(len, DType::F32, &device);

    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    tensors.insert("model.embed_tokens.weight".into(), randn(&[vocab, HIDDEN])?);
    let prefix = "model.layers.0";
    tensors.insert(format!("{prefix}.self_attn.q_proj.weight"), randn(&[HEADS * head_dim, HIDDEN])?);
    tensors.insert(format!("{prefix}.self_attn.k_proj.weight"), randn(&[KV_HEADS * head_dim, HIDDEN])?);
    tensors.insert(format!("{prefix}.self_attn.v_proj.weight"), randn(&[KV_HEADS * head_dim, HIDDEN])?);
    tensors.insert(format!("{prefix}.self_attn.o_proj.weight"), randn(&[HIDDEN, HEADS * head_dim])?);
    tensors.insert(format!("{prefix}.mlp.gate_proj.weight"), randn(&[INTERMEDIATE, HIDDEN])?);
    tensors.insert(format!("{prefix}.mlp.up_proj.weight"), randn(&[INTERMEDIATE, HIDDEN])?);
    tensors.insert(format!("{prefix}.mlp.down_proj.weight"), randn(&[HIDDEN, INTERMEDIATE])?);
    tensors.insert(format!("{prefix}.input_layernorm.weight"), ones(HIDDEN)?);
    tensors.insert(format!("{prefix}.post_attention_layernorm.weight"), ones(HIDDEN)?);
    tensors.insert("model.norm.weight".into(), ones(HIDDEN)?);
    if with_lm_head {
        tensors.insert("lm_head.weight".into(), randn(&[vocab, HIDDEN])?);
    }
    candle_core::safetensors::save(&tensors, dir.join("model.safetensors"))?;

    let config = serde_json::json!({
        "architectures": ["LlamaForCausalLM"],
        "hidden_act": "silu",
        "hidden_size": HIDDEN,
        "intermediate_size": INTERMEDIATE,
        "num_attention_heads": HEADS,
        "num_key_value_heads": KV_HEADS,
        "num_hidden_layers": 1,
        "rms_norm_eps": 1e-5,
        "rope_theta": 10000.0,
        "tie_word_embeddings": tie_word_embeddings,
        "vocab_size": vocab,
        "bos_token_id": 1,
        "eos_token_id": EOS_ID
    });
    std::fs::write(dir.join("config.json"), config.to_string())?;
    std::fs::write(dir.join("tokenizer.json"), tokenizer_json())?;
    Ok(())
}
