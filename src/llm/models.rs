use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_nn::var_builder::SimpleBackend;
use tracing::debug;

use crate::config::ModelConfig;
use crate::llm::causal_self_attention::attention_bias;
use crate::llm::decoder::DecoderLayer;
use crate::llm::embedding::EmbeddingLayer;
use crate::llm::layer::Layer;
use crate::llm::lm_head::LMHeadLayer;
use crate::llm::rms_norm::RMSNormLayer;

/// A causal language model: token ids in, next-token logits for every position out.
pub trait Model: Send + Sync {
    /// `input_ids` and `attention_mask` are `[batch, seq]` (u32); the result is
    /// `[batch, seq, vocab]`.
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> CandleResult<Tensor>;
}

pub struct LlamaModel {
    embed_layer: EmbeddingLayer,
    decoder_layers: Vec<DecoderLayer>,
    norm_layer: RMSNormLayer,
    lm_head: LMHeadLayer,
    device: Device,
    dtype: DType,
}

impl LlamaModel {
    pub fn new(
        weights: &MmapedSafetensors,
        config: &ModelConfig,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let embed_layer = EmbeddingLayer::new(weights, device, "model.embed_tokens", dtype)?;

        let decoder_layers = (0..config.num_hidden_layers)
            .map(|layer_idx| {
                DecoderLayer::new(weights, &format!("model.layers.{}", layer_idx), config, device, dtype)
            })
            .collect::<CandleResult<Vec<_>>>()?;

        let norm_layer = RMSNormLayer::new(weights, "model.norm", device, config.rms_norm_eps, dtype)?;

        let lm_head = if weights.contains_tensor("lm_head.weight") {
            LMHeadLayer::new(weights, "lm_head", device, dtype)?
        } else if config.tie_word_embeddings {
            debug!("lm_head.weight absent, tying to token embeddings");
            LMHeadLayer::tied(embed_layer.weights())
        } else {
            return Err(candle_core::Error::msg(
                "checkpoint has no lm_head.weight and tie_word_embeddings is false",
            ));
        };

        Ok(Self {
            embed_layer,
            decoder_layers,
            norm_layer,
            lm_head,
            device: device.clone(),
            dtype,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.decoder_layers.len()
    }
}

impl Model for LlamaModel {
    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> CandleResult<Tensor> {
        let input_ids = input_ids.to_device(&self.device)?;
        let bias = attention_bias(&attention_mask.to_device(&self.device)?, self.dtype)?;

        let mut hidden_states = self.embed_layer.forward(&input_ids)?;
        for layer in &self.decoder_layers {
            hidden_states = layer.forward(&hidden_states, &bias)?;
        }

        let normed_output = self.norm_layer.forward(&hidden_states)?;
        self.lm_head.forward(&normed_output)
    }
}
