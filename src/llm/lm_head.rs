use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};

use crate::llm::layer::Layer;

/// Projects hidden states onto the vocabulary.
pub struct LMHeadLayer {
    weights: Tensor,
    device: Device,
}

impl LMHeadLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let weights = weights
            .load(&format!("{}.weight", prefix), device)?
            .to_dtype(dtype)?;
        Ok(Self {
            weights,
            device: device.clone(),
        })
    }

    /// Reuses the token embedding matrix (`tie_word_embeddings`).
    pub fn tied(embedding_weights: &Tensor) -> Self {
        Self {
            weights: embedding_weights.clone(),
            device: embedding_weights.device().clone(),
        }
    }
}

impl Layer for LMHeadLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        input.broadcast_matmul(&self.weights.t()?)
    }
}
