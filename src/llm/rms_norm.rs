use candle_core::{safetensors::MmapedSafetensors, DType, Device, Result as CandleResult, Tensor};

use crate::llm::layer::Layer;

pub struct RMSNormLayer {
    weights: Tensor,
    eps: f64,
    device: Device,
}

impl RMSNormLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        device: &Device,
        eps: f64,
        dtype: DType,
    ) -> CandleResult<Self> {
        let weights = weights_map
            .load(&format!("{}.weight", prefix), device)?
            .to_dtype(dtype)?;

        Ok(Self {
            weights,
            eps,
            device: device.clone(),
        })
    }
}

impl Layer for RMSNormLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let orig_dtype = input.dtype();

        // Variance in f32, half precision overflows on long rows.
        let input = input.to_dtype(DType::F32)?;
        let variance = input.sqr()?.mean_keepdim(candle_core::D::Minus1)?;
        let inv_rms = variance.affine(1.0, self.eps)?.sqrt()?.recip()?;
        let normed = input.broadcast_mul(&inv_rms)?.to_dtype(orig_dtype)?;

        normed.broadcast_mul(&self.weights)
    }
}
