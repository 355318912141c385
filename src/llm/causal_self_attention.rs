use candle_core::safetensors::MmapedSafetensors;
use candle_core::Result as CandleResult;
use candle_core::{DType, Device, Tensor, D};

use crate::llm::layer::Layer;
use crate::llm::linear::LinearLayer;

/// Grouped-query self-attention with rotary position embeddings.
pub struct CausalSelfAttentionLayer {
    q_proj: LinearLayer,
    k_proj: LinearLayer,
    v_proj: LinearLayer,
    o_proj: LinearLayer,
    n_heads: usize,
    n_kv_heads: usize,
    hidden_size: usize,
    rope_theta: f32,
    device: Device,
}

impl CausalSelfAttentionLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        n_heads: usize,
        n_kv_heads: usize,
        hidden_size: usize,
        rope_theta: f32,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        if n_kv_heads == 0 || n_heads % n_kv_heads != 0 || hidden_size % n_heads != 0 {
            return Err(candle_core::Error::msg(format!(
                "incompatible attention shape: hidden={hidden_size} heads={n_heads} kv_heads={n_kv_heads}"
            )));
        }

        let q_proj = LinearLayer::new(weights, &format!("{}.q_proj", prefix), device, dtype)?;
        let k_proj = LinearLayer::new(weights, &format!("{}.k_proj", prefix), device, dtype)?;
        let v_proj = LinearLayer::new(weights, &format!("{}.v_proj", prefix), device, dtype)?;
        let o_proj = LinearLayer::new(weights, &format!("{}.o_proj", prefix), device, dtype)?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            n_heads,
            n_kv_heads,
            hidden_size,
            rope_theta,
            device: device.clone(),
        })
    }

    fn rotate_half(x: &Tensor) -> CandleResult<Tensor> {
        let last_dim = x.dim(D::Minus1)?;

        let xs1 = x.narrow(D::Minus1, 0, last_dim / 2)?;
        let xs2 = x.narrow(D::Minus1, last_dim / 2, last_dim - last_dim / 2)?;

        Tensor::cat(&[&xs2.neg()?, &xs1], D::Minus1)
    }

    fn apply_rotary_emb(
        q: &Tensor,
        k: &Tensor,
        seq_len: usize,
        head_dim: usize,
        rope_theta: f32,
        device: &Device,
    ) -> CandleResult<(Tensor, Tensor)> {
        let inv_freq: Vec<f32> = (0..head_dim / 2)
            .map(|i| 1.0 / rope_theta.powf(2.0 * i as f32 / head_dim as f32))
            .collect();
        let inv_freq = Tensor::new(inv_freq.as_slice(), device)?;

        let t = Tensor::arange(0u32, seq_len as u32, device)?.to_dtype(DType::F32)?;

        // (seq_len, head_dim / 2)
        let freqs = t.unsqueeze(1)?.broadcast_mul(&inv_freq.unsqueeze(0)?)?;
        let emb = Tensor::cat(&[&freqs, &freqs], 1)?;

        let cos = emb.cos()?.to_dtype(q.dtype())?;
        let sin = emb.sin()?.to_dtype(q.dtype())?;

        // x' = x * cos + rotate_half(x) * sin
        let q_rotated = (q.broadcast_mul(&cos)? + Self::rotate_half(q)?.broadcast_mul(&sin)?)?;
        let k_rotated = (k.broadcast_mul(&cos)? + Self::rotate_half(k)?.broadcast_mul(&sin)?)?;

        Ok((q_rotated, k_rotated))
    }

    fn repeat_kv(x: Tensor, n_rep: usize) -> CandleResult<Tensor> {
        if n_rep == 1 {
            return Ok(x);
        }

        let (b_sz, n_kv_heads, seq_len, head_dim) = x.dims4()?;
        x.unsqueeze(2)?
            .expand(&[b_sz, n_kv_heads, n_rep, seq_len, head_dim])?
            .reshape(&[b_sz, n_kv_heads * n_rep, seq_len, head_dim])
    }

    /// `input` is `[batch, seq, hidden]`, `bias` the additive mask from
    /// [`attention_bias`] shaped `[batch, 1, seq, seq]`.
    pub fn forward(&self, input: &Tensor, bias: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let (b_sz, seq_len, _) = input.dims3()?;

        let head_dim = self.hidden_size / self.n_heads;
        let n_rep = self.n_heads / self.n_kv_heads;

        let q = self
            .q_proj
            .forward(&input)?
            .reshape((b_sz, seq_len, self.n_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(&input)?
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(&input)?
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, k) = Self::apply_rotary_emb(&q, &k, seq_len, head_dim, self.rope_theta, &self.device)?;

        let k = Self::repeat_kv(k, n_rep)?.contiguous()?;
        let v = Self::repeat_kv(v, n_rep)?.contiguous()?;

        let scaling = 1.0 / (head_dim as f64).sqrt();
        let attn_scores = q.matmul(&k.t()?)?.affine(scaling, 0.0)?;
        let attn_scores = attn_scores.broadcast_add(&bias.to_dtype(attn_scores.dtype())?)?;
        let attn_probs = candle_nn::ops::softmax(&attn_scores, D::Minus1)?;

        let context = attn_probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape(&[b_sz, seq_len, self.hidden_size])?;

        self.o_proj.forward(&context)
    }
}

/// Builds the additive attention bias for a `[batch, seq]` padding mask
/// (1 = real token, 0 = padding).
///
/// Query `i` sees key `j` when `j <= i` and `j` is a real token, padded queries
/// included. A query with no visible key at all (no real token at or before it)
/// gets an unmasked row instead, so its softmax stays finite.
pub fn attention_bias(attention_mask: &Tensor, dtype: DType) -> CandleResult<Tensor> {
    let rows = attention_mask.to_dtype(DType::U32)?.to_vec2::<u32>()?;
    let batch = rows.len();
    let seq_len = rows.first().map(Vec::len).unwrap_or(0);

    let mut bias = Vec::with_capacity(batch * seq_len * seq_len);
    for row in &rows {
        for i in 0..seq_len {
            let visible: Vec<bool> = row.iter().enumerate().map(|(j, &keep)| j <= i && keep != 0).collect();
            if visible.iter().any(|&v| v) {
                bias.extend(visible.iter().map(|&v| if v { 0.0 } else { f32::NEG_INFINITY }));
            } else {
                bias.extend(std::iter::repeat(0.0).take(seq_len));
            }
        }
    }

    Tensor::from_vec(bias, (batch, 1, seq_len, seq_len), attention_mask.device())?.to_dtype(dtype)
}
