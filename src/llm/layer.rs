use candle_core::Result as CandleResult;
use candle_core::Tensor;

/// A single stage of the network mapping hidden states to hidden states.
pub trait Layer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor>;
}
