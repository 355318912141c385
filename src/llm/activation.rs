use candle_core::{Result as CandleResult, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Gelu,
    Relu,
    Silu,
}

impl Activation {
    /// Maps a `hidden_act` name from `config.json`.
    pub fn parse(name: &str) -> CandleResult<Self> {
        match name {
            "gelu" | "gelu_new" | "gelu_pytorch_tanh" => Ok(Activation::Gelu),
            "relu" => Ok(Activation::Relu),
            "silu" | "swish" => Ok(Activation::Silu),
            other => Err(candle_core::Error::msg(format!(
                "unsupported activation function: {other}"
            ))),
        }
    }

    pub fn apply(&self, input: &Tensor) -> CandleResult<Tensor> {
        match self {
            Activation::Gelu => input.gelu(),
            Activation::Relu => input.relu(),
            Activation::Silu => input.silu(),
        }
    }
}
