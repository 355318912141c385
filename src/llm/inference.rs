use candle_core::Result as CandleResult;
use candle_core::{Device, Tensor, D};
use tokenizers::{PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, warn};

use crate::config::SpecialTokensConfig;
use crate::error::InitError;
use crate::llm::models::Model;

/// Every prompt is encoded to exactly this many positions.
pub const SEQUENCE_LENGTH: usize = 256;

/// Token ids and padding mask of one prompt, both `SEQUENCE_LENGTH` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedEncoding {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

/// Makes `tokenizer` pad and truncate every encoding to [`SEQUENCE_LENGTH`].
///
/// A padding section already present in `tokenizer.json` is kept. Otherwise the
/// `pad_token` declared in the tokenizer side files is used, and when none is
/// designated the end-of-sequence token stands in for it: by name from the side
/// files first, then by `config.json` id.
pub fn configure_fixed_length(
    tokenizer: &mut Tokenizer,
    special_tokens: &SpecialTokensConfig,
    eos_token_id: Option<u32>,
) -> Result<(), InitError> {
    let (pad_id, pad_token) = resolve_pad_token(tokenizer, special_tokens, eos_token_id)?;

    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(SEQUENCE_LENGTH),
        direction: PaddingDirection::Right,
        pad_id,
        pad_token,
        ..Default::default()
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: SEQUENCE_LENGTH,
            ..Default::default()
        }))
        .map_err(|e| InitError::Tokenizer(e.to_string()))?;

    Ok(())
}

fn resolve_pad_token(
    tokenizer: &Tokenizer,
    special_tokens: &SpecialTokensConfig,
    eos_token_id: Option<u32>,
) -> Result<(u32, String), InitError> {
    if let Some(existing) = tokenizer.get_padding() {
        return Ok((existing.pad_id, existing.pad_token.clone()));
    }

    if let Some(token) = special_tokens.pad_token() {
        match tokenizer.token_to_id(token) {
            Some(id) => return Ok((id, token.to_string())),
            None => warn!(pad_token = token, "declared padding token is not in the vocabulary"),
        }
    }

    let (eos, token) = special_tokens
        .eos_token()
        .and_then(|token| tokenizer.token_to_id(token).map(|id| (id, token.to_string())))
        .or_else(|| eos_token_id.and_then(|id| tokenizer.id_to_token(id).map(|token| (id, token))))
        .ok_or(InitError::NoPadToken)?;
    debug!(pad_id = eos, pad_token = %token, "using end-of-sequence token for padding");
    Ok((eos, token))
}

/// Encodes without special tokens into a fixed-length sequence.
pub fn encode_fixed(tokenizer: &Tokenizer, prompt: &str) -> CandleResult<FixedEncoding> {
    let encoding = tokenizer
        .encode(prompt, false)
        .map_err(|e| candle_core::Error::msg(e.to_string()))?;

    let ids = encoding.get_ids().to_vec();
    let attention_mask = encoding.get_attention_mask().to_vec();
    if ids.len() != SEQUENCE_LENGTH || attention_mask.len() != SEQUENCE_LENGTH {
        return Err(candle_core::Error::msg(format!(
            "tokenizer produced {} positions, expected {SEQUENCE_LENGTH}",
            ids.len()
        )));
    }

    Ok(FixedEncoding { ids, attention_mask })
}

/// Runs one forward pass and takes the argmax independently at every position.
///
/// Later positions are conditioned on the prompt encoding only, never on tokens
/// picked for earlier positions.
pub fn greedy_token_ids(
    prompt: &str,
    tokenizer: &Tokenizer,
    model: &dyn Model,
    device: &Device,
) -> CandleResult<Vec<u32>> {
    let encoded = encode_fixed(tokenizer, prompt)?;
    let real_tokens = encoded.attention_mask.iter().filter(|&&m| m != 0).count();
    debug!(real_tokens, "prompt encoded");

    let input_ids = Tensor::from_slice(&encoded.ids, (1, SEQUENCE_LENGTH), device)?;
    let attention_mask = Tensor::from_slice(&encoded.attention_mask, (1, SEQUENCE_LENGTH), device)?;

    let logits = model.forward(&input_ids, &attention_mask)?;
    let (batch, positions, _vocab) = logits.dims3()?;
    if batch != 1 || positions != SEQUENCE_LENGTH {
        return Err(candle_core::Error::msg(format!(
            "model returned logits for {batch}x{positions} positions, expected 1x{SEQUENCE_LENGTH}"
        )));
    }

    logits.argmax(D::Minus1)?.squeeze(0)?.to_vec1::<u32>()
}

pub fn generate(prompt: &str, tokenizer: &Tokenizer, model: &dyn Model, device: &Device) -> CandleResult<String> {
    let token_ids = greedy_token_ids(prompt, tokenizer, model, device)?;
    tokenizer
        .decode(&token_ids, true)
        .map_err(|e| candle_core::Error::msg(e.to_string()))
}
