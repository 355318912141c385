use crate::error::PromptError;

pub const MAX_PROMPT_CHARS: usize = 512;

/// A prompt that passed boundary validation (1 to 512 characters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn parse(text: impl Into<String>) -> Result<Self, PromptError> {
        let text = text.into();
        // Character count, not bytes.
        let len = text.chars().count();
        if len == 0 {
            return Err(PromptError::Empty);
        }
        if len > MAX_PROMPT_CHARS {
            return Err(PromptError::TooLong { len, max: MAX_PROMPT_CHARS });
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
