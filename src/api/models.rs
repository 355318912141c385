use serde::{Deserialize, Serialize};

use crate::error::GenerateError;

/// `prompt` arrives either as a query parameter or as a JSON body field.
#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

/// Envelope shared by both generate transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<String, GenerateError>> for GenerateResponse {
    fn from(result: Result<String, GenerateError>) -> Self {
        match result {
            Ok(text) => Self {
                status: true,
                generated_code: Some(text),
                error: None,
            },
            Err(e) => Self {
                status: false,
                generated_code: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationErrorResponse {
    pub detail: String,
}
