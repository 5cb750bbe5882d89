pub mod activation;
pub mod causal_self_attention;
pub mod decoder;
pub mod embedding;
pub mod generator;
pub mod hub;
pub mod inference;
pub mod layer;
pub mod linear;
pub mod lm_head;
pub mod mlp;
pub mod model_config;
pub mod models;
pub mod rms_norm;

#[cfg(test)]
pub(crate) mod testing;

pub use generator::{GenerationOptions, LlamaGenerator, TextGenerator};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("invalid model config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model files missing: {0}")]
    MissingFiles(String),

    #[error("prompt is {tokens} tokens, the model's context holds {limit}")]
    PromptTooLong { tokens: usize, limit: usize },
}

impl From<tokenizers::Error> for LlmError {
    fn from(err: tokenizers::Error) -> Self {
        LlmError::Tokenizer(err.to_string())
    }
}
