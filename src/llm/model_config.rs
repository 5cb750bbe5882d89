use std::path::Path;

use serde::Deserialize;

use crate::llm::LlmError;

/// `config.json` of a Llama-family checkpoint. Older checkpoints omit
/// `rope_theta` and `attention_bias`, so those fall back to the Llama-2 values.
#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
    #[serde(default)]
    pub attention_bias: bool,
    pub eos_token_id: Option<EosTokenId>,
    #[serde(rename = "hidden_act", default = "default_hidden_activation")]
    pub hidden_activation: String,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub num_key_value_heads: Option<usize>,
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    pub vocab_size: usize,
}

/// Some configs carry a single EOS id, newer ones a list.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum EosTokenId {
    Single(u32),
    Multiple(Vec<u32>),
}

fn default_hidden_activation() -> String {
    "silu".to_string()
}

fn default_max_position_embeddings() -> usize {
    4096
}

fn default_rope_theta() -> f32 {
    10_000.0
}

impl ModelConfig {
    pub fn from_file(path: &Path) -> Result<Self, LlmError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn num_key_value_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    pub fn eos_token_ids(&self) -> Vec<u32> {
        match &self.eos_token_id {
            Some(EosTokenId::Single(id)) => vec![*id],
            Some(EosTokenId::Multiple(ids)) => ids.clone(),
            None => Vec::new(),
        }
    }
}

/// Decoding defaults shipped next to the checkpoint in `generation_config.json`.
/// Absent keys take the Hugging Face defaults: greedy, temperature 1, no top-p.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    #[serde(default)]
    pub do_sample: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl GenerationConfig {
    pub fn from_file(path: &Path) -> Result<Self, LlmError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// `(temperature, top_p)` to sample with, or `None` for greedy decoding.
    pub fn sampling(&self) -> Option<(f64, Option<f64>)> {
        self.do_sample.then(|| (self.temperature.unwrap_or(1.0), self.top_p))
    }
}
