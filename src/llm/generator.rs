use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device};
use tokenizers::Tokenizer;

use crate::config::{DevicePreference, ModelSettings};
use crate::llm::hub::ModelFiles;
use crate::llm::inference::{self, SamplingParams};
use crate::llm::model_config::{GenerationConfig, ModelConfig};
use crate::llm::models::LlamaModel;
use crate::llm::LlmError;

pub const DEFAULT_MAX_LENGTH: usize = 50;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub max_length: usize,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            temperature: None,
            top_p: None,
            seed: DEFAULT_SEED,
        }
    }
}

/// Prompt in, text out. Implementations are shared across request handlers
/// and the scheduler, and are called from blocking threads.
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Decoding settings to use when the caller does not override them.
    fn default_options(&self) -> GenerationOptions {
        GenerationOptions::default()
    }

    /// The prompt followed by its continuation.
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError>;

    /// Only the newly generated text.
    fn generate_continuation(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError>;
}

pub struct LlamaGenerator {
    model: LlamaModel,
    tokenizer: Tokenizer,
    model_name: String,
    eos_token_ids: Vec<u32>,
    max_position_embeddings: usize,
    defaults: GenerationOptions,
}

impl LlamaGenerator {
    /// Resolves, downloads if needed, and loads the configured checkpoint.
    pub fn load(settings: &ModelSettings) -> Result<Self, LlmError> {
        let files = ModelFiles::resolve(
            &settings.name,
            &settings.revision,
            settings.hf_token.as_deref(),
        )?;
        let device = select_device(settings.device)?;
        Self::from_files(&settings.name, &files, &device)
    }

    pub fn from_files(name: &str, files: &ModelFiles, device: &Device) -> Result<Self, LlmError> {
        let config = ModelConfig::from_file(&files.config)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer)?;

        let defaults = match &files.generation_config {
            Some(path) => {
                let (temperature, top_p) = GenerationConfig::from_file(path)?.sampling().unzip();
                GenerationOptions {
                    temperature,
                    top_p: top_p.flatten(),
                    ..Default::default()
                }
            }
            None => GenerationOptions::default(),
        };

        // f16 halves memory on GPU; the CPU kernels are faster in f32.
        let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };

        let weights = unsafe { MmapedSafetensors::multi(&files.weights)? };
        let model = LlamaModel::new(&weights, &config, device, dtype)?;

        tracing::info!(
            model = name,
            layers = config.num_hidden_layers,
            vocab = config.vocab_size,
            ?dtype,
            temperature = ?defaults.temperature,
            top_p = ?defaults.top_p,
            "model loaded"
        );

        Ok(Self {
            model,
            tokenizer,
            model_name: name.to_string(),
            eos_token_ids: config.eos_token_ids(),
            max_position_embeddings: config.max_position_embeddings,
            defaults,
        })
    }

    /// Returns the full token sequence and the prompt's length within it.
    fn run(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<(Vec<u32>, usize), LlmError> {
        let encoding = self.tokenizer.encode(prompt, true)?;
        let prompt_ids = encoding.get_ids();
        if prompt_ids.len() >= self.max_position_embeddings {
            return Err(LlmError::PromptTooLong {
                tokens: prompt_ids.len(),
                limit: self.max_position_embeddings,
            });
        }

        let params = SamplingParams {
            max_length: options.max_length.min(self.max_position_embeddings),
            temperature: options.temperature,
            top_p: options.top_p,
            seed: options.seed,
        };

        let output_ids =
            inference::generate(prompt_ids, &self.model, &params, &self.eos_token_ids)?;

        tracing::debug!(
            prompt_tokens = prompt_ids.len(),
            generated_tokens = output_ids.len() - prompt_ids.len(),
            "generation finished"
        );

        Ok((output_ids, prompt_ids.len()))
    }
}

impl TextGenerator for LlamaGenerator {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn default_options(&self) -> GenerationOptions {
        self.defaults
    }

    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
        let (output_ids, _) = self.run(prompt, options)?;
        Ok(self.tokenizer.decode(&output_ids, true)?)
    }

    fn generate_continuation(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LlmError> {
        let (output_ids, prompt_len) = self.run(prompt, options)?;
        Ok(self.tokenizer.decode(&output_ids[prompt_len..], true)?)
    }
}

pub fn select_device(preference: DevicePreference) -> Result<Device, LlmError> {
    let device = match preference {
        DevicePreference::Auto => Device::cuda_if_available(0)?,
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => Device::new_cuda(0)?,
    };
    Ok(device)
}
