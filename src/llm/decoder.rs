use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};

use crate::llm::activation::Activation;
use crate::llm::causal_self_attention::{CausalSelfAttentionLayer, KVCache};
use crate::llm::layer::Layer;
use crate::llm::mlp::MlpLayer;
use crate::llm::model_config::ModelConfig;
use crate::llm::rms_norm::RMSNormLayer;

pub struct DecoderLayer {
    pub self_attn: CausalSelfAttentionLayer,
    pub mlp: MlpLayer,
    pub input_norm: RMSNormLayer,
    pub post_attention_norm: RMSNormLayer,
    pub device: Device,
}

impl DecoderLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        config: &ModelConfig,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let self_attn = CausalSelfAttentionLayer::new(
            weights,
            &format!("{prefix}.self_attn"),
            config,
            device,
            dtype,
        )?;

        let mlp = MlpLayer::new(
            weights,
            &format!("{prefix}.mlp"),
            device,
            dtype,
            config.hidden_activation.parse::<Activation>()?,
        )?;

        let input_norm = RMSNormLayer::new(
            weights,
            &format!("{prefix}.input_layernorm"),
            device,
            config.rms_norm_eps,
            dtype,
        )?;

        let post_attention_norm = RMSNormLayer::new(
            weights,
            &format!("{prefix}.post_attention_layernorm"),
            device,
            config.rms_norm_eps,
            dtype,
        )?;

        Ok(Self {
            self_attn,
            mlp,
            input_norm,
            post_attention_norm,
            device: device.clone(),
        })
    }

    pub fn forward_with_cache(
        &self,
        input: &Tensor,
        kv_cache: &mut KVCache,
        position: usize,
    ) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let normed_input = self.input_norm.forward(&input)?;
        let attn_output = self.self_attn.forward_with_cache(&normed_input, kv_cache, position)?;
        let attn_residual = input.add(&attn_output)?;

        let normed_attn = self.post_attention_norm.forward(&attn_residual)?;
        let mlp_output = self.mlp.forward(&normed_attn)?;
        attn_residual.add(&mlp_output)
    }
}
