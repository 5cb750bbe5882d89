use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};

use crate::llm::causal_self_attention::KVCache;
use crate::llm::decoder::DecoderLayer;
use crate::llm::embedding::EmbeddingLayer;
use crate::llm::layer::Layer;
use crate::llm::lm_head::LMHeadLayer;
use crate::llm::model_config::ModelConfig;
use crate::llm::rms_norm::RMSNormLayer;

/// A causal language model producing `(batch, seq_len, vocab)` logits.
pub trait Model {
    fn forward(&self, input_ids: &Tensor) -> CandleResult<Tensor>;
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        kv_caches: &mut [KVCache],
        position: usize,
    ) -> CandleResult<Tensor>;
    fn num_layers(&self) -> usize;
    fn device(&self) -> &Device;

    fn new_cache(&self) -> Vec<KVCache> {
        vec![KVCache::new(); self.num_layers()]
    }
}

pub struct LlamaModel {
    pub device: Device,
    pub embed_layer: EmbeddingLayer,
    pub decoder_layers: Vec<DecoderLayer>,
    pub norm_layer: RMSNormLayer,
    pub lm_head: LMHeadLayer,
}

impl LlamaModel {
    pub fn new(
        weights: &MmapedSafetensors,
        config: &ModelConfig,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let embed_layer = EmbeddingLayer::new(weights, device, "model.embed_tokens", dtype)?;

        let decoder_layers = (0..config.num_hidden_layers)
            .map(|layer_idx| {
                DecoderLayer::new(
                    weights,
                    &format!("model.layers.{layer_idx}"),
                    config,
                    device,
                    dtype,
                )
            })
            .collect::<CandleResult<Vec<_>>>()?;

        let norm_layer =
            RMSNormLayer::new(weights, "model.norm", device, config.rms_norm_eps, dtype)?;

        let tied = config.tie_word_embeddings.then(|| embed_layer.weights());
        let lm_head = LMHeadLayer::new(weights, "lm_head", device, dtype, tied)?;

        Ok(Self {
            device: device.clone(),
            embed_layer,
            decoder_layers,
            norm_layer,
            lm_head,
        })
    }
}

impl Model for LlamaModel {
    fn forward(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        let mut kv_caches = self.new_cache();
        self.forward_with_cache(input_ids, &mut kv_caches, 0)
    }

    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        kv_caches: &mut [KVCache],
        position: usize,
    ) -> CandleResult<Tensor> {
        if kv_caches.len() != self.decoder_layers.len() {
            candle_core::bail!(
                "expected {} kv caches, got {}",
                self.decoder_layers.len(),
                kv_caches.len()
            );
        }

        let input_ids = input_ids.to_device(&self.device)?;
        let mut hidden_states = self.embed_layer.forward(&input_ids)?;

        for (layer, cache) in self.decoder_layers.iter().zip(kv_caches.iter_mut()) {
            hidden_states = layer.forward_with_cache(&hidden_states, cache, position)?;
        }

        let normed_output = self.norm_layer.forward(&hidden_states)?;
        self.lm_head.forward(&normed_output)
    }

    fn num_layers(&self) -> usize {
        self.decoder_layers.len()
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
