use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_nn::var_builder::SimpleBackend;

use crate::llm::layer::Layer;

pub struct LMHeadLayer {
    weights: Tensor,
    device: Device,
}

impl LMHeadLayer {
    /// Loads `{prefix}.weight`, or reuses `tied` when the checkpoint shares
    /// the embedding matrix with the output projection.
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        device: &Device,
        dtype: DType,
        tied: Option<&Tensor>,
    ) -> CandleResult<Self> {
        let name = format!("{prefix}.weight");
        let weights = match tied {
            Some(embedding) if !weights.contains_tensor(&name) => embedding.clone(),
            _ => weights.load(&name, device)?.to_dtype(dtype)?,
        };
        Ok(Self {
            weights,
            device: device.clone(),
        })
    }
}

impl Layer for LMHeadLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        input.broadcast_matmul(&self.weights.t()?)
    }
}
