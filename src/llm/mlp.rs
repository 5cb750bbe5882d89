use candle_core::safetensors::MmapedSafetensors;
use candle_core::Result as CandleResult;
use candle_core::{DType, Device, Tensor};

use crate::llm::activation::Activation;
use crate::llm::layer::Layer;
use crate::llm::linear::LinearLayer;

/// Gated feed-forward block: `down(act(gate(x)) * up(x))`.
pub struct MlpLayer {
    gate_proj: LinearLayer,
    up_proj: LinearLayer,
    down_proj: LinearLayer,
    activation: Activation,
    device: Device,
}

impl MlpLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        device: &Device,
        dtype: DType,
        activation: Activation,
    ) -> CandleResult<Self> {
        let proj = |name: &str| {
            LinearLayer::new(weights_map, &format!("{prefix}.{name}"), device, dtype)
        };
        let gate_proj = proj("gate_proj")?;
        let up_proj = proj("up_proj")?;
        let down_proj = proj("down_proj")?;
        Ok(Self {
            gate_proj,
            up_proj,
            down_proj,
            activation,
            device: device.clone(),
        })
    }
}

impl Layer for MlpLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let gate_output = self.gate_proj.forward(&input)?;
        let up_output = self.up_proj.forward(&input)?;
        let activated = self.activation.apply(&gate_output)?;
        let multiplied = activated.mul(&up_output)?;
        self.down_proj.forward(&multiplied)
    }
}
