use candle_core::{DType, Device, Tensor, Result as CandleResult};
use candle_core::safetensors::MmapedSafetensors;
use candle_nn::var_builder::SimpleBackend;

use crate::llm::layer::Layer;

/// Projects final hidden states onto vocabulary logits.
pub struct LMHeadLayer {
    weights: Tensor,
    device: Device,
}

impl LMHeadLayer {
    /// Loads `{prefix}.weight`, falling back to `tied` (the embedding table)
    /// when the checkpoint ties input and output embeddings.
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        tied: &Tensor,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let name = format!("{}.weight", prefix);
        let weights = if weights.contains_tensor(&name) {
            weights.load(&name, device)?.to_dtype(dtype)?
        } else {
            tracing::debug!("{name} not found, tying LM head to the token embedding");
            tied.clone()
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
