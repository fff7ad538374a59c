use candle_core::{DType, Device, Tensor, Result as CandleResult};
use candle_core::safetensors::MmapedSafetensors;
use candle_nn::var_builder::SimpleBackend;

use crate::llm::layer::Layer;

/// Bias-optional projection `y = x W^T + b` over the last dimension.
pub struct LinearLayer {
    weights: Tensor,
    bias: Option<Tensor>,
    device: Device,
}

impl LinearLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let weights = weights_map.load(&format!("{}.weight", prefix), device)?
            .to_dtype(dtype)?;

        let bias_name = format!("{}.bias", prefix);
        let bias = if weights_map.contains_tensor(&bias_name) {
            Some(weights_map.load(&bias_name, device)?.to_dtype(dtype)?)
        } else {
            None
        };

        Ok(Self::from_tensors(weights, bias))
    }

    pub fn from_tensors(weights: Tensor, bias: Option<Tensor>) -> Self {
        let device = weights.device().clone();
        Self {
            weights,
            bias,
            device,
        }
    }

    pub fn out_features(&self) -> CandleResult<usize> {
        self.weights.dim(0)
    }
}

impl Layer for LinearLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let mut output = input.broadcast_matmul(&self.weights.t()?)?;
        if let Some(bias) = &self.bias {
            output = output.broadcast_add(bias)?
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_with_bias() {
        let device = Device::Cpu;
        // 2 outputs, 3 inputs
        let w = Tensor::new(&[[1.0f32, 0.0, 0.0], [0.0, 1.0, 1.0]], &device).unwrap();
        let b = Tensor::new(&[0.5f32, -1.0], &device).unwrap();
        let layer = LinearLayer::from_tensors(w, Some(b));

        let x = Tensor::new(&[[[1.0f32, 2.0, 3.0]]], &device).unwrap();
        let y: Vec<Vec<Vec<f32>>> = layer.forward(&x).unwrap().to_vec3().unwrap();
        assert_eq!(y, vec![vec![vec![1.5, 4.0]]]);
        assert_eq!(layer.out_features().unwrap(), 2);
    }
}
