use candle_core::{DType, Device, safetensors::MmapedSafetensors, Result as CandleResult, Tensor, D};

use crate::llm::layer::Layer;

pub struct RMSNormLayer {
    weights: Tensor,
    eps: f64,
    device: Device,
}

impl RMSNormLayer {
    pub fn new(
        weights_map: &MmapedSafetensors,
        prefix: &str,
        device: &Device,
        dtype: DType,
        eps: f64,
    ) -> CandleResult<Self> {
        let weights = weights_map.load(&format!("{}.weight", prefix), device)?
            .to_dtype(dtype)?;

        Ok(Self::from_tensor(weights, eps))
    }

    pub fn from_tensor(weights: Tensor, eps: f64) -> Self {
        let device = weights.device().clone();
        Self {
            weights,
            eps,
            device,
        }
    }
}

impl Layer for RMSNormLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let orig_dtype = input.dtype();

        // Accumulate in f32 so half-precision activations do not overflow.
        let input = input.to_dtype(DType::F32)?;
        let variance = input.sqr()?.mean_keepdim(D::Minus1)?;
        let inv_rms = variance.affine(1.0, self.eps)?.sqrt()?.recip()?;
        let norm_x = input.broadcast_mul(&inv_rms)?.to_dtype(orig_dtype)?;

        norm_x.broadcast_mul(&self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_norm_unit_scale() {
        let device = Device::Cpu;
        let norm = RMSNormLayer::from_tensor(Tensor::ones(4, DType::F32, &device).unwrap(), 0.0);

        let x = Tensor::new(&[[[2.0f32, 2.0, 2.0, 2.0]]], &device).unwrap();
        let y: Vec<f32> = norm.forward(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        for v in y {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }
}
