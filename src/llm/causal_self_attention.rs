use candle_core::{DType, Device, Tensor, D};
use candle_core::safetensors::MmapedSafetensors;
use candle_core::Result as CandleResult;

use crate::llm::layer::Layer;
use crate::llm::linear::LinearLayer;

/// Key/value tensors of one layer, grown by one entry per decoded token.
/// Owned by a single generation call and dropped with it.
#[derive(Clone, Debug, Default)]
pub struct KVCache {
    pub k_cache: Option<Tensor>,
    pub v_cache: Option<Tensor>,
}

impl KVCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached positions.
    pub fn len(&self) -> usize {
        self.k_cache
            .as_ref()
            .and_then(|k| k.dim(2).ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Grouped-query causal self-attention with rotary position embedding.
pub struct CausalSelfAttentionLayer {
    q_proj: LinearLayer,
    k_proj: LinearLayer,
    v_proj: LinearLayer,
    o_proj: LinearLayer,
    n_heads: usize,
    n_kv_heads: usize,
    hidden_size: usize,
    rope_theta: f32,
    device: Device,
}

impl CausalSelfAttentionLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        n_heads: usize,
        n_kv_heads: usize,
        hidden_size: usize,
        rope_theta: f32,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let load = |name: &str| LinearLayer::new(weights, &format!("{}.{}", prefix, name), device, dtype);

        Ok(Self {
            q_proj: load("q_proj")?,
            k_proj: load("k_proj")?,
            v_proj: load("v_proj")?,
            o_proj: load("o_proj")?,
            n_heads,
            n_kv_heads,
            hidden_size,
            rope_theta,
            device: device.clone(),
        })
    }

    pub(crate) fn rotate_half(x: &Tensor) -> CandleResult<Tensor> {
        let last_dim = x.dim(D::Minus1)?;

        let xs1 = x.narrow(D::Minus1, 0, last_dim / 2)?;
        let xs2 = x.narrow(D::Minus1, last_dim / 2, last_dim - last_dim / 2)?;

        Tensor::cat(&[&xs2.neg()?, &xs1], D::Minus1)
    }

    /// cos/sin tables of shape `(seq_len, head_dim)` for absolute positions
    /// `start..start + seq_len`.
    pub(crate) fn rotary_tables(
        start: usize,
        seq_len: usize,
        head_dim: usize,
        rope_theta: f32,
        dtype: DType,
        device: &Device,
    ) -> CandleResult<(Tensor, Tensor)> {
        let inv_freq: Vec<f32> = (0..head_dim / 2)
            .map(|i| 1.0f32 / rope_theta.powf(2.0 * i as f32 / head_dim as f32))
            .collect();
        let inv_freq = Tensor::new(inv_freq.as_slice(), device)?;

        let t = Tensor::arange(start as u32, (start + seq_len) as u32, device)?
            .to_dtype(DType::F32)?;

        let freqs = t.unsqueeze(1)?.broadcast_mul(&inv_freq.unsqueeze(0)?)?; // (seq_len, head_dim / 2)
        let emb = Tensor::cat(&[&freqs, &freqs], 1)?; // (seq_len, head_dim)

        Ok((emb.cos()?.to_dtype(dtype)?, emb.sin()?.to_dtype(dtype)?))
    }

    fn apply_rotary_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> CandleResult<Tensor> {
        x.broadcast_mul(cos)? + Self::rotate_half(x)?.broadcast_mul(sin)?
    }

    pub(crate) fn repeat_kv(x: Tensor, n_rep: usize) -> CandleResult<Tensor> {
        if n_rep == 1 {
            return Ok(x);
        }

        let (b_sz, n_kv_heads, seq_len, head_dim) = x.dims4()?;
        x.unsqueeze(2)?
            .expand((b_sz, n_kv_heads, n_rep, seq_len, head_dim))?
            .reshape((b_sz, n_kv_heads * n_rep, seq_len, head_dim))
    }

    /// Additive mask `(1, 1, seq_len, total_len)` for queries sitting at the
    /// last `seq_len` of `total_len` positions.
    pub(crate) fn causal_mask(
        seq_len: usize,
        total_len: usize,
        device: &Device,
    ) -> CandleResult<Tensor> {
        let offset = total_len - seq_len;
        let mask = (0..seq_len)
            .flat_map(|i| {
                (0..total_len).map(move |j| if j > i + offset { f32::NEG_INFINITY } else { 0.0 })
            })
            .collect::<Vec<f32>>();

        Tensor::from_vec(mask, (seq_len, total_len), device)?
            .unsqueeze(0)?
            .unsqueeze(0)
    }

    pub fn forward_with_cache(
        &self,
        input: &Tensor,
        kv_cache: &mut KVCache,
        position: usize,
    ) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let dtype = input.dtype();
        let head_dim = self.hidden_size / self.n_heads;
        let n_rep = self.n_heads / self.n_kv_heads;

        let (b_sz, seq_len, _) = input.dims3()?;

        let q = self.q_proj.forward(&input)?
            .reshape((b_sz, seq_len, self.n_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self.k_proj.forward(&input)?
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self.v_proj.forward(&input)?
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (cos, sin) =
            Self::rotary_tables(position, seq_len, head_dim, self.rope_theta, dtype, &self.device)?;
        let q = Self::apply_rotary_emb(&q, &cos, &sin)?;
        let k = Self::apply_rotary_emb(&k, &cos, &sin)?;

        let k = match &kv_cache.k_cache {
            Some(k_cached) => Tensor::cat(&[k_cached, &k], 2)?,
            None => k,
        };
        let v = match &kv_cache.v_cache {
            Some(v_cached) => Tensor::cat(&[v_cached, &v], 2)?,
            None => v,
        };
        kv_cache.k_cache = Some(k.clone());
        kv_cache.v_cache = Some(v.clone());

        let total_len = k.dim(2)?;
        let k = Self::repeat_kv(k, n_rep)?.contiguous()?;
        let v = Self::repeat_kv(v, n_rep)?.contiguous()?;

        let scaling = 1.0 / (head_dim as f64).sqrt();
        let attn_scores = q
            .matmul(&k.t()?)?
            .to_dtype(DType::F32)?
            .affine(scaling, 0.0)?;

        let attn_scores = if seq_len > 1 {
            let mask = Self::causal_mask(seq_len, total_len, &self.device)?;
            attn_scores.broadcast_add(&mask)?
        } else {
            attn_scores
        };

        let attn_probs = candle_nn::ops::softmax(&attn_scores, D::Minus1)?.to_dtype(dtype)?;

        let context = attn_probs
            .matmul(&v)?
            .transpose(1, 2)? // (b_sz, seq_len, n_heads, head_dim)
            .reshape((b_sz, seq_len, self.hidden_size))?;

        self.o_proj.forward(&context)
    }
}

impl Layer for CausalSelfAttentionLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let mut cache = KVCache::new();
        self.forward_with_cache(input, &mut cache, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_half() {
        let x = Tensor::new(&[1.0f32, 2.0, 3.0, 4.0], &Device::Cpu).unwrap();
        let y: Vec<f32> = CausalSelfAttentionLayer::rotate_half(&x).unwrap().to_vec1().unwrap();
        assert_eq!(y, vec![-3.0, -4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_rotary_tables_at_position_zero() {
        let (cos, sin) =
            CausalSelfAttentionLayer::rotary_tables(0, 3, 4, 10000.0, DType::F32, &Device::Cpu)
                .unwrap();
        assert_eq!(cos.dims(), &[3, 4]);
        let cos0: Vec<f32> = cos.get(0).unwrap().to_vec1().unwrap();
        let sin0: Vec<f32> = sin.get(0).unwrap().to_vec1().unwrap();
        assert!(cos0.iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert!(sin0.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_rotary_tables_are_offset_by_position() {
        let device = Device::Cpu;
        let (full_cos, _) =
            CausalSelfAttentionLayer::rotary_tables(0, 5, 8, 10000.0, DType::F32, &device).unwrap();
        let (step_cos, _) =
            CausalSelfAttentionLayer::rotary_tables(4, 1, 8, 10000.0, DType::F32, &device).unwrap();

        let expected: Vec<f32> = full_cos.get(4).unwrap().to_vec1().unwrap();
        let actual: Vec<f32> = step_cos.get(0).unwrap().to_vec1().unwrap();
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_repeat_kv_shape() {
        let x = Tensor::zeros((1, 2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        let y = CausalSelfAttentionLayer::repeat_kv(x, 3).unwrap();
        assert_eq!(y.dims(), &[1, 6, 3, 4]);
    }

    #[test]
    fn test_causal_mask_with_cached_prefix() {
        let mask = CausalSelfAttentionLayer::causal_mask(2, 4, &Device::Cpu).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 2, 4]);

        let rows: Vec<Vec<f32>> = mask.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(rows[0][..3], [0.0, 0.0, 0.0]);
        assert_eq!(rows[0][3], f32::NEG_INFINITY);
        assert!(rows[1].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_kv_cache_len() {
        let mut cache = KVCache::new();
        assert!(cache.is_empty());
        cache.k_cache = Some(Tensor::zeros((1, 2, 5, 4), DType::F32, &Device::Cpu).unwrap());
        assert_eq!(cache.len(), 5);
    }
}
