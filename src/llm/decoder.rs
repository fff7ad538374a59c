use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_core::safetensors::MmapedSafetensors;

use crate::config::ModelConfig;
use crate::llm::activation::Activation;
use crate::llm::causal_self_attention::{CausalSelfAttentionLayer, KVCache};
use crate::llm::layer::Layer;
use crate::llm::mlp::MlpLayer;
use crate::llm::rms_norm::RMSNormLayer;

/// One pre-norm transformer block: attention and MLP, each wrapped in a residual.
pub struct DecoderLayer {
    pub self_attn: CausalSelfAttentionLayer,
    pub mlp: MlpLayer,
    pub input_norm: RMSNormLayer,
    pub post_attention_norm: RMSNormLayer,
    device: Device,
}

impl DecoderLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        config: &ModelConfig,
        activation: Activation,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let self_attn = CausalSelfAttentionLayer::new(
            weights,
            &format!("{}.self_attn", prefix),
            config.num_attention_heads,
            config.kv_heads(),
            config.hidden_size,
            config.rope_theta,
            device,
            dtype,
        )?;

        let mlp = MlpLayer::new(weights, &format!("{}.mlp", prefix), device, dtype, activation)?;

        let input_norm = RMSNormLayer::new(
            weights,
            &format!("{}.input_layernorm", prefix),
            device,
            dtype,
            config.rms_norm_eps,
        )?;

        let post_attention_norm = RMSNormLayer::new(
            weights,
            &format!("{}.post_attention_layernorm", prefix),
            device,
            dtype,
            config.rms_norm_eps,
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

impl Layer for DecoderLayer {
    fn forward(&self, input: &Tensor) -> CandleResult<Tensor> {
        let mut cache = KVCache::new();
        self.forward_with_cache(input, &mut cache, 0)
    }
}
