use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_core::safetensors::MmapedSafetensors;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::llm::activation::Activation;
use crate::llm::causal_self_attention::KVCache;
use crate::llm::decoder::DecoderLayer;
use crate::llm::embedding::EmbeddingLayer;
use crate::llm::layer::Layer;
use crate::llm::lm_head::LMHeadLayer;
use crate::llm::rms_norm::RMSNormLayer;

/// A causal language model usable by the generation loop.
///
/// Forward passes take `&self`: the weights are shared read-only between
/// requests and all per-request state lives in the caller's `KVCache`s.
pub trait Model: Send + Sync {
    /// `input_ids` is `(batch, seq)` of `u32`; returns `(batch, seq, vocab)` logits.
    /// `position` is the number of tokens already held in `kv_caches`.
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        kv_caches: &mut [KVCache],
        position: usize,
    ) -> CandleResult<Tensor>;

    fn num_layers(&self) -> usize;

    fn device(&self) -> &Device;

    /// Longest sequence the model was trained for, if known.
    fn max_position_embeddings(&self) -> Option<usize> {
        None
    }

    fn forward(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        let mut kv_caches = vec![KVCache::new(); self.num_layers()];
        self.forward_with_cache(input_ids, &mut kv_caches, 0)
    }
}

pub struct LlamaModel {
    pub embed_layer: EmbeddingLayer,
    pub decoder_layers: Vec<DecoderLayer>,
    pub norm_layer: RMSNormLayer,
    pub lm_head: LMHeadLayer,
    pub cfg: ModelConfig,
    device: Device,
    dtype: DType,
}

impl LlamaModel {
    pub fn new(
        weights: &MmapedSafetensors,
        config: &ModelConfig,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        config.validate()?;
        let activation: Activation = config.hidden_activation.parse()?;

        let embed_layer = EmbeddingLayer::new(weights, "model.embed_tokens", device, dtype)?;

        let decoder_layers = (0..config.num_hidden_layers)
            .map(|layer_idx| {
                DecoderLayer::new(
                    weights,
                    &format!("model.layers.{}", layer_idx),
                    config,
                    activation,
                    device,
                    dtype,
                )
            })
            .collect::<CandleResult<Vec<_>>>()?;

        let norm_layer = RMSNormLayer::new(weights, "model.norm", device, dtype, config.rms_norm_eps)?;

        let lm_head = LMHeadLayer::new(weights, "lm_head", embed_layer.weights(), device, dtype)?;

        Ok(Self {
            embed_layer,
            decoder_layers,
            norm_layer,
            lm_head,
            cfg: config.clone(),
            device: device.clone(),
            dtype,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl Model for LlamaModel {
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

        let mut hidden_states = self.embed_layer.forward(input_ids)?;
        for (layer, kv_cache) in self.decoder_layers.iter().zip(kv_caches.iter_mut()) {
            hidden_states = layer.forward_with_cache(&hidden_states, kv_cache, position)?;
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

    fn max_position_embeddings(&self) -> Option<usize> {
        Some(self.cfg.max_position_embeddings)
    }
}
