//! Shared fixtures: a word-level tokenizer, a tiny random Llama checkpoint
//! and a scripted stub model.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Result as CandleResult, Tensor};
use tokenizers::Tokenizer;

use respond_serve::llm::causal_self_attention::KVCache;
use respond_serve::{AppState, Model, ServiceOptions};

pub const VOCAB: [&str; 16] = [
    "<unk>", "<s>", "</s>", "i", "feel", "anxious", "today", "calm", "breathe", "you", "are",
    "not", "alone", "hello", "we", "can",
];
pub const BOS: u32 = 1;
pub const EOS: u32 = 2;
pub const CALM: u32 = 7;

pub const HIDDEN: usize = 8;
pub const INTERMEDIATE: usize = 16;
pub const HEADS: usize = 2;
pub const KV_HEADS: usize = 1;
pub const LAYERS: usize = 2;
pub const MAX_POSITIONS: usize = 512;

/// Lowercasing, whitespace-splitting word-level tokenizer that prepends `<s>`.
pub fn tokenizer_json() -> String {
    let added_tokens: Vec<serde_json::Value> = VOCAB[..3]
        .iter()
        .enumerate()
        .map(|(id, content)| {
            serde_json::json!({
                "id": id,
                "content": content,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        })
        .collect();
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), serde_json::json!(id)))
        .collect();

    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": { "type": "Lowercase" },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [
                { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } }
            ],
            "pair": [
                { "SpecialToken": { "id": "<s>", "type_id": 0 } },
                { "Sequence": { "id": "A", "type_id": 0 } },
                { "Sequence": { "id": "B", "type_id": 1 } }
            ],
            "special_tokens": {
                "<s>": { "id": "<s>", "ids": [BOS], "tokens": ["<s>"] }
            }
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "<unk>"
        }
    })
    .to_string()
}

pub fn tokenizer() -> Tokenizer {
    Tokenizer::from_bytes(tokenizer_json().as_bytes()).unwrap()
}

pub fn llama_config_json(tie_word_embeddings: bool) -> String {
    serde_json::json!({
        "architectures": ["LlamaForCausalLM"],
        "model_type": "llama",
        "bos_token_id": BOS,
        "eos_token_id": EOS,
        "hidden_act": "silu",
        "hidden_size": HIDDEN,
        "intermediate_size": INTERMEDIATE,
        "max_position_embeddings": MAX_POSITIONS,
        "num_attention_heads": HEADS,
        "num_hidden_layers": LAYERS,
        "num_key_value_heads": KV_HEADS,
        "rms_norm_eps": 1e-5,
        "rope_theta": 10000.0,
        "tie_word_embeddings": tie_word_embeddings,
        "torch_dtype": "float32",
        "vocab_size": VOCAB.len()
    })
    .to_string()
}

/// Random weights with the tensor names of a HF Llama checkpoint.
pub fn llama_weights(with_lm_head: bool) -> HashMap<String, Tensor> {
    let device = Device::Cpu;
    let vocab = VOCAB.len();
    let head_dim = HIDDEN / HEADS;
    let kv_dim = KV_HEADS * head_dim;
    let randn = |shape: (usize, usize)| Tensor::randn(0f32, 0.5, shape, &device).unwrap();
    let ones = || Tensor::ones(HIDDEN, DType::F32, &device).unwrap();

    let mut weights = HashMap::new();
    weights.insert("model.embed_tokens.weight".to_string(), randn((vocab, HIDDEN)));
    for layer in 0..LAYERS {
        let p = format!("model.layers.{layer}");
        weights.insert(format!("{p}.self_attn.q_proj.weight"), randn((HIDDEN, HIDDEN)));
        weights.insert(format!("{p}.self_attn.k_proj.weight"), randn((kv_dim, HIDDEN)));
        weights.insert(format!("{p}.self_attn.v_proj.weight"), randn((kv_dim, HIDDEN)));
        weights.insert(format!("{p}.self_attn.o_proj.weight"), randn((HIDDEN, HIDDEN)));
        weights.insert(format!("{p}.mlp.gate_proj.weight"), randn((INTERMEDIATE, HIDDEN)));
        weights.insert(format!("{p}.mlp.up_proj.weight"), randn((INTERMEDIATE, HIDDEN)));
        weights.insert(format!("{p}.mlp.down_proj.weight"), randn((HIDDEN, INTERMEDIATE)));
        weights.insert(format!("{p}.input_layernorm.weight"), ones());
        weights.insert(format!("{p}.post_attention_layernorm.weight"), ones());
    }
    weights.insert("model.norm.weight".to_string(), ones());
    if with_lm_head {
        weights.insert("lm_head.weight".to_string(), randn((vocab, HIDDEN)));
    }
    weights
}

/// Writes config.json, tokenizer.json and model.safetensors into `dir`.
pub fn write_tiny_llama(dir: &Path, weights: &HashMap<String, Tensor>, tie_word_embeddings: bool) {
    std::fs::write(dir.join("config.json"), llama_config_json(tie_word_embeddings)).unwrap();
    std::fs::write(dir.join("tokenizer.json"), tokenizer_json()).unwrap();
    candle_core::safetensors::save(weights, dir.join("model.safetensors")).unwrap();
}

/// Emits `CALM` until the sequence reaches `stop_at` tokens, then `EOS`.
pub struct StubModel {
    pub stop_at: usize,
    pub context: Option<usize>,
    device: Device,
}

impl StubModel {
    pub fn new(stop_at: usize) -> Self {
        Self {
            stop_at,
            context: None,
            device: Device::Cpu,
        }
    }

    /// Never emits `EOS`, so only the generation limits end the output.
    pub fn endless() -> Self {
        Self::new(usize::MAX)
    }

    pub fn with_context(mut self, context: usize) -> Self {
        self.context = Some(context);
        self
    }
}

impl Model for StubModel {
    fn forward_with_cache(
        &self,
        input_ids: &Tensor,
        _kv_caches: &mut [KVCache],
        position: usize,
    ) -> CandleResult<Tensor> {
        let seq_len = input_ids.dim(1)?;
        let favored = if position.saturating_add(seq_len) >= self.stop_at { EOS } else { CALM };
        let row: Vec<f32> = (0..VOCAB.len() as u32)
            .map(|id| if id == favored { 20.0 } else { 0.0 })
            .collect();
        let data: Vec<f32> = row.iter().copied().cycle().take(seq_len * row.len()).collect();
        Tensor::from_vec(data, (1, seq_len, VOCAB.len()), &self.device)
    }

    fn num_layers(&self) -> usize {
        1
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn max_position_embeddings(&self) -> Option<usize> {
        self.context
    }
}

pub fn stub_state(stop_at: usize) -> Arc<AppState> {
    Arc::new(AppState::new(
        Arc::new(StubModel::new(stop_at)),
        tokenizer(),
        "test/stub",
        EOS,
        ServiceOptions::default(),
    ))
}
