use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::llm::activation::Activation;

pub const DEFAULT_MODEL_ID: &str = "tanusrich/Mental_Health_Chatbot";

pub const MAX_NEW_TOKENS: usize = 200;
pub const TEMPERATURE: f64 = 0.7;
pub const TOP_K: usize = 50;
pub const TOP_P: f64 = 0.9;
pub const REPETITION_PENALTY: f32 = 1.2;

/// `eos_token_id` is either a single id or a list in `config.json`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum TokenIds {
    Single(u32),
    Multiple(Vec<u32>),
}

impl TokenIds {
    pub fn first(&self) -> Option<u32> {
        match self {
            TokenIds::Single(id) => Some(*id),
            TokenIds::Multiple(ids) => ids.first().copied(),
        }
    }
}

/// Llama-family model configuration, as found in a model repository's `config.json`.
#[derive(Deserialize, Debug, Clone)]
pub struct ModelConfig {
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub bos_token_id: Option<TokenIds>,
    #[serde(default)]
    pub eos_token_id: Option<TokenIds>,
    #[serde(rename = "hidden_act", default = "default_hidden_act")]
    pub hidden_activation: String,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    #[serde(default)]
    pub torch_dtype: Option<String>,
    pub vocab_size: usize,
}

fn default_hidden_act() -> String {
    "silu".to_string()
}

fn default_max_position_embeddings() -> usize {
    2048
}

fn default_rope_theta() -> f32 {
    10000.0
}

impl ModelConfig {
    /// Older Llama configs omit `num_key_value_heads`, meaning plain multi-head attention.
    pub fn kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("hidden_size", self.hidden_size),
            ("intermediate_size", self.intermediate_size),
            ("num_attention_heads", self.num_attention_heads),
            ("num_hidden_layers", self.num_hidden_layers),
            ("num_key_value_heads", self.kv_heads()),
            ("vocab_size", self.vocab_size),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(Error::Config(format!("{name} must be non-zero")));
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Config(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_attention_heads % self.kv_heads() != 0 {
            return Err(Error::Config(format!(
                "num_attention_heads {} is not divisible by num_key_value_heads {}",
                self.num_attention_heads,
                self.kv_heads()
            )));
        }
        self.hidden_activation.parse::<Activation>()?;
        Ok(())
    }
}

/// Sampling and decoding parameters applied to every request.
///
/// Built once when the service starts; requests cannot override any field.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_k: usize,
    pub top_p: f64,
    pub repetition_penalty: f32,
    pub eos_token_id: u32,
    /// Padding reuses the end-of-sequence token.
    pub pad_token_id: u32,
}

impl GenerationConfig {
    pub fn new(eos_token_id: u32) -> Self {
        Self {
            max_new_tokens: MAX_NEW_TOKENS,
            temperature: TEMPERATURE,
            top_k: TOP_K,
            top_p: TOP_P,
            repetition_penalty: REPETITION_PENALTY,
            eos_token_id,
            pad_token_id: eos_token_id,
        }
    }

    pub fn is_stop_token(&self, token: u32) -> bool {
        token == self.eos_token_id || token == self.pad_token_id
    }
}

/// Command line / environment configuration for the server binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "respond-serve")]
#[command(about = "Serve text generation from a pretrained causal language model over HTTP")]
pub struct ServerConfig {
    /// HuggingFace model ID or a local directory holding config.json, tokenizer.json and safetensors
    #[arg(long, env = "RESPOND_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Hub revision (branch, tag or commit)
    #[arg(long, env = "RESPOND_REVISION", default_value = "main")]
    pub revision: String,

    #[arg(long, env = "RESPOND_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "RESPOND_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Run on the CPU even when an accelerator is available
    #[arg(long, env = "RESPOND_CPU")]
    pub cpu: bool,

    /// Generations allowed to run at the same time
    #[arg(long, env = "RESPOND_WORKERS", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,

    /// Requests allowed to wait for a free worker before new ones are rejected.
    /// Rejected requests get HTTP 503 with `"kind": "overloaded"`, the only
    /// failure that does not answer 500.
    #[arg(long, env = "RESPOND_QUEUE_DEPTH", default_value_t = 8)]
    pub queue_depth: u32,

    /// Seed every request's sampler with this value (reproducible output)
    #[arg(long, env = "RESPOND_SEED")]
    pub seed: Option<u64>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            workers: self.workers as usize,
            queue_depth: self.queue_depth as usize,
            seed: self.seed,
        }
    }
}

/// Runtime knobs of the response service that do not affect generation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    pub workers: usize,
    pub queue_depth: usize,
    pub seed: Option<u64>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_depth: 8,
            seed: None,
        }
    }
}
