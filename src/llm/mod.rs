//! Llama-family causal language model on candle tensors, plus loading,
//! sampling and the generation loop.

pub mod activation;
pub mod causal_self_attention;
pub mod decoder;
pub mod embedding;
pub mod inference;
pub mod layer;
pub mod linear;
pub mod lm_head;
pub mod loader;
pub mod mlp;
pub mod models;
pub mod rms_norm;
pub mod sampler;
