use candle_core::{IndexOp, Tensor};

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::llm::causal_self_attention::KVCache;
use crate::llm::models::Model;
use crate::llm::sampler::Sampler;

/// Autoregressive generation with a per-call KV cache.
///
/// Returns the prompt ids followed by at most `config.max_new_tokens`
/// generated ids. The stop token itself is not included.
pub fn generate(
    prompt_ids: &[u32],
    model: &dyn Model,
    config: &GenerationConfig,
    sampler: &mut Sampler,
) -> Result<Vec<u32>> {
    if prompt_ids.is_empty() {
        return Err(Error::Tokenization("prompt encodes to zero tokens".to_string()));
    }

    let device = model.device();
    let mut input_ids = prompt_ids.to_vec();
    let max_new_tokens = match model.max_position_embeddings() {
        Some(context) => config.max_new_tokens.min(context.saturating_sub(prompt_ids.len())),
        None => config.max_new_tokens,
    };
    if max_new_tokens < config.max_new_tokens {
        tracing::debug!(
            prompt_tokens = prompt_ids.len(),
            max_new_tokens,
            "generation budget capped by the context window"
        );
    }

    let mut kv_caches = vec![KVCache::new(); model.num_layers()];

    // Prefill with the whole prompt, then feed one token per step.
    let mut step_input = Tensor::new(input_ids.as_slice(), device)?.unsqueeze(0)?;
    let mut position = 0;

    for _ in 0..max_new_tokens {
        let seq_len = step_input.dim(1)?;
        let logits = model.forward_with_cache(&step_input, &mut kv_caches, position)?;
        let next_token_logits = logits.i((0, seq_len - 1))?;

        let next_token = sampler.sample(&next_token_logits, &input_ids)?;
        if config.is_stop_token(next_token) {
            break;
        }

        input_ids.push(next_token);
        position += seq_len;
        step_input = Tensor::new(&[next_token], device)?.unsqueeze(0)?;
    }

    tracing::debug!(
        prompt_tokens = prompt_ids.len(),
        new_tokens = input_ids.len() - prompt_ids.len(),
        "generation finished"
    );

    Ok(input_ids)
}
