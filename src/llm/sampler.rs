//! Next-token selection.
//!
//! Logits go through the usual processing chain before a token is drawn:
//!
//! ```text
//! logits [vocab_size]
//!     │  repetition penalty (every distinct token already in the sequence)
//!     │  temperature scaling
//!     │  top-k: keep the k highest logits
//!     │  softmax
//!     │  top-p: keep the smallest prefix whose mass reaches p
//!     ▼  renormalize + weighted draw
//! token id
//! ```

use std::collections::HashSet;

use candle_core::{DType, Tensor};
use rand::distr::{weighted::WeightedIndex, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Token sampler carrying its own RNG. One is created per request.
#[derive(Debug, Clone)]
pub struct Sampler {
    temperature: f64,
    /// 0 disables top-k.
    top_k: usize,
    /// 1.0 disables top-p.
    top_p: f64,
    /// 1.0 disables the penalty.
    repetition_penalty: f32,
    rng: StdRng,
}

impl Sampler {
    /// Sampler seeded from OS entropy.
    pub fn new(config: &GenerationConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Sampler with a fixed seed, for reproducible output.
    pub fn with_seed(config: &GenerationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &GenerationConfig, rng: StdRng) -> Self {
        Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            repetition_penalty: config.repetition_penalty,
            rng,
        }
    }

    /// Picks the next token from 1D `logits`, penalizing tokens in `context`.
    pub fn sample(&mut self, logits: &Tensor, context: &[u32]) -> Result<u32> {
        let mut logits: Vec<f32> = logits.to_dtype(DType::F32)?.to_vec1()?;
        if logits.is_empty() {
            return Err(Error::Sampling("empty logits".to_string()));
        }

        apply_repetition_penalty(&mut logits, context, self.repetition_penalty);

        if self.temperature <= 0.0 {
            return Ok(argmax(&logits));
        }
        let inv_temperature = (1.0 / self.temperature) as f32;
        logits.iter_mut().for_each(|l| *l *= inv_temperature);

        let candidates = top_k(&logits, self.top_k);
        let probs = softmax(&candidates);
        let kept = top_p(probs, self.top_p);

        let dist = WeightedIndex::new(kept.iter().map(|(_, p)| *p))
            .map_err(|e| Error::Sampling(format!("failed to create distribution: {e}")))?;
        Ok(kept[dist.sample(&mut self.rng)].0)
    }
}

/// Divides positive logits and multiplies non-positive ones by `penalty`,
/// once per distinct token id. Ids outside the vocabulary are ignored.
pub fn apply_repetition_penalty(logits: &mut [f32], context: &[u32], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let seen: HashSet<u32> = context.iter().copied().collect();
    for token in seen {
        if let Some(logit) = logits.get_mut(token as usize) {
            if *logit > 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

/// `(token, logit)` pairs sorted by descending logit, truncated to `k` (0 keeps all).
fn top_k(logits: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = logits
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_finite())
        .map(|(i, &l)| (i as u32, l))
        .collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    if k > 0 {
        indexed.truncate(k);
    }
    indexed
}

fn softmax(candidates: &[(u32, f32)]) -> Vec<(u32, f64)> {
    let max = candidates
        .iter()
        .map(|(_, l)| *l)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<(u32, f64)> = candidates
        .iter()
        .map(|(i, l)| (*i, ((*l - max) as f64).exp()))
        .collect();
    let sum: f64 = exps.iter().map(|(_, e)| e).sum();
    exps.into_iter().map(|(i, e)| (i, e / sum)).collect()
}

/// Keeps the highest-probability tokens until their mass reaches `p`.
/// `probs` must be sorted by descending probability. At least one token survives.
fn top_p(probs: Vec<(u32, f64)>, p: f64) -> Vec<(u32, f64)> {
    if p >= 1.0 {
        return probs;
    }
    let mut cumulative = 0.0;
    let mut kept = Vec::new();
    for (token, prob) in probs {
        if cumulative >= p && !kept.is_empty() {
            break;
        }
        cumulative += prob;
        kept.push((token, prob));
    }
    kept
}
