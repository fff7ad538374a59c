use std::sync::Arc;

use candle_core::Device;
use tokenizers::Tokenizer;

use crate::config::{GenerationConfig, ServerConfig, ServiceOptions};
use crate::error::{Error, Result};
use crate::llm::inference;
use crate::llm::loader::{self, ModelFiles};
use crate::llm::models::{LlamaModel, Model};
use crate::llm::sampler::Sampler;
use crate::worker_pool::InferencePool;

/// The response service: model, tokenizer and device loaded once at startup
/// and shared read-only by every request.
pub struct AppState {
    model: Arc<dyn Model>,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    generation: GenerationConfig,
    pool: InferencePool,
    seed: Option<u64>,
}

impl AppState {
    /// Loads everything `config` points at. Any failure here must keep the
    /// server from starting.
    pub fn load(config: &ServerConfig) -> Result<Self> {
        let device = loader::select_device(config.cpu)?;
        let dtype = loader::default_dtype(&device);
        tracing::info!(device = loader::device_name(&device), ?dtype, "selected compute device");

        let files = ModelFiles::resolve(&config.model_id, &config.revision)?;
        tracing::debug!(?files, "model files resolved");

        let model_config = loader::load_config(&files.config)?;
        tracing::info!(
            layers = model_config.num_hidden_layers,
            hidden_size = model_config.hidden_size,
            vocab_size = model_config.vocab_size,
            torch_dtype = model_config.torch_dtype.as_deref().unwrap_or("unknown"),
            "model config loaded"
        );

        let weights = loader::load_weights(&files.weights)?;
        let model = LlamaModel::new(&weights, &model_config, &device, dtype)?;
        let tokenizer = loader::load_tokenizer(&files.tokenizer)?;
        let eos_token_id = loader::resolve_eos_token_id(&model_config, &tokenizer)?;
        tracing::info!(model_id = %config.model_id, eos_token_id, "model and tokenizer loaded");

        Ok(Self::new(
            Arc::new(model),
            tokenizer,
            config.model_id.clone(),
            eos_token_id,
            config.service_options(),
        ))
    }

    /// Assembles a service from already-loaded parts. The device is the model's.
    pub fn new(
        model: Arc<dyn Model>,
        tokenizer: Tokenizer,
        model_id: impl Into<String>,
        eos_token_id: u32,
        options: ServiceOptions,
    ) -> Self {
        let device = model.device().clone();
        Self {
            model,
            tokenizer,
            device,
            model_id: model_id.into(),
            generation: GenerationConfig::new(eos_token_id),
            pool: InferencePool::new(options.workers, options.queue_depth),
            seed: options.seed,
        }
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    pub fn pool(&self) -> &InferencePool {
        &self.pool
    }

    /// Generates a reply to `message` on the inference pool.
    pub async fn respond(self: &Arc<Self>, message: String) -> Result<String> {
        let state = Arc::clone(self);
        self.pool.run(move || state.generate_text(&message)).await
    }

    /// Encode, generate, decode. Blocks the calling thread for the whole generation.
    ///
    /// The decoded text covers the full sequence, so it starts with the prompt.
    pub fn generate_text(&self, message: &str) -> Result<String> {
        let encoding = self
            .tokenizer
            .encode(message, true)
            .map_err(|e| Error::Tokenization(e.to_string()))?;
        let prompt_ids = encoding.get_ids();

        let mut sampler = match self.seed {
            Some(seed) => Sampler::with_seed(&self.generation, seed),
            None => Sampler::new(&self.generation),
        };

        let output_ids =
            inference::generate(prompt_ids, self.model.as_ref(), &self.generation, &mut sampler)?;

        self.tokenizer
            .decode(&output_ids, true)
            .map_err(|e| Error::Tokenization(e.to_string()))
    }
}
