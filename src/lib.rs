//! respond-serve: an HTTP endpoint that answers a message with text
//! generated by a pretrained causal language model.
//!
//! The model and tokenizer are loaded once into an [`AppState`] and shared
//! read-only by every request. Generation runs on a bounded worker pool
//! with fixed sampling parameters (see [`GenerationConfig`]).

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod llm;
pub mod worker_pool;

pub use api::server::create_router;
pub use app_state::AppState;
pub use config::{GenerationConfig, ModelConfig, ServerConfig, ServiceOptions};
pub use error::{Error, Result};
pub use llm::models::{LlamaModel, Model};
