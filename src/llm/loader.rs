//! Model loading utilities.
//!
//! This module provides functions for:
//! - Picking the compute device once at startup
//! - Resolving model files from the HuggingFace Hub or a local directory
//! - Memory-mapping SafeTensors weights and loading the tokenizer

use std::path::{Path, PathBuf};

use candle_core::safetensors::MmapedSafetensors;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;

use crate::config::ModelConfig;
use crate::error::{Error, Result};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Tokens tried, in order, when `config.json` does not name an end-of-sequence id.
const EOS_CANDIDATES: [&str; 3] = ["</s>", "<|endoftext|>", "<|eot_id|>"];

/// Picks CUDA, then Metal, then the CPU.
pub fn select_device(force_cpu: bool) -> Result<Device> {
    if force_cpu {
        return Ok(Device::Cpu);
    }
    if cuda_is_available() {
        return Ok(Device::new_cuda(0)?);
    }
    if metal_is_available() {
        return Ok(Device::new_metal(0)?);
    }
    Ok(Device::Cpu)
}

/// Half precision on accelerators, full precision on the CPU.
pub fn default_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::F16
    }
}

pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Paths to the files needed to build a model.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    /// One path, or every shard of a sharded checkpoint.
    pub weights: Vec<PathBuf>,
    pub tokenizer: PathBuf,
}

impl ModelFiles {
    /// `model_id` is used as a local directory when one exists at that path,
    /// otherwise it is fetched from the Hub at `revision`.
    pub fn resolve(model_id: &str, revision: &str) -> Result<Self> {
        let dir = Path::new(model_id);
        if dir.is_dir() {
            tracing::info!("loading model files from local directory {}", dir.display());
            Self::from_dir(dir)
        } else {
            tracing::info!("fetching {model_id}@{revision} from the HuggingFace Hub");
            Self::download(model_id, revision)
        }
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let get = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(Error::ModelLoad(format!("{} not found", path.display())))
            }
        };
        Self::collect(get)
    }

    pub fn download(model_id: &str, revision: &str) -> Result<Self> {
        let api = Api::new().map_err(|e| Error::ModelLoad(format!("failed to create HF API: {e}")))?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));
        Self::collect(|name| {
            repo.get(name)
                .map_err(|e| Error::ModelLoad(format!("failed to download {name}: {e}")))
        })
    }

    fn collect(get: impl Fn(&str) -> Result<PathBuf>) -> Result<Self> {
        let config = get(CONFIG_FILE)?;
        let tokenizer = get(TOKENIZER_FILE)?;
        let weights = weight_files(&get)?;
        Ok(Self {
            config,
            weights,
            tokenizer,
        })
    }
}

/// Single `model.safetensors`, else every shard named by the index file.
fn weight_files(get: &impl Fn(&str) -> Result<PathBuf>) -> Result<Vec<PathBuf>> {
    if let Ok(path) = get(WEIGHTS_FILE) {
        return Ok(vec![path]);
    }

    let index_path = get(WEIGHTS_INDEX_FILE).map_err(|_| {
        Error::ModelLoad("no SafeTensors weights found (only SafeTensors checkpoints are supported)".into())
    })?;
    let index: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&index_path)?)?;

    let weight_map = index["weight_map"]
        .as_object()
        .ok_or_else(|| Error::ModelLoad("invalid safetensors index: missing weight_map".into()))?;

    let mut shards: Vec<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
    shards.sort_unstable();
    shards.dedup();

    shards.into_iter().map(get).collect()
}

pub fn load_config(path: &Path) -> Result<ModelConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::ModelLoad(format!("failed to read {}: {e}", path.display())))?;
    let config: ModelConfig = serde_json::from_str(&content)
        .map_err(|e| Error::ModelLoad(format!("failed to parse {}: {e}", path.display())))?;
    Ok(config)
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|e| Error::ModelLoad(format!("failed to load tokenizer {}: {e}", path.display())))
}

/// Memory-maps every weight file.
///
/// # Safety
///
/// The files must not be modified while the service is running.
#[allow(unsafe_code)]
pub fn load_weights(paths: &[PathBuf]) -> Result<MmapedSafetensors> {
    let weights = unsafe { MmapedSafetensors::multi(paths)? };
    Ok(weights)
}

pub fn resolve_eos_token_id(config: &ModelConfig, tokenizer: &Tokenizer) -> Result<u32> {
    if let Some(id) = config.eos_token_id.as_ref().and_then(|ids| ids.first()) {
        return Ok(id);
    }
    EOS_CANDIDATES
        .iter()
        .find_map(|token| tokenizer.token_to_id(token))
        .ok_or_else(|| Error::ModelLoad("cannot determine the end-of-sequence token".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_cpu() {
        let device = select_device(true).unwrap();
        assert!(device.is_cpu());
        assert_eq!(default_dtype(&device), DType::F32);
        assert_eq!(device_name(&device), "cpu");
    }

    #[test]
    fn test_from_dir_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(msg) if msg.contains("config.json")));
    }

    #[test]
    fn test_from_dir_resolves_sharded_weights() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["config.json", "tokenizer.json", "b.safetensors", "a.safetensors"] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        std::fs::write(
            dir.path().join("model.safetensors.index.json"),
            r#"{"weight_map": {"x": "b.safetensors", "y": "a.safetensors", "z": "b.safetensors"}}"#,
        )
        .unwrap();

        let files = ModelFiles::from_dir(dir.path()).unwrap();
        assert_eq!(
            files.weights,
            vec![dir.path().join("a.safetensors"), dir.path().join("b.safetensors")]
        );
    }

    #[test]
    fn test_from_dir_without_weights() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["config.json", "tokenizer.json"] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(msg) if msg.contains("SafeTensors")));
    }
}
