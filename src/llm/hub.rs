use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};

use crate::llm::LlmError;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";
const GENERATION_CONFIG_FILE: &str = "generation_config.json";

/// Everything needed to build a generator, resolved to local paths.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
    /// Optional decoding defaults.
    pub generation_config: Option<PathBuf>,
}

impl ModelFiles {
    /// Resolves `name` either as a local checkpoint directory or as a hub repo id.
    pub fn resolve(name: &str, revision: &str, token: Option<&str>) -> Result<Self, LlmError> {
        let local = Path::new(name);
        if local.is_dir() {
            tracing::info!(path = %local.display(), "loading model from local directory");
            return Self::from_dir(local);
        }
        Self::download(name, revision, token)
    }

    pub fn from_dir(dir: &Path) -> Result<Self, LlmError> {
        let config = require(dir.join(CONFIG_FILE))?;
        let tokenizer = require(dir.join(TOKENIZER_FILE))?;

        let index = dir.join(WEIGHTS_INDEX_FILE);
        let weights = if index.is_file() {
            shard_names(&std::fs::read_to_string(&index)?)?
                .into_iter()
                .map(|shard| require(dir.join(shard)))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            vec![require(dir.join(SINGLE_WEIGHTS_FILE))?]
        };

        let generation_config = Some(dir.join(GENERATION_CONFIG_FILE)).filter(|p| p.is_file());

        Ok(Self {
            config,
            tokenizer,
            weights,
            generation_config,
        })
    }

    /// Fetches the checkpoint into the local hub cache. Gated repos need `token`.
    pub fn download(name: &str, revision: &str, token: Option<&str>) -> Result<Self, LlmError> {
        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(token) = token {
            builder = builder.with_token(Some(token.to_string()));
        }
        let api = builder.build()?;
        let repo = api.repo(Repo::with_revision(
            name.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        tracing::info!(model = name, revision, "fetching model files");

        let config = repo.get(CONFIG_FILE)?;
        let tokenizer = repo.get(TOKENIZER_FILE)?;

        let weights = match repo.get(WEIGHTS_INDEX_FILE) {
            Ok(index) => shard_names(&std::fs::read_to_string(index)?)?
                .iter()
                .map(|shard| repo.get(shard))
                .collect::<Result<Vec<_>, _>>()?,
            Err(err) => {
                tracing::debug!(error = %err, "no sharded weights index, using single file");
                vec![repo.get(SINGLE_WEIGHTS_FILE)?]
            }
        };

        let generation_config = match repo.get(GENERATION_CONFIG_FILE) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::debug!(error = %err, "no generation config, decoding greedily");
                None
            }
        };

        tracing::info!(shards = weights.len(), "model files ready");

        Ok(Self {
            config,
            tokenizer,
            weights,
            generation_config,
        })
    }
}

fn require(path: PathBuf) -> Result<PathBuf, LlmError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(LlmError::MissingFiles(path.display().to_string()))
    }
}

/// Distinct shard file names listed in a `model.safetensors.index.json`,
/// in sorted order.
pub fn shard_names(index_json: &str) -> Result<Vec<String>, LlmError> {
    let index: serde_json::Value = serde_json::from_str(index_json)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|map| map.as_object())
        .ok_or_else(|| LlmError::MissingFiles("weight_map in safetensors index".to_string()))?;

    let shards: BTreeSet<String> = weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    Ok(shards.into_iter().collect())
}
