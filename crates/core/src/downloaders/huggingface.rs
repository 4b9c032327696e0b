use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiBuilder, ApiRepo};

use super::shard_names;
use crate::error::Error;

/// `(directory, index file)` for each sharded component.
pub const SHARDED_COMPONENTS: [(&str, &str); 2] = [
    ("text_encoder", "model.safetensors.index.json"),
    ("transformer", "diffusion_pytorch_model.safetensors.index.json"),
];

const REQUIRED_FILES: [&str; 2] = [
    "tokenizer/tokenizer.json",
    "vae/diffusion_pytorch_model.safetensors",
];

const OPTIONAL_FILES: [&str; 5] = [
    "model_index.json",
    "tokenizer/tokenizer_config.json",
    "text_encoder/config.json",
    "transformer/config.json",
    "vae/config.json",
];

/// Fetches a Z-Image snapshot into a local cache directory.
///
/// Files already in the cache are not downloaded again, so this doubles as
/// the "is the model there?" check on every start.
pub struct ModelDownloader {
    api: Api,
    cache_dir: PathBuf,
}

impl ModelDownloader {
    pub fn new(cache_dir: &Path, token: Option<String>) -> crate::Result<Self> {
        let build = || -> Result<Api> {
            fs::create_dir_all(cache_dir)
                .with_context(|| format!("Failed to create model directory {:?}", cache_dir))?;
            let mut builder = ApiBuilder::new()
                .with_cache_dir(cache_dir.to_path_buf())
                .with_progress(true);
            if token.is_some() {
                builder = builder.with_token(token.clone());
            }
            Ok(builder.build()?)
        };
        let api = build().map_err(|source| Error::Download {
            target: cache_dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            api,
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    /// Download everything the pipeline needs and return the snapshot directory.
    pub fn download(&self, repo_id: &str) -> crate::Result<PathBuf> {
        self.download_inner(repo_id).map_err(|source| Error::Download {
            target: repo_id.to_string(),
            source,
        })
    }

    fn download_inner(&self, repo_id: &str) -> Result<PathBuf> {
        let repo = self.api.model(repo_id.to_string());

        tracing::info!("checking {} in {:?}", repo_id, self.cache_dir);

        let tokenizer = fetch(&repo, REQUIRED_FILES[0])?;
        for file in &REQUIRED_FILES[1..] {
            fetch(&repo, file)?;
        }

        for file in OPTIONAL_FILES {
            if let Err(e) = repo.get(file) {
                tracing::warn!("could not download {}: {}", file, e);
            }
        }

        for (component, index_name) in SHARDED_COMPONENTS {
            let index_path = fetch(&repo, &format!("{}/{}", component, index_name))?;
            let content = fs::read_to_string(&index_path)?;
            for shard in shard_names(&content)? {
                fetch(&repo, &format!("{}/{}", component, shard))?;
            }
        }

        // <cache>/models--org--name/snapshots/<rev>/tokenizer/tokenizer.json
        tokenizer
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .context("Unexpected cache layout")
    }
}

fn fetch(repo: &ApiRepo, file: &str) -> Result<PathBuf> {
    repo.get(file)
        .with_context(|| format!("Failed to download {}", file))
}
