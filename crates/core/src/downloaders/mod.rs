pub mod huggingface;

pub use huggingface::ModelDownloader;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Sharded safetensors index, as written next to the shards.
#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Shard file names listed in a `*.safetensors.index.json`, sorted and deduplicated.
pub fn shard_names(index_json: &str) -> Result<Vec<String>> {
    let index: SafetensorsIndex = serde_json::from_str(index_json)?;
    Ok(index
        .weight_map
        .into_values()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

/// Weight files of one model component directory (`transformer/`, `vae/`, ...).
///
/// Uses the index file when present, otherwise every `*.safetensors` in the directory.
pub fn component_weights(dir: &Path, index_name: &str) -> Result<Vec<PathBuf>> {
    let index_path = dir.join(index_name);
    if index_path.exists() {
        let content = fs::read_to_string(&index_path)
            .with_context(|| format!("Failed to read {:?}", index_path))?;
        return Ok(shard_names(&content)?
            .into_iter()
            .map(|name| dir.join(name))
            .collect());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Model component not found at {:?}", dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "safetensors").unwrap_or(false))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_names_dedup_sorted() {
        let json = r#"{
            "metadata": {"total_size": 1},
            "weight_map": {
                "a.weight": "model-00002-of-00002.safetensors",
                "b.weight": "model-00001-of-00002.safetensors",
                "c.weight": "model-00001-of-00002.safetensors"
            }
        }"#;
        assert_eq!(
            shard_names(json).unwrap(),
            vec![
                "model-00001-of-00002.safetensors",
                "model-00002-of-00002.safetensors"
            ]
        );
    }

    #[test]
    fn test_component_weights_without_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.safetensors"), b"").unwrap();
        fs::write(dir.path().join("a.safetensors"), b"").unwrap();
        fs::write(dir.path().join("config.json"), b"{}").unwrap();

        let files = component_weights(dir.path(), "model.safetensors.index.json").unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.safetensors"), dir.path().join("b.safetensors")]
        );
    }
}
