//! Model download

use std::path::PathBuf;

use anyhow::Result;
use zimg_core::downloaders::ModelDownloader;

use crate::Settings;

/// Make sure every model file is in the cache and return the snapshot directory.
pub fn fetch(settings: &Settings) -> Result<PathBuf> {
    println!("Model: {}", settings.model_id);
    println!("Cache: {}", settings.model_dir.display());

    let downloader = ModelDownloader::new(&settings.model_dir, settings.hf_token.clone())?;
    let model_path = downloader.download(&settings.model_id)?;
    tracing::debug!("model snapshot at {:?}", model_path);
    Ok(model_path)
}

/// `--download-only`: fetch and stop.
pub fn execute(settings: &Settings) -> Result<()> {
    let model_path = fetch(settings)?;
    println!("\nModel downloaded successfully!");
    println!("  Path: {}", model_path.display());
    Ok(())
}
