use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DeviceChoice;
use crate::error::{Error, Result};
use crate::output::ImageFormat;

pub const DEFAULT_MODEL_ID: &str = "Tongyi-MAI/Z-Image-Turbo";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where models are cached and images are written
    #[serde(default)]
    pub paths: PathsConfig,

    /// Which model to load and how
    #[serde(default)]
    pub model: ModelConfig,

    /// Generation defaults
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Model cache directory (default: models/)
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Image output root (default: output/)
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// HuggingFace repository to download
    #[serde(default = "default_model_id")]
    pub repo_id: String,

    /// Numeric precision the weights are loaded in
    #[serde(default)]
    pub precision: Precision,

    /// HuggingFace token for gated repositories
    #[serde(default)]
    pub hf_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Default device preference
    #[serde(default)]
    pub device: DeviceChoice,

    /// Default aspect ratio label
    #[serde(default)]
    pub ratio: Option<String>,

    /// Output image format
    #[serde(default)]
    pub format: ImageFormat,
}

/// Weight precision tag handed to the pipeline loader.
///
/// `F32` is the default: half precision produces NaN latents (black images)
/// on Apple GPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    Bf16,
    F16,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo_id: default_model_id(),
            precision: Precision::default(),
            hf_token: None,
        }
    }
}

impl Config {
    /// Get the base directory: ~/.config/zimg/
    pub fn base_dir() -> Option<PathBuf> {
        std::env::var("HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("USERPROFILE").map(PathBuf::from))
            .ok()
            .map(|home| home.join(".config").join("zimg"))
    }

    /// Get the config file path: ~/.config/zimg/config.toml
    pub fn config_path() -> Option<PathBuf> {
        Self::base_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load config from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load config from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let invalid = |source: anyhow::Error| Error::Config {
            path: path.to_path_buf(),
            source,
        };
        let content = fs::read_to_string(path).map_err(|e| invalid(e.into()))?;
        let config: Config = toml::from_str(&content).map_err(|e| invalid(e.into()))?;
        tracing::debug!("loaded config from {:?}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.paths.model_dir, PathBuf::from("models"));
        assert_eq!(config.paths.output_dir, PathBuf::from("output"));
        assert_eq!(config.model.repo_id, DEFAULT_MODEL_ID);
        assert_eq!(config.model.precision, Precision::F32);
        assert_eq!(config.generation.device, DeviceChoice::Auto);
        assert_eq!(config.generation.format, ImageFormat::Png);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[paths]\noutput_dir = \"/tmp/images\"\n\n\
             [generation]\ndevice = \"cpu\"\nformat = \"webp\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.paths.output_dir, PathBuf::from("/tmp/images"));
        assert_eq!(config.paths.model_dir, PathBuf::from("models"));
        assert_eq!(config.generation.device, DeviceChoice::Cpu);
        assert_eq!(config.generation.format, ImageFormat::Webp);
        assert_eq!(config.model.precision, Precision::F32);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[generation]\ndevice = \"tpu\"\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config { .. })));
    }
}
