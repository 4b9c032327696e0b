use std::path::PathBuf;

use crate::device::ResolvedDevice;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between parsing arguments and writing an image.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "invalid resolution {0:?}: expected <width>x<height> with positive integers, \
         e.g. 1024x768"
    )]
    InvalidResolutionFormat(String),

    #[error("{device} is not available: {reason}")]
    DeviceUnavailable {
        device: ResolvedDevice,
        reason: String,
    },

    #[error("unsupported prompt file format {0:?}: use a .json or .txt file")]
    UnsupportedPromptFileFormat(PathBuf),

    #[error("failed to read prompt file {path:?}")]
    PromptFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse prompt file {path:?}")]
    PromptFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "generation failed for prompt {prompt:?} at {width}x{height} on {device} \
         with seed {seed}"
    )]
    GenerationFailed {
        prompt: String,
        width: u32,
        height: u32,
        device: ResolvedDevice,
        seed: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write image to {path:?}")]
    Persist {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("interrupted by user")]
    Interrupted,

    #[error("invalid config file {path:?}")]
    Config {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("model download failed for {target}")]
    Download {
        target: String,
        #[source]
        source: anyhow::Error,
    },
}
