//! zimg_core - Core library for Z-Image generation runs
//!
//! This crate provides:
//! - Resolution presets and `WxH` normalization
//! - Compute backend selection policy
//! - Prompt sources (literal, JSON, text) and prompt sanitizing
//! - Output file layout, config file, model download

pub mod config;
pub mod device;
pub mod downloaders;
pub mod error;
pub mod output;
pub mod prompts;
pub mod resolution;
pub mod sanitize;

pub use config::{Config, Precision};
pub use device::{BackendProbe, DeviceChoice, DeviceDecision, ResolvedDevice};
pub use error::{Error, Result};
pub use output::ImageFormat;
pub use prompts::{PromptBatch, PromptSource};
pub use resolution::Resolution;
