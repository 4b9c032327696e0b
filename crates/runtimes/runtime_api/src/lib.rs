//! zimg_runtime_api - Pipeline contract and generation session
//!
//! This crate defines what an image pipeline must provide (one `infer` call)
//! and drives it through [`GenerationSession`], which owns seeding, device
//! synchronization and output persistence. Backends implement
//! [`ImagePipeline`]; [`stub::StubPipeline`] stands in for real weights in tests.

pub mod session;
pub mod stub;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

pub use session::{GenerationResult, GenerationSession, GUIDANCE_SCALE, INFERENCE_STEPS};

/// One forward pass worth of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InferRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
}

/// Raw RGB pixels, row-major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GeneratedImage {
    /// Encode and write; the format follows the path's extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        let img = image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow::anyhow!("Failed to create image from pixels"))?;
        img.save(path)?;
        Ok(())
    }
}

/// Text-to-image backend.
pub trait ImagePipeline {
    /// Generate an image. Implementations should poll `cancel` between steps
    /// and fail with [`Cancelled`] once it is set.
    fn infer(&mut self, request: &InferRequest, cancel: &CancelFlag) -> Result<GeneratedImage>;

    /// Wait for queued device work to finish.
    fn synchronize(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Marker error for a user-requested abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled by user")]
pub struct Cancelled;

/// True if `err` or anything in its cause chain is [`Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

/// Shared interrupt flag, set from the Ctrl-C handler and polled by long operations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a pending cancel, returning whether one was set.
    pub fn reset(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Cancelled.into())
        } else {
            Ok(())
        }
    }
}
