pub mod download;
pub mod generate;
pub mod interactive;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use zimg_core::ResolvedDevice;
use zimg_runtime_api::{is_cancelled, CancelFlag, GenerationSession};

use crate::Settings;

/// Load the pipeline behind a spinner. `Ok(None)` means the user interrupted.
pub fn load_session(
    settings: &Settings,
    device: ResolvedDevice,
    model_path: &Path,
    cancel: &CancelFlag,
) -> Result<Option<GenerationSession>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("Loading model on {} ({:?})...", device, settings.precision));
    pb.enable_steady_tick(Duration::from_millis(120));

    let loaded =
        zimg_runtime_diffusion::load_pipeline(model_path, device, settings.precision, cancel);
    pb.finish_and_clear();

    match loaded {
        Ok(pipeline) => {
            println!("Model loaded: {}", pipeline.name());
            Ok(Some(GenerationSession::new(
                pipeline,
                device,
                &settings.output_dir,
                settings.format,
            )))
        }
        Err(e) if is_cancelled(&e) => Ok(None),
        Err(e) => Err(e.context(format!("Failed to load model from {:?}", model_path))),
    }
}
