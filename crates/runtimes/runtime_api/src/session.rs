//! The one place an image gets produced and written to disk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use rand::Rng;
use zimg_core::output::output_path;
use zimg_core::{Error, ImageFormat, ResolvedDevice, Result};

use crate::{is_cancelled, CancelFlag, GeneratedImage, ImagePipeline, InferRequest};

/// Z-Image-Turbo is distilled for 9 steps (8 transformer evaluations).
pub const INFERENCE_STEPS: u32 = 9;

/// Turbo runs without classifier-free guidance.
pub const GUIDANCE_SCALE: f32 = 0.0;

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub image: GeneratedImage,
    /// The seed actually used, whether supplied or drawn.
    pub seed: u64,
    pub path: PathBuf,
}

/// Owns the loaded pipeline for the life of the process.
pub struct GenerationSession {
    pipeline: Box<dyn ImagePipeline>,
    device: ResolvedDevice,
    output_dir: PathBuf,
    format: ImageFormat,
}

/// A fresh non-negative 32-bit seed.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(0..=u32::MAX as u64)
}

impl GenerationSession {
    pub fn new(
        pipeline: Box<dyn ImagePipeline>,
        device: ResolvedDevice,
        output_dir: impl Into<PathBuf>,
        format: ImageFormat,
    ) -> Self {
        Self {
            pipeline,
            device,
            output_dir: output_dir.into(),
            format,
        }
    }

    pub fn device(&self) -> ResolvedDevice {
        self.device
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn pipeline_name(&self) -> &str {
        self.pipeline.name()
    }

    pub fn generate(
        &mut self,
        prompt: &str,
        width: u32,
        height: u32,
        seed: Option<u64>,
        cancel: &CancelFlag,
    ) -> Result<GenerationResult> {
        let seed = seed.unwrap_or_else(random_seed);
        let request = InferRequest {
            prompt: prompt.to_string(),
            width,
            height,
            steps: INFERENCE_STEPS,
            guidance_scale: GUIDANCE_SCALE,
            seed,
        };
        let failed = |source: anyhow::Error| Error::GenerationFailed {
            prompt: prompt.to_string(),
            width,
            height,
            device: self.device,
            seed,
            source,
        };

        tracing::debug!(?request, device = %self.device, "infer");
        let image = match self.pipeline.infer(&request, cancel) {
            Ok(image) => image,
            Err(e) if is_cancelled(&e) => return Err(Error::Interrupted),
            Err(e) => return Err(failed(e)),
        };

        if self.device.needs_sync() {
            self.pipeline.synchronize().map_err(failed)?;
        }

        let path = output_path(&self.output_dir, &Local::now(), seed, self.format);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Persist {
                path: path.clone(),
                source: e.into(),
            })?;
        }
        image.save(&path).map_err(|source| Error::Persist {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("saved {:?} (seed {})", path, seed);

        Ok(GenerationResult { image, seed, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubBehavior, StubPipeline};

    fn session(
        device: ResolvedDevice,
        dir: &Path,
        behavior: StubBehavior,
    ) -> (GenerationSession, crate::stub::StubLog) {
        let stub = StubPipeline::new(behavior);
        let log = stub.log();
        (
            GenerationSession::new(Box::new(stub), device, dir, ImageFormat::Png),
            log,
        )
    }

    #[test]
    fn test_generate_writes_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, log) = session(ResolvedDevice::Cpu, dir.path(), StubBehavior::default());

        let result = session
            .generate("a cat", 64, 48, Some(1234567890), &CancelFlag::new())
            .unwrap();

        assert_eq!(result.seed, 1234567890);
        assert!(result.path.exists());
        let name = result.path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_1234567890_nbp.png"), "{name}");
        assert_eq!(name.len(), "HHMMSS_1234567890_nbp.png".len());
        let date_dir = result.path.parent().unwrap();
        assert_eq!(date_dir.parent().unwrap(), dir.path());
        assert_eq!(date_dir.file_name().unwrap().len(), 6);

        let written = image::open(&result.path).unwrap();
        assert_eq!((written.width(), written.height()), (64, 48));

        let calls = log.requests();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].steps, INFERENCE_STEPS);
        assert_eq!(calls[0].guidance_scale, 0.0);
        assert_eq!(calls[0].seed, 1234567890);
    }

    #[test]
    fn test_missing_seed_is_drawn_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, log) = session(ResolvedDevice::Cpu, dir.path(), StubBehavior::default());

        let result = session.generate("a cat", 32, 32, None, &CancelFlag::new()).unwrap();
        assert!(result.seed <= u32::MAX as u64);
        assert_eq!(log.requests()[0].seed, result.seed);
        assert!(result
            .path
            .to_str()
            .unwrap()
            .ends_with(&format!("_{}_nbp.png", result.seed)));
    }

    #[test]
    fn test_mps_synchronizes_other_devices_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let (mut mps, mps_log) = session(ResolvedDevice::Mps, dir.path(), StubBehavior::default());
        mps.generate("a cat", 32, 32, Some(1), &CancelFlag::new()).unwrap();
        mps.generate("a cat", 32, 32, Some(2), &CancelFlag::new()).unwrap();
        assert_eq!(mps_log.syncs(), 2);

        for device in [ResolvedDevice::Cpu, ResolvedDevice::Cuda] {
            let (mut s, log) = session(device, dir.path(), StubBehavior::default());
            s.generate("a cat", 32, 32, Some(3), &CancelFlag::new()).unwrap();
            assert_eq!(log.syncs(), 0);
        }
    }

    #[test]
    fn test_pipeline_failure_carries_context() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session(
            ResolvedDevice::Mps,
            dir.path(),
            StubBehavior {
                fail_on_call: Some(1),
                ..Default::default()
            },
        );

        let err = session
            .generate("a dog", 1920, 1072, Some(7), &CancelFlag::new())
            .unwrap_err();
        match err {
            Error::GenerationFailed {
                prompt,
                width,
                height,
                device,
                seed,
                ..
            } => {
                assert_eq!(prompt, "a dog");
                assert_eq!((width, height), (1920, 1072));
                assert_eq!(device, ResolvedDevice::Mps);
                assert_eq!(seed, 7);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cancel_becomes_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = session(ResolvedDevice::Cpu, dir.path(), StubBehavior::default());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = session.generate("a cat", 32, 32, Some(1), &cancel).unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
