//! Z-Image pipeline implementation
//!
//! Wraps candle-transformers' z_image module for image generation.

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::z_image::{
    calculate_shift, postprocess_image, AutoEncoderKL, Config, FlowMatchEulerDiscreteScheduler,
    SchedulerConfig, TextEncoderConfig, VaeConfig, ZImageTextEncoder, ZImageTransformer2DModel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use zimg_core::downloaders::component_weights;
use zimg_runtime_api::{CancelFlag, GeneratedImage, ImagePipeline, InferRequest};

/// Z-Image scheduler constants
const BASE_IMAGE_SEQ_LEN: usize = 256;
const MAX_IMAGE_SEQ_LEN: usize = 4096;
const BASE_SHIFT: f64 = 0.5;
const MAX_SHIFT: f64 = 1.15;

/// Pixels per latent cell edge, times two for the 2x2 patchify.
const VAE_ALIGN: usize = 16;
const LATENT_CHANNELS: usize = 16;

/// Z-Image generation pipeline
pub struct ZImagePipeline {
    tokenizer: Tokenizer,
    text_encoder: ZImageTextEncoder,
    transformer: ZImageTransformer2DModel,
    vae: AutoEncoderKL,
    device: Device,
    dtype: DType,
}

fn read_config<T: DeserializeOwned>(path: PathBuf, fallback: impl FnOnce() -> T) -> Result<T> {
    if path.exists() {
        let file = std::fs::File::open(&path)?;
        serde_json::from_reader(file).with_context(|| format!("Invalid config {:?}", path))
    } else {
        Ok(fallback())
    }
}

fn weights<'a>(
    files: &[PathBuf],
    dir: &Path,
    dtype: DType,
    device: &'a Device,
) -> Result<VarBuilder<'a>> {
    if files.is_empty() {
        anyhow::bail!("Weights not found in {:?}", dir);
    }
    Ok(unsafe { VarBuilder::from_mmaped_safetensors(files, dtype, device)? })
}

impl ZImagePipeline {
    /// Load Z-Image pipeline from a model directory
    pub fn load(
        model_path: &Path,
        device: &Device,
        dtype: DType,
        cancel: &CancelFlag,
    ) -> Result<Self> {
        // Load tokenizer
        let tokenizer_path = model_path.join("tokenizer").join("tokenizer.json");
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer not found at {:?}", tokenizer_path);
        }
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        cancel.check()?;

        // Text encoder
        let dir = model_path.join("text_encoder");
        let cfg: TextEncoderConfig =
            read_config(dir.join("config.json"), TextEncoderConfig::z_image)?;
        let files = component_weights(&dir, "model.safetensors.index.json")?;
        tracing::info!("loading text encoder ({} shards)", files.len());
        let text_encoder = ZImageTextEncoder::new(&cfg, weights(&files, &dir, dtype, device)?)?;
        cancel.check()?;

        // Transformer
        let dir = model_path.join("transformer");
        let cfg: Config = read_config(dir.join("config.json"), Config::z_image_turbo)?;
        let files = component_weights(&dir, "diffusion_pytorch_model.safetensors.index.json")?;
        tracing::info!("loading transformer ({} shards)", files.len());
        let vb = weights(&files, &dir, dtype, device)?;
        let transformer = ZImageTransformer2DModel::new(&cfg, vb)?;
        cancel.check()?;

        // VAE
        let dir = model_path.join("vae");
        let cfg: VaeConfig = read_config(dir.join("config.json"), VaeConfig::z_image)?;
        let files = vec![dir.join("diffusion_pytorch_model.safetensors")];
        if !files[0].exists() {
            anyhow::bail!("VAE weights not found at {:?}", files[0]);
        }
        tracing::info!("loading VAE");
        let vae = AutoEncoderKL::new(&cfg, weights(&files, &dir, dtype, device)?)?;
        cancel.check()?;

        Ok(Self {
            tokenizer,
            text_encoder,
            transformer,
            vae,
            device: device.clone(),
            dtype,
        })
    }

    /// Format prompt for Qwen3 chat template
    fn format_prompt(prompt: &str) -> String {
        format!(
            "<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
            prompt
        )
    }

    /// Standard normal noise from a seeded CPU generator, so a seed gives the
    /// same image on every backend. Candle's CPU device cannot be seeded.
    fn seeded_noise(&self, seed: u64, latent_h: usize, latent_w: usize) -> Result<Tensor> {
        let shape = (1, LATENT_CHANNELS, latent_h, latent_w);
        let values = latent_noise(seed, LATENT_CHANNELS * latent_h * latent_w);
        let noise = Tensor::from_vec(values, shape, &Device::Cpu)?;
        Ok(noise.to_device(&self.device)?.to_dtype(self.dtype)?)
    }
}

fn latent_noise(seed: u64, len: usize) -> Vec<f32> {
    StdRng::seed_from_u64(seed)
        .sample_iter(StandardNormal)
        .take(len)
        .collect()
}

impl ImagePipeline for ZImagePipeline {
    fn infer(&mut self, request: &InferRequest, cancel: &CancelFlag) -> Result<GeneratedImage> {
        let num_steps = request.steps as usize;

        // Tokenize prompt
        let formatted_prompt = Self::format_prompt(&request.prompt);
        let tokens = self
            .tokenizer
            .encode(formatted_prompt.as_str(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?
            .get_ids()
            .to_vec();
        let token_count = tokens.len();
        let input_ids = Tensor::from_vec(tokens, (1, token_count), &self.device)?;

        // Get text embeddings
        let cap_feats = self.text_encoder.forward(&input_ids)?;
        let cap_mask = Tensor::ones((1, token_count), DType::U8, &self.device)?;
        cancel.check()?;

        // Calculate latent dimensions
        let patch_size = self.transformer.config().all_patch_size[0];
        let height = request.height as usize;
        let width = request.width as usize;
        if height % VAE_ALIGN != 0 || width % VAE_ALIGN != 0 {
            anyhow::bail!(
                "Image dimensions must be divisible by {}. Got {}x{}",
                VAE_ALIGN,
                width,
                height
            );
        }
        let latent_h = 2 * (height / VAE_ALIGN);
        let latent_w = 2 * (width / VAE_ALIGN);

        // Calculate shift
        let image_seq_len = (latent_h / patch_size) * (latent_w / patch_size);
        let mu = calculate_shift(
            image_seq_len,
            BASE_IMAGE_SEQ_LEN,
            MAX_IMAGE_SEQ_LEN,
            BASE_SHIFT,
            MAX_SHIFT,
        );

        // Fresh scheduler per image
        let mut scheduler = FlowMatchEulerDiscreteScheduler::new(SchedulerConfig::z_image_turbo());
        scheduler.set_timesteps(num_steps, Some(mu));

        let mut latents = self.seeded_noise(request.seed, latent_h, latent_w)?;
        latents = latents.unsqueeze(2)?; // Add frame dimension

        // Denoising loop. Guidance is fixed at zero for Turbo, so there is no
        // unconditional branch.
        for step in 0..num_steps {
            cancel.check()?;
            tracing::debug!("denoising step {}/{}", step + 1, num_steps);

            let t = scheduler.current_timestep_normalized();
            let t_tensor =
                Tensor::from_vec(vec![t as f32], (1,), &self.device)?.to_dtype(self.dtype)?;

            let noise_pred = self
                .transformer
                .forward(&latents, &t_tensor, &cap_feats, &cap_mask)?;

            // Negate prediction (Z-Image specific)
            let noise_pred = noise_pred.neg()?;

            let noise_pred_4d = noise_pred.squeeze(2)?;
            let latents_4d = latents.squeeze(2)?;
            let prev_latents = scheduler.step(&noise_pred_4d, &latents_4d)?;
            latents = prev_latents.unsqueeze(2)?;
        }
        cancel.check()?;

        // VAE decode
        let latents = latents.squeeze(2)?;
        let image = self.vae.decode(&latents)?;

        // Post-process to u8, drop batch, CHW -> HWC
        let image = postprocess_image(&image)?;
        let image = image.i(0)?;
        let (c, h, w) = image.dims3()?;
        if c != 3 {
            anyhow::bail!("Expected 3 channels, got {}", c);
        }
        let pixels: Vec<u8> = image.permute((1, 2, 0))?.flatten_all()?.to_vec1()?;

        Ok(GeneratedImage {
            pixels,
            width: w as u32,
            height: h as u32,
        })
    }

    fn synchronize(&self) -> Result<()> {
        self.device.synchronize()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Z-Image-Turbo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latent_noise_is_seeded() {
        let a = latent_noise(42, 4096);
        assert_eq!(a.len(), 4096);
        assert_eq!(a, latent_noise(42, 4096));
        assert_ne!(a, latent_noise(43, 4096));

        let mean = a.iter().sum::<f32>() / a.len() as f32;
        let var = a.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / a.len() as f32;
        assert!(mean.abs() < 0.1, "{mean}");
        assert!((var - 1.0).abs() < 0.15, "{var}");
    }
}
