//! zimg_runtime_diffusion - Z-Image-Turbo inference with candle
//!
//! Implements [`ImagePipeline`] on top of candle-transformers' `z_image`
//! module, plus the backend availability probe used for device selection.

mod zimage;

use std::path::Path;

use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device};
use zimg_core::{BackendProbe, Precision, ResolvedDevice};
use zimg_runtime_api::{CancelFlag, ImagePipeline};

pub use zimage::ZImagePipeline;

/// Reports which candle backends this binary was built with.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandleProbe;

impl BackendProbe for CandleProbe {
    fn is_available(&self, device: ResolvedDevice) -> bool {
        match device {
            ResolvedDevice::Cuda => cuda_is_available(),
            ResolvedDevice::Mps => metal_is_available(),
            ResolvedDevice::Cpu => true,
        }
    }
}

/// Open the candle device for a resolved backend.
pub fn candle_device(device: ResolvedDevice) -> Result<Device> {
    Ok(match device {
        ResolvedDevice::Cuda => Device::new_cuda(0)?,
        ResolvedDevice::Mps => Device::new_metal(0)?,
        ResolvedDevice::Cpu => Device::Cpu,
    })
}

pub fn dtype(precision: Precision) -> DType {
    match precision {
        Precision::F32 => DType::F32,
        Precision::Bf16 => DType::BF16,
        Precision::F16 => DType::F16,
    }
}

/// Load the pipeline from a local snapshot directory.
///
/// Returns an error carrying [`zimg_runtime_api::Cancelled`] if `cancel` is
/// set while components are still loading.
pub fn load_pipeline(
    model_path: &Path,
    device: ResolvedDevice,
    precision: Precision,
    cancel: &CancelFlag,
) -> Result<Box<dyn ImagePipeline>> {
    let device = candle_device(device)?;
    let pipeline = ZImagePipeline::load(model_path, &device, dtype(precision), cancel)?;
    Ok(Box::new(pipeline))
}
