//! Compute backend selection.
//!
//! Apple's MPS backend computes tensor byte offsets with 32-bit arithmetic, so
//! any intermediate tensor larger than 4 GiB fails at allocation time with no
//! way to recover. For this model that happens somewhere above ~1.1 million
//! output pixels. The policy below refuses (or routes around) MPS for larger
//! requests instead of letting the pipeline crash halfway through.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest `width * height` known to run on MPS without hitting the 32-bit
/// offset defect. Measured, not derived.
pub const MPS_MAX_SAFE_PIXELS: u64 = 1_100_000;

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    #[default]
    Auto,
    Cuda,
    Mps,
    Cpu,
}

/// The backend actually used for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedDevice {
    Cuda,
    Mps,
    Cpu,
}

impl ResolvedDevice {
    /// MPS queues work asynchronously; results must be synchronized before reading.
    pub fn needs_sync(&self) -> bool {
        matches!(self, ResolvedDevice::Mps)
    }
}

impl fmt::Display for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDevice::Cuda => write!(f, "cuda"),
            ResolvedDevice::Mps => write!(f, "mps"),
            ResolvedDevice::Cpu => write!(f, "cpu"),
        }
    }
}

/// Answers "can this backend be used in this process?"
pub trait BackendProbe {
    fn is_available(&self, device: ResolvedDevice) -> bool;
}

/// Why [`resolve_device`] picked what it picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// Explicitly requested and allowed.
    Requested,
    /// Auto mode found a usable accelerator.
    Accelerated,
    /// MPS above the safe pixel count because the user forced it.
    ForcedOverride { pixels: u64 },
    /// Auto mode avoided MPS because of the offset defect.
    MpsDefectFallback { pixels: u64 },
    /// Auto mode found no accelerator at all.
    NoAccelerator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDecision {
    pub device: ResolvedDevice,
    pub reason: DecisionReason,
}

impl DeviceDecision {
    /// Message worth showing the user, if any.
    pub fn notice(&self) -> Option<String> {
        match self.reason {
            DecisionReason::Requested | DecisionReason::Accelerated => None,
            DecisionReason::ForcedOverride { pixels } => Some(format!(
                "Forcing MPS at {} pixels (safe limit {}). The MPS backend computes \
                 tensor offsets in 32-bit arithmetic and may abort with an allocation error.",
                pixels, MPS_MAX_SAFE_PIXELS
            )),
            DecisionReason::MpsDefectFallback { pixels } => Some(format!(
                "Falling back to CPU: {} pixels exceeds the MPS safe limit of {}. This is a known \
                 MPS defect (tensor offsets overflow 32-bit arithmetic past 4 GiB), not a memory \
                 shortage. Use a smaller resolution to stay on MPS, or --force-mps to try anyway.",
                pixels, MPS_MAX_SAFE_PIXELS
            )),
            DecisionReason::NoAccelerator => {
                Some("No GPU backend available, running on CPU (this will be slow)".to_string())
            }
        }
    }
}

pub fn is_mps_safe(width: u32, height: u32) -> bool {
    width as u64 * height as u64 <= MPS_MAX_SAFE_PIXELS
}

/// The MPS resolution safety check on its own, for requests made after the
/// device has already been chosen.
pub fn check_mps_resolution(width: u32, height: u32, force: bool) -> Result<()> {
    if force || is_mps_safe(width, height) {
        return Ok(());
    }
    Err(Error::DeviceUnavailable {
        device: ResolvedDevice::Mps,
        reason: format!(
            "{}x{} ({} pixels) exceeds the MPS safe limit of {} pixels; the MPS backend \
             overflows 32-bit tensor offsets past 4 GiB. Use a smaller resolution or --force-mps",
            width,
            height,
            width as u64 * height as u64,
            MPS_MAX_SAFE_PIXELS
        ),
    })
}

pub fn resolve_device(
    choice: DeviceChoice,
    width: u32,
    height: u32,
    force_mps: bool,
    probe: &dyn BackendProbe,
) -> Result<DeviceDecision> {
    let pixels = width as u64 * height as u64;
    let decision = |device, reason| DeviceDecision { device, reason };

    let picked = match choice {
        DeviceChoice::Cpu => decision(ResolvedDevice::Cpu, DecisionReason::Requested),

        DeviceChoice::Cuda => {
            if !probe.is_available(ResolvedDevice::Cuda) {
                return Err(Error::DeviceUnavailable {
                    device: ResolvedDevice::Cuda,
                    reason: "no CUDA device found (build with --features cuda on an NVIDIA \
                             machine, or use --device auto)"
                        .to_string(),
                });
            }
            decision(ResolvedDevice::Cuda, DecisionReason::Requested)
        }

        DeviceChoice::Mps => {
            if !probe.is_available(ResolvedDevice::Mps) {
                return Err(Error::DeviceUnavailable {
                    device: ResolvedDevice::Mps,
                    reason: "no Metal device found (build with --features metal on Apple Silicon, \
                             or use --device auto)"
                        .to_string(),
                });
            }
            if force_mps && !is_mps_safe(width, height) {
                decision(ResolvedDevice::Mps, DecisionReason::ForcedOverride { pixels })
            } else {
                check_mps_resolution(width, height, force_mps)?;
                decision(ResolvedDevice::Mps, DecisionReason::Requested)
            }
        }

        DeviceChoice::Auto => {
            let mps = probe.is_available(ResolvedDevice::Mps);
            let safe = is_mps_safe(width, height);
            if mps && safe {
                decision(ResolvedDevice::Mps, DecisionReason::Accelerated)
            } else if probe.is_available(ResolvedDevice::Cuda) {
                decision(ResolvedDevice::Cuda, DecisionReason::Accelerated)
            } else if mps && force_mps {
                decision(ResolvedDevice::Mps, DecisionReason::ForcedOverride { pixels })
            } else if mps {
                decision(ResolvedDevice::Cpu, DecisionReason::MpsDefectFallback { pixels })
            } else {
                decision(ResolvedDevice::Cpu, DecisionReason::NoAccelerator)
            }
        }
    };

    tracing::debug!(?choice, width, height, force_mps, ?picked, "device resolved");
    Ok(picked)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe {
        cuda: bool,
        mps: bool,
    }

    impl BackendProbe for FixedProbe {
        fn is_available(&self, device: ResolvedDevice) -> bool {
            match device {
                ResolvedDevice::Cuda => self.cuda,
                ResolvedDevice::Mps => self.mps,
                ResolvedDevice::Cpu => true,
            }
        }
    }

    const BOTH: FixedProbe = FixedProbe { cuda: true, mps: true };
    const MPS_ONLY: FixedProbe = FixedProbe { cuda: false, mps: true };
    const CUDA_ONLY: FixedProbe = FixedProbe { cuda: true, mps: false };
    const NONE: FixedProbe = FixedProbe { cuda: false, mps: false };

    #[test]
    fn test_auto_prefers_mps_when_in_limit() {
        let d = resolve_device(DeviceChoice::Auto, 1024, 1024, false, &BOTH).unwrap();
        assert_eq!(d.device, ResolvedDevice::Mps);
        assert_eq!(d.notice(), None);
    }

    #[test]
    fn test_auto_prefers_cuda_when_over_limit() {
        let d = resolve_device(DeviceChoice::Auto, 1920, 1080, false, &BOTH).unwrap();
        assert_eq!(d.device, ResolvedDevice::Cuda);
    }

    #[test]
    fn test_auto_falls_back_to_cpu_over_limit() {
        let d = resolve_device(DeviceChoice::Auto, 1920, 1080, false, &MPS_ONLY).unwrap();
        assert_eq!(d.device, ResolvedDevice::Cpu);
        assert_eq!(
            d.reason,
            DecisionReason::MpsDefectFallback { pixels: 1920 * 1080 }
        );
        assert!(d.notice().unwrap().contains("32-bit"));
    }

    #[test]
    fn test_auto_forced_mps_over_limit() {
        let d = resolve_device(DeviceChoice::Auto, 1920, 1080, true, &MPS_ONLY).unwrap();
        assert_eq!(d.device, ResolvedDevice::Mps);
        assert!(matches!(d.reason, DecisionReason::ForcedOverride { .. }));
        assert!(d.notice().is_some());
    }

    #[test]
    fn test_auto_without_accelerator() {
        let d = resolve_device(DeviceChoice::Auto, 1024, 1024, false, &NONE).unwrap();
        assert_eq!(d.device, ResolvedDevice::Cpu);
        assert_eq!(d.reason, DecisionReason::NoAccelerator);

        let d = resolve_device(DeviceChoice::Auto, 1024, 1024, false, &CUDA_ONLY).unwrap();
        assert_eq!(d.device, ResolvedDevice::Cuda);
    }

    #[test]
    fn test_cpu_is_unconditional() {
        for probe in [&BOTH, &MPS_ONLY, &CUDA_ONLY, &NONE] {
            for (w, h) in [(512, 512), (1024, 1024), (1920, 1080), (4096, 4096)] {
                for force in [false, true] {
                    let d = resolve_device(DeviceChoice::Cpu, w, h, force, probe).unwrap();
                    assert_eq!(d.device, ResolvedDevice::Cpu);
                }
            }
        }
    }

    #[test]
    fn test_explicit_cuda() {
        let d = resolve_device(DeviceChoice::Cuda, 1920, 1080, false, &CUDA_ONLY).unwrap();
        assert_eq!(d.device, ResolvedDevice::Cuda);

        let err = resolve_device(DeviceChoice::Cuda, 1024, 1024, false, &MPS_ONLY).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceUnavailable { device: ResolvedDevice::Cuda, .. }
        ));
    }

    #[test]
    fn test_explicit_mps_safety_check() {
        let d = resolve_device(DeviceChoice::Mps, 1344, 768, false, &MPS_ONLY).unwrap();
        assert_eq!(d.device, ResolvedDevice::Mps);

        let err = resolve_device(DeviceChoice::Mps, 1920, 1080, false, &MPS_ONLY).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceUnavailable { device: ResolvedDevice::Mps, .. }
        ));

        let d = resolve_device(DeviceChoice::Mps, 1920, 1080, true, &MPS_ONLY).unwrap();
        assert_eq!(d.device, ResolvedDevice::Mps);
    }

    #[test]
    fn test_explicit_mps_unavailable() {
        let err = resolve_device(DeviceChoice::Mps, 512, 512, true, &CUDA_ONLY).unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_presets_are_mps_safe() {
        for (_, r) in crate::resolution::ASPECT_RATIOS {
            assert!(is_mps_safe(r.width, r.height), "{r}");
        }
        assert!(!is_mps_safe(1920, 1080));
    }
}
