use std::process::Command;

use zimg_core::ResolvedDevice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub name: String,
    pub vram_mb: u64,
}

impl std::fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.1} GB)", self.name, self.vram_mb as f64 / 1024.0)
    }
}

/// Best-effort hardware name for the startup banner. `None` for the CPU or
/// when the system tools are missing.
pub fn describe(device: ResolvedDevice) -> Option<GpuInfo> {
    match device {
        ResolvedDevice::Mps => detect_metal(),
        ResolvedDevice::Cuda => detect_cuda(),
        ResolvedDevice::Cpu => None,
    }
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn detect_metal() -> Option<GpuInfo> {
    // Unified memory: the GPU shares system RAM
    let mem_bytes: u64 = run("sysctl", &["-n", "hw.memsize"])?.parse().ok()?;
    let name = run("sysctl", &["-n", "machdep.cpu.brand_string"])
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Apple Silicon".to_string());

    Some(GpuInfo {
        name,
        vram_mb: mem_bytes / (1024 * 1024),
    })
}

fn detect_cuda() -> Option<GpuInfo> {
    let output = run(
        "nvidia-smi",
        &["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"],
    )?;
    parse_nvidia_smi(&output)
}

fn parse_nvidia_smi(output: &str) -> Option<GpuInfo> {
    let line = output.lines().next()?;
    let (name, vram) = line.split_once(", ")?;
    Some(GpuInfo {
        name: name.trim().to_string(),
        vram_mb: vram.trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi() {
        let output = "NVIDIA GeForce RTX 4090, 24564\nNVIDIA GeForce RTX 3060, 12288\n";
        let info = parse_nvidia_smi(output).unwrap();
        assert_eq!(info.name, "NVIDIA GeForce RTX 4090");
        assert_eq!(info.vram_mb, 24564);
        assert_eq!(info.to_string(), "NVIDIA GeForce RTX 4090 (24.0 GB)");

        assert!(parse_nvidia_smi("").is_none());
        assert!(parse_nvidia_smi("garbage").is_none());
    }

    #[test]
    fn test_cpu_has_no_description() {
        assert!(describe(ResolvedDevice::Cpu).is_none());
    }
}
