//! Requested image dimensions, normalized to what the model accepts.
//!
//! The transformer works on 16-pixel latent patches, so both sides of every
//! image must be a multiple of 16. Explicit `WxH` requests are aligned down.

use std::fmt;

use crate::error::{Error, Result};

/// Both sides of a generated image must be a multiple of this.
pub const ALIGNMENT: u32 = 16;

pub const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 1024,
    height: 1024,
};

/// Preset aspect ratios and their canonical resolutions.
pub const ASPECT_RATIOS: [(&str, Resolution); 7] = [
    ("1:1", Resolution { width: 1024, height: 1024 }),
    ("16:9", Resolution { width: 1344, height: 768 }),
    ("9:16", Resolution { width: 768, height: 1344 }),
    ("4:3", Resolution { width: 1152, height: 896 }),
    ("3:4", Resolution { width: 896, height: 1152 }),
    ("3:2", Resolution { width: 1216, height: 832 }),
    ("2:3", Resolution { width: 832, height: 1216 }),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Outcome of [`resolve`]. `aligned_from` holds the user's exact request when
/// alignment had to change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedResolution {
    pub resolution: Resolution,
    pub aligned_from: Option<(u32, u32)>,
}

/// Labels accepted by `--ratio`.
pub fn ratio_labels() -> impl Iterator<Item = &'static str> {
    ASPECT_RATIOS.iter().map(|(label, _)| *label)
}

pub fn preset(label: &str) -> Option<Resolution> {
    ASPECT_RATIOS
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, r)| *r)
}

/// Round down to a multiple of [`ALIGNMENT`], never below it.
pub fn align(value: u32) -> u32 {
    (value / ALIGNMENT * ALIGNMENT).max(ALIGNMENT)
}

/// Pick the output resolution. Priority: `resolution` > `ratio` > 1024x1024.
pub fn resolve(ratio: Option<&str>, resolution: Option<&str>) -> Result<ResolvedResolution> {
    if let Some(raw) = resolution {
        let (width, height) = parse_dimensions(raw)?;
        let aligned = Resolution {
            width: align(width),
            height: align(height),
        };
        let aligned_from = if (aligned.width, aligned.height) != (width, height) {
            tracing::warn!(
                "resolution {}x{} aligned to {} (must be a multiple of {})",
                width,
                height,
                aligned,
                ALIGNMENT
            );
            Some((width, height))
        } else {
            None
        };
        return Ok(ResolvedResolution {
            resolution: aligned,
            aligned_from,
        });
    }

    if let Some(label) = ratio {
        match preset(label) {
            Some(resolution) => {
                return Ok(ResolvedResolution {
                    resolution,
                    aligned_from: None,
                })
            }
            None => tracing::warn!("unknown aspect ratio {:?}, using default", label),
        }
    }

    Ok(ResolvedResolution {
        resolution: DEFAULT_RESOLUTION,
        aligned_from: None,
    })
}

fn parse_dimensions(raw: &str) -> Result<(u32, u32)> {
    let invalid = || Error::InvalidResolutionFormat(raw.to_string());
    let lowered = raw.trim().to_ascii_lowercase();
    let (w, h) = lowered.split_once('x').ok_or_else(invalid)?;
    let parse = |s: &str| -> Result<u32> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(v) => Ok(v),
        }
    };
    Ok((parse(w)?, parse(h)?))
}
