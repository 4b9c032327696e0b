//! On-disk layout for generated images:
//! `<output_dir>/<YYMMDD>/<HHMMSS>_<seed>_nbp.<ext>`.
//!
//! Two images finished in the same second with the same seed map to the same
//! file and the later one overwrites the earlier. With a fixed seed they are
//! expected to be identical anyway, so this is left as is.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpg,
    Webp,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Date subdirectory for a timestamp, e.g. `output/251201`.
pub fn date_dir<Tz: TimeZone>(output_dir: &Path, at: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: fmt::Display,
{
    output_dir.join(at.format("%y%m%d").to_string())
}

pub fn output_path<Tz: TimeZone>(
    output_dir: &Path,
    at: &DateTime<Tz>,
    seed: u64,
    format: ImageFormat,
) -> PathBuf
where
    Tz::Offset: fmt::Display,
{
    date_dir(output_dir, at).join(format!(
        "{}_{}_nbp.{}",
        at.format("%H%M%S"),
        seed,
        format.extension()
    ))
}
