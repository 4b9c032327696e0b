//! Options shared by the command line and interactive command lines.

use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::Args;
use zimg_core::resolution::ratio_labels;
use zimg_core::PromptSource;

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct PromptArgs {
    /// Text prompt (Chinese and English both work)
    #[arg(short, long, conflicts_with = "prompts_file")]
    pub prompt: Option<String>,

    /// Batch file: JSON array of {"description": ...} objects, or one prompt per line (.txt)
    #[arg(short = 'f', long)]
    pub prompts_file: Option<PathBuf>,

    /// Aspect ratio preset
    #[arg(short, long, value_parser = PossibleValuesParser::new(ratio_labels()))]
    pub ratio: Option<String>,

    /// Explicit resolution, e.g. 1024x768 (takes precedence over --ratio)
    #[arg(long)]
    pub resolution: Option<String>,

    /// Images per prompt
    #[arg(
        short = 'n',
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub count: u32,

    /// Base seed; the k-th image of a run uses seed + k (default: random per image)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Use MPS even above its safe resolution limit
    #[arg(long)]
    pub force_mps: bool,
}

impl PromptArgs {
    /// A bare prompt with every other option at its default.
    pub fn literal(prompt: &str) -> Self {
        Self {
            prompt: Some(prompt.to_string()),
            prompts_file: None,
            ratio: None,
            resolution: None,
            count: 1,
            seed: None,
            force_mps: false,
        }
    }

    pub fn source(&self) -> Option<PromptSource> {
        match (&self.prompt, &self.prompts_file) {
            (Some(prompt), _) => Some(PromptSource::Literal(prompt.clone())),
            (None, Some(path)) => Some(PromptSource::File(path.clone())),
            (None, None) => None,
        }
    }
}
