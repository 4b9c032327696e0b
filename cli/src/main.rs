mod args;
mod batch;
mod commands;
mod gpu;
mod plan;
mod repl;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use zimg_core::device::resolve_device;
use zimg_core::{resolution, Config, DeviceChoice, ImageFormat, Precision, PromptBatch};
use zimg_runtime_api::CancelFlag;
use zimg_runtime_diffusion::CandleProbe;

use crate::args::PromptArgs;

#[derive(Parser, Debug)]
#[command(name = "zimg")]
#[command(author, version, about = "Generate images locally with Z-Image-Turbo", long_about = None)]
struct Cli {
    #[command(flatten)]
    prompt: PromptArgs,

    /// Compute device
    #[arg(short, long, value_enum)]
    device: Option<DeviceChoice>,

    /// Keep the model loaded and read prompts interactively
    #[arg(short, long)]
    interactive: bool,

    /// Download the model and exit
    #[arg(long)]
    download_only: bool,

    /// Model cache directory
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Image output root
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// HuggingFace repository to load
    #[arg(long)]
    model_id: Option<String>,

    /// Weight precision
    #[arg(long, value_enum)]
    precision: Option<Precision>,

    /// Output image format
    #[arg(long, value_enum)]
    format: Option<ImageFormat>,

    /// Config file (default: ~/.config/zimg/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Effective options: command line over config file over built-in defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_dir: PathBuf,
    pub output_dir: PathBuf,
    pub model_id: String,
    pub precision: Precision,
    pub hf_token: Option<String>,
    pub device: DeviceChoice,
    pub ratio: Option<String>,
    pub format: ImageFormat,
}

impl Settings {
    fn merge(cli: &Cli, config: Config) -> Self {
        Self {
            model_dir: cli.model_dir.clone().unwrap_or(config.paths.model_dir),
            output_dir: cli.output_dir.clone().unwrap_or(config.paths.output_dir),
            model_id: cli.model_id.clone().unwrap_or(config.model.repo_id),
            precision: cli.precision.unwrap_or(config.model.precision),
            hf_token: config.model.hf_token,
            device: cli.device.unwrap_or(config.generation.device),
            ratio: cli.prompt.ratio.clone().or(config.generation.ratio),
            format: cli.format.unwrap_or(config.generation.format),
        }
    }
}

const DEFAULT_LOG_FILTER: &str = "warn,zimg_cli=info,zimg_core=info,\
    zimg_runtime_api=info,zimg_runtime_diffusion=info";

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.prompt.source().is_none() && !cli.interactive && !cli.download_only {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "one of --prompt or --prompts-file is required (or use --interactive)",
            )
            .exit();
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Usage mistakes exit 2 like clap's own errors; everything else exits 1.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<zimg_core::Error>() {
        Some(
            zimg_core::Error::InvalidResolutionFormat(_)
            | zimg_core::Error::UnsupportedPromptFileFormat(_),
        ) => 2,
        _ => 1,
    }
}

/// Prompts are loaded and validated before any device or model work, in
/// every mode.
fn load_prompts(cli: &Cli) -> Result<Option<PromptBatch>> {
    match cli.prompt.source() {
        Some(source) => Ok(Some(batch::load_batch(&source)?)),
        None => Ok(None),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let settings = Settings::merge(&cli, config);
    tracing::debug!(?settings, "effective settings");

    if cli.download_only {
        commands::download::execute(&settings)?;
        return Ok(ExitCode::SUCCESS);
    }

    let resolved =
        resolution::resolve(settings.ratio.as_deref(), cli.prompt.resolution.as_deref())?;
    if let Some((w, h)) = resolved.aligned_from {
        println!(
            "Resolution {}x{} aligned to {} (multiples of {})",
            w,
            h,
            resolved.resolution,
            resolution::ALIGNMENT
        );
    }
    let size = resolved.resolution;

    let batch = load_prompts(&cli)?;
    if !cli.interactive {
        let prompts = batch
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no prompt given"))?;
        if let Some(status) = commands::generate::preflight(prompts) {
            return Ok(status.exit_code());
        }
    }

    let decision = resolve_device(
        settings.device,
        size.width,
        size.height,
        cli.prompt.force_mps,
        &CandleProbe,
    )?;
    if let Some(notice) = decision.notice() {
        eprintln!("Warning: {}", notice);
    }
    match gpu::describe(decision.device) {
        Some(info) => println!("Device: {} - {}", decision.device, info),
        None => println!("Device: {}", decision.device),
    }
    println!("Resolution: {}", size);

    let model_path = commands::download::fetch(&settings)?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
            eprintln!("Failed to install Ctrl+C handler: {err}");
        }
    }

    let loaded = commands::load_session(&settings, decision.device, &model_path, &cancel)?;
    let Some(session) = loaded else {
        println!("Interrupted while loading the model.");
        return Ok(ExitCode::SUCCESS);
    };

    if cli.interactive {
        commands::interactive::execute(session, cancel, size, batch.as_ref(), &cli.prompt)?;
        return Ok(ExitCode::SUCCESS);
    }
    let batch = batch.ok_or_else(|| anyhow::anyhow!("no prompt given"))?;
    let status = commands::generate::execute(
        session,
        &cancel,
        size,
        &batch,
        cli.prompt.count,
        cli.prompt.seed,
    );
    Ok(status.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("zimg").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_defaults() {
        let cli = parse(&["-p", "a cat"]).unwrap();
        assert_eq!(cli.prompt.count, 1);
        assert!(cli.device.is_none());
        assert!(!cli.interactive && !cli.download_only && !cli.prompt.force_mps);
    }

    #[test]
    fn test_cli_full_surface() {
        let cli = parse(&[
            "-f", "prompts.json", "-r", "16:9", "-d", "mps", "--force-mps", "-s", "100", "-n", "2",
            "--model-dir", "/tmp/m", "--output-dir", "/tmp/o", "--precision", "bf16",
            "--format", "webp",
        ])
        .unwrap();
        assert_eq!(cli.prompt.prompts_file, Some(PathBuf::from("prompts.json")));
        assert_eq!(cli.device, Some(DeviceChoice::Mps));
        assert_eq!(cli.prompt.seed, Some(100));
        assert_eq!(cli.prompt.count, 2);
        assert_eq!(cli.precision, Some(Precision::Bf16));
        assert_eq!(cli.format, Some(ImageFormat::Webp));
    }

    #[test]
    fn test_cli_rejects_conflicts_and_bad_values() {
        assert_eq!(
            parse(&["-p", "a", "-f", "b.txt"]).unwrap_err().kind(),
            ErrorKind::ArgumentConflict
        );
        assert!(parse(&["-p", "a", "-r", "5:4"]).is_err());
        assert!(parse(&["-p", "a", "-n", "0"]).is_err());
        assert!(parse(&["-p", "a", "-d", "tpu"]).is_err());
    }

    #[test]
    fn test_cli_flags_override_config() {
        let mut config = Config::default();
        config.paths.output_dir = PathBuf::from("/srv/images");
        config.model.precision = Precision::F16;
        config.generation.device = DeviceChoice::Cpu;
        config.generation.ratio = Some("3:2".to_string());

        let cli = parse(&["-p", "a", "-d", "cuda"]).unwrap();
        let settings = Settings::merge(&cli, config.clone());
        assert_eq!(settings.device, DeviceChoice::Cuda);
        assert_eq!(settings.output_dir, PathBuf::from("/srv/images"));
        assert_eq!(settings.precision, Precision::F16);
        assert_eq!(settings.ratio.as_deref(), Some("3:2"));
        assert_eq!(settings.model_dir, PathBuf::from("models"));

        let settings = Settings::merge(&parse(&["-p", "a", "-r", "1:1"]).unwrap(), config);
        assert_eq!(settings.ratio.as_deref(), Some("1:1"));
        assert_eq!(settings.device, DeviceChoice::Cpu);
    }

    #[test]
    fn test_validation_errors_exit_with_usage_code() {
        let err: anyhow::Error = zimg_core::Error::InvalidResolutionFormat("big".into()).into();
        assert_eq!(exit_status(&err), 2);
        let err = anyhow::anyhow!("network down");
        assert_eq!(exit_status(&err), 1);
    }

    #[test]
    fn test_interactive_startup_validates_prompt_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("prompts.csv");
        std::fs::write(&csv, "a,b\n").unwrap();
        let csv = csv.to_string_lossy().into_owned();

        let err = load_prompts(&parse(&["-i", "-f", &csv]).unwrap()).unwrap_err();
        assert_eq!(exit_status(&err), 2);

        let missing = dir.path().join("missing.txt").to_string_lossy().into_owned();
        let err = load_prompts(&parse(&["-i", "-f", &missing]).unwrap()).unwrap_err();
        assert_eq!(exit_status(&err), 1);

        let txt = dir.path().join("prompts.txt");
        std::fs::write(&txt, "a red fox\na blue whale\n").unwrap();
        let txt = txt.to_string_lossy().into_owned();
        let batch = load_prompts(&parse(&["-i", "-f", &txt]).unwrap()).unwrap().unwrap();
        assert_eq!(batch.len(), 2);

        assert!(load_prompts(&parse(&["-i"]).unwrap()).unwrap().is_none());
    }
}
