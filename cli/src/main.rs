mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use zimage_core::device::{resolve_device, DeviceKind, DeviceRequest};
use zimage_core::prompts::load_prompts;
use zimage_core::resolution::DEFAULT_RATIO;
use zimage_core::{Config, InterruptFlag};
use zimage_runtime_diffusion::{load_model, probe_availability, PipelineOptions};

use commands::generate::{target_resolution, BatchJob, Generator};

const EXAMPLES: &str = "\
Examples:
  z-image -p \"a cat floating in space\"
  z-image -p \"mountain landscape\" --ratio 16:9
  z-image -p \"portrait photo\" --resolution 768x1344 --seed 42
  z-image -f input/prompts/prompts.json -n 2
  z-image --interactive";

#[derive(Parser, Debug)]
#[command(name = "z-image")]
#[command(author, version, about = "Text-to-image generation with Z-Image-Turbo", long_about = None)]
#[command(after_help = EXAMPLES)]
struct Cli {
    /// Prompt text (any language)
    #[arg(
        short,
        long,
        conflicts_with = "prompts_file",
        required_unless_present_any = ["prompts_file", "download_only", "interactive"]
    )]
    prompt: Option<String>,

    /// Read prompts from a .json (array of {"description": ...}) or .txt file
    #[arg(short = 'f', long)]
    prompts_file: Option<PathBuf>,

    /// Aspect ratio: 1:1, 16:9, 9:16, 4:3, 3:4, 3:2, 2:3
    #[arg(short, long, default_value = DEFAULT_RATIO)]
    ratio: String,

    /// Explicit resolution, e.g. 1024x768 (overrides --ratio)
    #[arg(long)]
    resolution: Option<String>,

    /// Random seed (incremented for each image of a batch)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Images per prompt
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    count: u32,

    /// Compute device: auto, cuda, mps, cpu
    #[arg(long, default_value = "auto")]
    device: DeviceRequest,

    /// Use MPS even above its pixel limit
    #[arg(long)]
    force_mps: bool,

    /// Start an interactive session (prompts are entered at the prompt line)
    #[arg(short, long, conflicts_with_all = ["prompt", "prompts_file"])]
    interactive: bool,

    /// Model cache directory (default: models.storage_path from config)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Output directory (default: output.images_dir from config)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Only download the model, do not generate
    #[arg(long)]
    download_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    // Validate the resolution before touching the model
    let (width, height) = target_resolution(Some(&cli.ratio), cli.resolution.as_deref())?;
    let kind = resolve_device(cli.device, width, height, cli.force_mps, probe_availability())?;

    println!("Resolution: {}x{}", width, height);
    if cli.device == DeviceRequest::Auto && kind == DeviceKind::Cpu {
        println!("Device: cpu (no usable accelerator, this will be slow)");
    } else {
        println!("Device: {}", kind);
    }

    let model_dir = cli
        .model_dir
        .clone()
        .unwrap_or_else(|| config.models.storage_path.clone());
    let model_path = commands::download::execute(
        &config.models.model_id,
        &model_dir,
        config.models.hf_token.clone(),
    )
    .await?;

    if cli.download_only {
        return Ok(());
    }

    // Read prompts before the slow pipeline load so a bad file fails fast
    let prompts = match (&cli.prompt, &cli.prompts_file) {
        (_, Some(file)) => {
            let prompts = load_prompts(file)?;
            println!("Loaded {} prompt(s) from {}", prompts.len(), file.display());
            prompts
        }
        (Some(prompt), None) => vec![prompt.clone()],
        (None, None) => Vec::new(),
    };

    if !cli.interactive && prompts.is_empty() {
        println!("No prompts to generate");
        return Ok(());
    }

    println!("Loading pipeline...");
    let options = PipelineOptions::for_device(kind);
    let model = tokio::task::spawn_blocking(move || load_model(&model_path, options))
        .await
        .context("Pipeline loading task failed")??;
    println!("Pipeline loaded: {}", model.name());

    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output.images_dir.clone());
    let generator = Generator::new(
        Arc::from(model),
        kind,
        output_dir,
        config.generation.steps,
        config.generation.guidance_scale,
    );

    let interrupt = InterruptFlag::install();

    if cli.interactive {
        return commands::interactive::execute(generator, cli.force_mps, interrupt).await;
    }

    let job = BatchJob {
        prompts,
        count: cli.count,
        seed: cli.seed,
        width,
        height,
    };
    let outcome = generator.run(&job, &interrupt).await?;
    outcome.print_summary();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_required_unless_other_mode() {
        assert!(Cli::try_parse_from(["z-image"]).is_err());
        assert!(Cli::try_parse_from(["z-image", "--download-only"]).is_ok());
        assert!(Cli::try_parse_from(["z-image", "-i"]).is_ok());
        assert!(Cli::try_parse_from(["z-image", "-f", "prompts.txt"]).is_ok());
    }

    #[test]
    fn test_prompt_and_file_conflict() {
        assert!(Cli::try_parse_from(["z-image", "-p", "cat", "-f", "prompts.json"]).is_err());
    }

    #[test]
    fn test_interactive_rejects_startup_prompts() {
        assert!(Cli::try_parse_from(["z-image", "-i", "-p", "a cat"]).is_err());
        assert!(Cli::try_parse_from(["z-image", "-i", "-f", "prompts.txt"]).is_err());
        assert!(Cli::try_parse_from(["z-image", "-i", "-r", "16:9", "-s", "3"]).is_ok());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["z-image", "-p", "a cat"]).unwrap();
        assert_eq!(cli.ratio, "1:1");
        assert_eq!(cli.count, 1);
        assert_eq!(cli.device, DeviceRequest::Auto);
        assert!(!cli.force_mps);
        assert_eq!(cli.seed, None);
    }

    #[test]
    fn test_device_and_count() {
        let cli = Cli::try_parse_from(["z-image", "-p", "x", "--device", "mps", "-n", "3", "-s", "7"]).unwrap();
        assert_eq!(cli.device, DeviceRequest::Mps);
        assert_eq!(cli.count, 3);
        assert_eq!(cli.seed, Some(7));

        assert!(Cli::try_parse_from(["z-image", "-p", "x", "--device", "tpu"]).is_err());
        assert!(Cli::try_parse_from(["z-image", "-p", "x", "-n", "0"]).is_err());
    }
}
