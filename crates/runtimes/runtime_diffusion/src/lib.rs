//! zimage_runtime_diffusion - Diffusion model inference runtime
//!
//! Loads the Z-Image (S3-DiT) pipeline with candle, picks the device and
//! precision, and writes generated images to disk.

mod device;
mod generate;
mod zimage;

use anyhow::Result;
use std::path::Path;

pub use device::{dtype_for, probe_availability, to_candle_device, PipelineOptions};
pub use generate::{batch_seed, generate_image, output_path, save_png, GeneratedImage};
pub use zimage::ZImagePipeline;

/// Z-Image-Turbo is distilled for few steps without CFG
pub const DEFAULT_STEPS: u32 = 9;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 0.0;

/// Image generation request
#[derive(Debug, Clone)]
pub struct ImageGenRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: Option<u64>,
}

impl Default for ImageGenRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            width: 1024,
            height: 1024,
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            seed: None,
        }
    }
}

/// Image generation response
pub struct ImageGenResponse {
    /// Raw pixel data (RGB, u8)
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Trait for diffusion model backends
pub trait DiffusionModel: Send + Sync {
    /// Generate an image from a text prompt
    fn generate(&self, request: &ImageGenRequest) -> Result<ImageGenResponse>;

    /// Get the model name
    fn name(&self) -> &str;

    /// Wait for queued device work to finish
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

/// Load the Z-Image pipeline from a model directory
pub fn load_model(model_path: &Path, options: PipelineOptions) -> Result<Box<dyn DiffusionModel>> {
    check_model_dir(model_path)?;
    let pipeline = ZImagePipeline::load(model_path, options)?;
    Ok(Box::new(pipeline))
}

/// Fail early with a readable message when the directory is not a
/// diffusers-style Z-Image checkout
pub fn check_model_dir(model_path: &Path) -> Result<()> {
    if !model_path.is_dir() {
        anyhow::bail!("Model directory not found: {}", model_path.display());
    }

    let missing: Vec<&str> = ["tokenizer", "text_encoder", "transformer", "vae"]
        .into_iter()
        .filter(|component| !model_path.join(component).is_dir())
        .collect();

    if !missing.is_empty() {
        anyhow::bail!(
            "{} is missing {}. Run with --download-only to fetch the model.",
            model_path.display(),
            missing.join(", ")
        );
    }
    Ok(())
}
