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
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokenizers::Tokenizer;
use zimage_core::resolution::ALIGNMENT;

use crate::device::{to_candle_device, PipelineOptions};
use crate::{DiffusionModel, ImageGenRequest, ImageGenResponse};

/// Z-Image scheduler constants
const BASE_IMAGE_SEQ_LEN: usize = 256;
const MAX_IMAGE_SEQ_LEN: usize = 4096;
const BASE_SHIFT: f64 = 0.5;
const MAX_SHIFT: f64 = 1.15;

const LATENT_CHANNELS: usize = 16;

/// Z-Image generation pipeline
pub struct ZImagePipeline {
    tokenizer: Tokenizer,
    text_encoder: ZImageTextEncoder,
    /// Where the text encoder runs; the CPU in memory-saving mode
    encoder_device: Device,
    transformer: ZImageTransformer2DModel,
    vae: AutoEncoderKL,
    device: Device,
    dtype: DType,
    scheduler: Mutex<FlowMatchEulerDiscreteScheduler>,
}

fn read_config<T: DeserializeOwned>(path: &Path, default: impl FnOnce() -> T) -> Result<T> {
    if !path.exists() {
        return Ok(default());
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("Invalid config {}", path.display()))
}

/// Sharded safetensors in `dir`, in shard order
fn weight_files(dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(stem) && n.ends_with(".safetensors"))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!("Weights not found in {}", dir.display());
    }
    Ok(files)
}

impl ZImagePipeline {
    /// Load Z-Image pipeline from a model directory
    pub fn load(model_path: &Path, options: PipelineOptions) -> Result<Self> {
        let device = to_candle_device(options.kind)?;
        let dtype = options.dtype;
        let (encoder_device, encoder_dtype) = if options.low_memory {
            tracing::info!("Memory-saving mode: text encoder stays on the CPU");
            (Device::Cpu, DType::F32)
        } else {
            (device.clone(), dtype)
        };

        let tokenizer_path = model_path.join("tokenizer").join("tokenizer.json");
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer not found at {}", tokenizer_path.display());
        }
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let text_encoder_dir = model_path.join("text_encoder");
        let text_encoder_cfg: TextEncoderConfig =
            read_config(&text_encoder_dir.join("config.json"), TextEncoderConfig::z_image)?;
        let files = weight_files(&text_encoder_dir, "model")?;
        tracing::debug!("Loading text encoder from {} shard(s)", files.len());
        let text_encoder_weights =
            unsafe { VarBuilder::from_mmaped_safetensors(&files, encoder_dtype, &encoder_device)? };
        let text_encoder = ZImageTextEncoder::new(&text_encoder_cfg, text_encoder_weights)?;

        let transformer_dir = model_path.join("transformer");
        let transformer_cfg: Config =
            read_config(&transformer_dir.join("config.json"), Config::z_image_turbo)?;
        let files = weight_files(&transformer_dir, "diffusion_pytorch_model")?;
        tracing::debug!("Loading transformer from {} shard(s)", files.len());
        let transformer_weights =
            unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, &device)? };
        let transformer = ZImageTransformer2DModel::new(&transformer_cfg, transformer_weights)?;

        let vae_dir = model_path.join("vae");
        let vae_cfg: VaeConfig = read_config(&vae_dir.join("config.json"), VaeConfig::z_image)?;
        let files = weight_files(&vae_dir, "diffusion_pytorch_model")?;
        let vae_weights = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, &device)? };
        let vae = AutoEncoderKL::new(&vae_cfg, vae_weights)?;

        let scheduler = FlowMatchEulerDiscreteScheduler::new(SchedulerConfig::z_image_turbo());

        Ok(Self {
            tokenizer,
            text_encoder,
            encoder_device,
            transformer,
            vae,
            device,
            dtype,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Format prompt for Qwen3 chat template
    fn format_prompt(prompt: &str) -> String {
        format!(
            "<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
            prompt
        )
    }

    /// Caption features on the generation device
    fn encode_prompt(&self, prompt: &str) -> Result<(Tensor, Tensor)> {
        let formatted = Self::format_prompt(prompt);
        let tokens = self
            .tokenizer
            .encode(formatted.as_str(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?
            .get_ids()
            .to_vec();
        let len = tokens.len();

        let input_ids = Tensor::from_vec(tokens, (1, len), &self.encoder_device)?;
        let cap_feats = self
            .text_encoder
            .forward(&input_ids)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?;
        let cap_mask = Tensor::ones((1, len), DType::U8, &self.device)?;
        Ok((cap_feats, cap_mask))
    }

    /// Standard-normal latents drawn on the CPU, so a seed gives the same
    /// starting point on every device
    fn initial_latents(&self, seed: u64, latent_h: usize, latent_w: usize) -> Result<Tensor> {
        let mut rng = StdRng::seed_from_u64(seed);
        let count = LATENT_CHANNELS * latent_h * latent_w;
        let noise: Vec<f32> = (0..count).map(|_| StandardNormal.sample(&mut rng)).collect();

        let latents = Tensor::from_vec(noise, (1, LATENT_CHANNELS, latent_h, latent_w), &Device::Cpu)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?;
        Ok(latents)
    }

    fn generate_internal(&self, request: &ImageGenRequest) -> Result<ImageGenResponse> {
        let num_steps = request.steps as usize;
        let height = request.height as usize;
        let width = request.width as usize;
        let vae_align = ALIGNMENT as usize;

        if height == 0 || width == 0 || height % vae_align != 0 || width % vae_align != 0 {
            anyhow::bail!(
                "Image dimensions must be non-zero multiples of {}. Got {}x{}",
                vae_align,
                width,
                height
            );
        }

        let (cap_feats, cap_mask) = self.encode_prompt(&request.prompt)?;

        let latent_h = 2 * (height / vae_align);
        let latent_w = 2 * (width / vae_align);

        let patch_size = self.transformer.config().all_patch_size[0];
        let image_seq_len = (latent_h / patch_size) * (latent_w / patch_size);
        let mu = calculate_shift(
            image_seq_len,
            BASE_IMAGE_SEQ_LEN,
            MAX_IMAGE_SEQ_LEN,
            BASE_SHIFT,
            MAX_SHIFT,
        );

        let mut scheduler = self
            .scheduler
            .lock()
            .map_err(|_| anyhow::anyhow!("Scheduler lock poisoned"))?;
        *scheduler = FlowMatchEulerDiscreteScheduler::new(SchedulerConfig::z_image_turbo());
        scheduler.set_timesteps(num_steps, Some(mu));

        let seed = request.seed.unwrap_or_default();
        let mut latents = self.initial_latents(seed, latent_h, latent_w)?.unsqueeze(2)?; // frame dim

        for _step in 0..num_steps {
            let t = scheduler.current_timestep_normalized();
            let t_tensor =
                Tensor::from_vec(vec![t as f32], (1,), &self.device)?.to_dtype(self.dtype)?;

            let noise_pred = self
                .transformer
                .forward(&latents, &t_tensor, &cap_feats, &cap_mask)?;

            // Z-Image predicts the negated velocity
            let noise_pred = noise_pred.neg()?;

            let prev_latents = scheduler.step(&noise_pred.squeeze(2)?, &latents.squeeze(2)?)?;
            latents = prev_latents.unsqueeze(2)?;
        }

        drop(scheduler);

        let latents = latents.squeeze(2)?;
        let image = self.vae.decode(&latents)?;

        let image = postprocess_image(&image)?;
        let image = image.i(0)?; // batch

        let (c, h, w) = image.dims3()?;
        if c != 3 {
            anyhow::bail!("Expected 3 channels from the VAE, got {}", c);
        }

        // CHW -> HWC for the PNG encoder
        let pixels: Vec<u8> = image.permute((1, 2, 0))?.flatten_all()?.to_vec1()?;

        Ok(ImageGenResponse {
            pixels,
            width: w as u32,
            height: h as u32,
        })
    }
}

impl DiffusionModel for ZImagePipeline {
    fn generate(&self, request: &ImageGenRequest) -> Result<ImageGenResponse> {
        self.generate_internal(request)
    }

    fn name(&self) -> &str {
        "Z-Image-Turbo"
    }

    fn synchronize(&self) -> Result<()> {
        self.device.synchronize()?;
        Ok(())
    }
}

// The scheduler is behind a Mutex and the candle modules are read-only
// during inference.
unsafe impl Send for ZImagePipeline {}
unsafe impl Sync for ZImagePipeline {}
