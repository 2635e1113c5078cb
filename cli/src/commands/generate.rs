//! Batch image generation

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zimage_core::device::DeviceKind;
use zimage_core::resolution::{align, parse_resolution, ALIGNMENT};
use zimage_core::{is_problematic, sanitize, InterruptFlag};
use zimage_runtime_diffusion::{
    batch_seed, generate_image, DiffusionModel, GeneratedImage, ImageGenRequest,
};

/// Parse the requested size and round it down to the model's grid
pub fn target_resolution(ratio: Option<&str>, resolution: Option<&str>) -> Result<(u32, u32)> {
    let (width, height) = parse_resolution(ratio, resolution)?;
    let (aligned_width, aligned_height) = align(width, height);

    if aligned_width == 0 || aligned_height == 0 {
        anyhow::bail!(
            "Resolution {}x{} is too small, both sides must be at least {}",
            width,
            height,
            ALIGNMENT
        );
    }
    if (aligned_width, aligned_height) != (width, height) {
        println!(
            "Resolution aligned: {}x{} -> {}x{} (must be a multiple of {})",
            width, height, aligned_width, aligned_height, ALIGNMENT
        );
    }
    Ok((aligned_width, aligned_height))
}

/// One batch: every prompt is rendered `count` times
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub prompts: Vec<String>,
    pub count: u32,
    pub seed: Option<u64>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub images: Vec<GeneratedImage>,
    pub total: usize,
    pub interrupted: bool,
}

impl BatchOutcome {
    pub fn completed(&self) -> usize {
        self.images.len()
    }

    pub fn print_summary(&self) {
        if self.interrupted {
            println!("\nInterrupted by user.");
            if self.completed() > 0 {
                println!("Completed {}/{} image(s)", self.completed(), self.total);
            }
        } else if self.total > 1 {
            println!("\nDone: {} image(s) generated", self.completed());
        }
    }
}

/// A loaded pipeline bound to its device and output directory
pub struct Generator {
    model: Arc<dyn DiffusionModel>,
    kind: DeviceKind,
    output_dir: PathBuf,
    steps: u32,
    guidance_scale: f32,
}

impl Generator {
    pub fn new(
        model: Arc<dyn DiffusionModel>,
        kind: DeviceKind,
        output_dir: PathBuf,
        steps: u32,
        guidance_scale: f32,
    ) -> Self {
        Self {
            model,
            kind,
            output_dir,
            steps,
            guidance_scale,
        }
    }

    pub fn device(&self) -> DeviceKind {
        self.kind
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Run the batch, stopping after the in-flight image once `interrupt`
    /// is set. Images already written stay on disk.
    pub async fn run(&self, job: &BatchJob, interrupt: &InterruptFlag) -> Result<BatchOutcome> {
        let prompts: Vec<String> = job
            .prompts
            .iter()
            .enumerate()
            .filter_map(|(i, prompt)| prepare_prompt(i + 1, prompt))
            .collect();

        let mut outcome = BatchOutcome {
            total: prompts.len() * job.count as usize,
            ..BatchOutcome::default()
        };

        for (p, prompt) in prompts.iter().enumerate() {
            if prompts.len() > 1 {
                println!("\nPrompt [{}/{}]: {}", p + 1, prompts.len(), prompt);
            }

            for i in 0..job.count {
                if interrupt.is_set() {
                    outcome.interrupted = true;
                    return Ok(outcome);
                }

                let request = ImageGenRequest {
                    prompt: prompt.clone(),
                    width: job.width,
                    height: job.height,
                    steps: self.steps,
                    guidance_scale: self.guidance_scale,
                    seed: batch_seed(job.seed, i as u64),
                };

                let label = format!("[{}/{}]", outcome.completed() + 1, outcome.total);
                let image = self.generate_one(request, &label).await?;
                println!("Saved: {}", image.path.display());
                println!("Seed: {}", image.seed);
                outcome.images.push(image);
            }
        }

        outcome.interrupted = interrupt.is_set() && outcome.completed() < outcome.total;
        Ok(outcome)
    }

    async fn generate_one(&self, request: ImageGenRequest, label: &str) -> Result<GeneratedImage> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg} {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("Generating image {}...", label));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let model = Arc::clone(&self.model);
        let kind = self.kind;
        let output_dir = self.output_dir.clone();
        let start = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            generate_image(model.as_ref(), &request, kind, &output_dir)
        })
        .await
        .context("Generation task failed")?;

        spinner.finish_and_clear();
        let image = result?;
        println!(
            "Image {} generated in {:.2}s",
            label,
            start.elapsed().as_secs_f64()
        );
        Ok(image)
    }
}

/// Sanitize a prompt, warning about anything that may render badly.
/// Returns `None` when nothing usable is left.
fn prepare_prompt(index: usize, prompt: &str) -> Option<String> {
    let cleaned = sanitize(prompt);
    if cleaned.is_empty() {
        tracing::warn!("Prompt {} is empty after sanitizing, skipping", index);
        return None;
    }
    if is_problematic(&cleaned) {
        tracing::warn!(
            "Prompt {} may produce poor results (very short or unusual characters): {:?}",
            index,
            cleaned
        );
    }
    Some(cleaned)
}
