//! Run one generation and persist the result

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use zimage_core::device::DeviceKind;

use crate::{DiffusionModel, ImageGenRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub seed: u64,
    pub path: PathBuf,
}

/// Seed for the `index`-th image of a batch
pub fn batch_seed(base: Option<u64>, index: u64) -> Option<u64> {
    base.map(|seed| seed.wrapping_add(index))
}

/// `<output_dir>/<YYMMDD>/<HHMMSS>_<seed>_nbp.png`
pub fn output_path(output_dir: &Path, now: DateTime<Local>, seed: u64) -> PathBuf {
    output_dir
        .join(now.format("%y%m%d").to_string())
        .join(format!("{}_{}_nbp.png", now.format("%H%M%S"), seed))
}

/// First of `path`, `<stem>_1.<ext>`, `<stem>_2.<ext>`, ... not yet on disk
pub fn free_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("png");
    (1u32..)
        .map(|n| path.with_file_name(format!("{}_{}.{}", stem, n, extension)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Encode RGB pixels as PNG, creating parent directories
pub fn save_png(pixels: Vec<u8>, width: u32, height: u32, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }

    let img = image::RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow::anyhow!("Failed to create image from pixels"))?;

    img.save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to save image to {}", path.display()))?;
    Ok(())
}

/// Generate one image and write it under `output_dir`.
///
/// A seed is drawn when the request has none, so every saved file names
/// the seed that reproduces it.
pub fn generate_image(
    model: &dyn DiffusionModel,
    request: &ImageGenRequest,
    kind: DeviceKind,
    output_dir: &Path,
) -> Result<GeneratedImage> {
    let seed = request
        .seed
        .unwrap_or_else(|| rand::thread_rng().gen_range(0..u32::MAX as u64));
    let request = ImageGenRequest {
        seed: Some(seed),
        ..request.clone()
    };

    tracing::debug!(
        "Generating {}x{} on {} with seed {}",
        request.width,
        request.height,
        kind,
        seed
    );
    let response = model.generate(&request)?;

    if kind.is_accelerator() {
        model
            .synchronize()
            .with_context(|| format!("Failed to synchronize {} device", kind))?;
    }

    // Same seed within the same second must not replace an earlier image
    let path = free_path(&output_path(output_dir, Local::now(), seed));
    save_png(response.pixels, response.width, response.height, &path)?;
    tracing::info!("Saved {}", path.display());

    Ok(GeneratedImage { seed, path })
}
