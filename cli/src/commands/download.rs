//! Model download / cache check

use anyhow::Result;
use std::path::{Path, PathBuf};
use zimage_core::downloaders::download_model;

pub async fn execute(model_id: &str, model_dir: &Path, token: Option<String>) -> Result<PathBuf> {
    println!("Checking model {}...", model_id);
    let model_path = download_model(model_id, model_dir, token).await?;
    println!("Model ready: {}", model_path.display());
    Ok(model_path)
}
