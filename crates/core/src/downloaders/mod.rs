pub mod huggingface;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Make the model available locally and return its root directory
    async fn download(&self, model_id: &str) -> Result<PathBuf>;
}

pub use huggingface::{download_model, HuggingFaceDownloader};
