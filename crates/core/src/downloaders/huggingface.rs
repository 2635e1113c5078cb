use anyhow::{Context, Result};
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use std::fs;
use std::path::{Path, PathBuf};

use super::Downloader;

/// Sub-directories of a diffusers-style repo the Z-Image pipeline loads
const PIPELINE_COMPONENTS: &[&str] = &["tokenizer", "text_encoder", "transformer", "vae"];

pub struct HuggingFaceDownloader {
    api: Api,
}

impl HuggingFaceDownloader {
    /// Downloads go to `cache_dir` in the standard hub layout, so an
    /// interrupted download resumes on the next run.
    pub fn new(cache_dir: &Path, token: Option<String>) -> Result<Self> {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("Failed to create model directory {}", cache_dir.display()))?;

        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_token(token)
            .with_progress(true)
            .build()
            .context("Failed to create HuggingFace client")?;

        Ok(Self { api })
    }
}

/// Pick the pipeline files out of a repo listing
pub fn select_files(siblings: &[String]) -> Vec<String> {
    siblings
        .iter()
        .filter(|name| {
            let Some((component, file)) = name.split_once('/') else {
                return name.as_str() == "model_index.json";
            };
            PIPELINE_COMPONENTS.contains(&component)
                && (file.ends_with(".json")
                    || file.ends_with(".safetensors")
                    || file.ends_with(".txt")
                    || file.ends_with(".model"))
        })
        .cloned()
        .collect()
}

/// Root of the snapshot that `file` (relative repo path) was stored in
fn snapshot_root(local_file: &Path, repo_file: &str) -> Option<PathBuf> {
    let depth = repo_file.split('/').count();
    local_file.ancestors().nth(depth).map(Path::to_path_buf)
}

#[async_trait]
impl Downloader for HuggingFaceDownloader {
    async fn download(&self, model_id: &str) -> Result<PathBuf> {
        let repo = self.api.model(model_id.to_string());

        tracing::info!("Fetching model info for {}", model_id);
        let info = repo
            .info()
            .await
            .with_context(|| format!("Model '{}' not found on HuggingFace", model_id))?;

        let siblings: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
        let files = select_files(&siblings);
        if files.is_empty() {
            anyhow::bail!("No pipeline files found for model '{}'", model_id);
        }

        tracing::info!("Checking {} file(s) for {}", files.len(), model_id);

        let mut root = None;
        for file in &files {
            let local = repo
                .get(file)
                .await
                .with_context(|| format!("Failed to download {}", file))?;
            if root.is_none() {
                root = snapshot_root(&local, file);
            }
        }

        root.ok_or_else(|| anyhow::anyhow!("Failed to locate downloaded snapshot for '{}'", model_id))
    }
}

/// Return a local model directory, downloading `model_id` into
/// `cache_dir` when it is not already a path on disk.
pub async fn download_model(model_id: &str, cache_dir: &Path, token: Option<String>) -> Result<PathBuf> {
    let local = PathBuf::from(model_id);
    if local.is_dir() {
        tracing::info!("Using local model directory {}", local.display());
        return Ok(local);
    }

    HuggingFaceDownloader::new(cache_dir, token)?
        .download(model_id)
        .await
}
