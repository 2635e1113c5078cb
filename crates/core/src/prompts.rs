//! Prompt, template and instruction files
//!
//! Generated prompts are stored as a JSON array of [`PromptRecord`]s.
//! Prompt lists for image generation are read from the same JSON shape
//! or from plain text files with one prompt per line.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::template::Template;

/// Placeholder an instruction file must contain
pub const DESCRIPTION_PLACEHOLDER: &str = "{template_description}";

/// Instruction used when no instruction file is given
pub const DEFAULT_INSTRUCTION: &str = include_str!("../assets/default_instruction.txt");

/// Template used when no template file is given
pub const DEFAULT_TEMPLATE: &str = include_str!("../assets/default_template.json");

#[derive(Debug, Error)]
pub enum PromptFileError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Template {0} must contain a JSON object")]
    NotAnObject(PathBuf),

    #[error("Prompt file {0} must contain a JSON array of objects with a \"description\" field")]
    NotAnArray(PathBuf),

    #[error("Instruction file {0} must contain {{template_description}} placeholder")]
    MissingPlaceholder(PathBuf),

    #[error("Unsupported file format '{extension}' for {path} (use .json or .txt)")]
    UnsupportedFormat { path: PathBuf, extension: String },
}

/// One generated prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub description: String,
}

impl PromptRecord {
    pub fn new(description: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            id: generate_prompt_id(now),
            description: description.into(),
        }
    }

    /// JSON object with `id` first, as stored in prompts files
    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "description": self.description,
        })
    }
}

/// Prompt id in the form `YYYY-MM-DD_HH-MM-SS`
pub fn generate_prompt_id(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn read(path: &Path) -> Result<String, PromptFileError> {
    fs::read_to_string(path).map_err(|source| PromptFileError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_json(path: &Path, content: &str) -> Result<Value, PromptFileError> {
    serde_json::from_str(content).map_err(|source| PromptFileError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a template object from a JSON file
pub fn load_template(path: &Path) -> Result<Template, PromptFileError> {
    tracing::info!("Loading template from {}", path.display());
    parse_template(path, &read(path)?)
}

/// Parse the built-in template
pub fn default_template() -> Result<Template, PromptFileError> {
    parse_template(Path::new("<built-in template>"), DEFAULT_TEMPLATE)
}

fn parse_template(path: &Path, content: &str) -> Result<Template, PromptFileError> {
    match parse_json(path, content)? {
        Value::Object(map) => Ok(map),
        _ => Err(PromptFileError::NotAnObject(path.to_path_buf())),
    }
}

/// Load an LLM instruction file; it must reference the description.
pub fn load_instruction(path: &Path) -> Result<String, PromptFileError> {
    tracing::info!("Loading instruction from {}", path.display());
    let instruction = read(path)?;
    if !instruction.contains(DESCRIPTION_PLACEHOLDER) {
        return Err(PromptFileError::MissingPlaceholder(path.to_path_buf()));
    }
    Ok(instruction)
}

/// Substitute every placeholder occurrence with the description
pub fn render_instruction(instruction: &str, description: &str) -> String {
    instruction.replace(DESCRIPTION_PLACEHOLDER, description)
}

/// Load the array already stored in a prompts file. Entries are kept as
/// raw JSON so hand-written or foreign records survive an append. A missing
/// or empty file yields an empty list; anything else that is not a JSON
/// array is an error so the file is never overwritten.
pub fn load_existing_prompts(path: &Path) -> Result<Vec<Value>, PromptFileError> {
    if !path.exists() {
        tracing::info!("No existing prompts file found at {}. Creating new.", path.display());
        return Ok(Vec::new());
    }

    let content = read(path)?;
    if content.trim().is_empty() {
        tracing::info!("Empty prompts file found. Creating new.");
        return Ok(Vec::new());
    }

    let Value::Array(entries) = parse_json(path, &content)? else {
        return Err(PromptFileError::NotAnArray(path.to_path_buf()));
    };
    tracing::info!("Loaded {} existing prompts from {}", entries.len(), path.display());
    Ok(entries)
}

/// Write prompt entries as pretty JSON, creating parent directories
pub fn save_prompts<T: Serialize>(path: &Path, prompts: &[T]) -> Result<(), PromptFileError> {
    let write_err = |source: io::Error| PromptFileError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let content = serde_json::to_string_pretty(prompts).map_err(|source| PromptFileError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(write_err)?;

    tracing::info!("Saved {} prompts to {}", prompts.len(), path.display());
    Ok(())
}

/// Read prompts from a JSON array; entries without a string
/// `description` are skipped with a warning.
pub fn load_prompts_from_json(path: &Path) -> Result<Vec<String>, PromptFileError> {
    let Value::Array(entries) = parse_json(path, &read(path)?)? else {
        return Err(PromptFileError::NotAnArray(path.to_path_buf()));
    };

    let mut prompts = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match entry.get("description").and_then(Value::as_str) {
            Some(description) => prompts.push(description.to_string()),
            None => tracing::warn!(
                "Skipping entry {} in {}: missing \"description\" field",
                i + 1,
                path.display()
            ),
        }
    }
    Ok(prompts)
}

/// Read one prompt per line, ignoring blank lines
pub fn load_prompts_from_text(path: &Path) -> Result<Vec<String>, PromptFileError> {
    Ok(read(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Load prompts, choosing the reader by file extension
pub fn load_prompts(path: &Path) -> Result<Vec<String>, PromptFileError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "json" => load_prompts_from_json(path),
        "txt" => load_prompts_from_text(path),
        _ => Err(PromptFileError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        }),
    }
}
