//! zimage_core - Core library for prompt and image generation
//!
//! This crate provides:
//! - Template resolution and randomized variations
//! - Prompt sanitization and prompt/template file handling
//! - Resolution alignment and compute device selection
//! - Configuration and HuggingFace model downloads

pub mod config;
pub mod device;
pub mod downloaders;
pub mod interrupt;
pub mod prompts;
pub mod resolution;
pub mod sanitize;
pub mod template;

pub use config::Config;
pub use device::{resolve_device, Availability, DeviceError, DeviceKind, DeviceRequest};
pub use interrupt::InterruptFlag;
pub use prompts::{PromptFileError, PromptRecord};
pub use resolution::{align, parse_resolution, ResolutionError};
pub use sanitize::{is_problematic, sanitize};
pub use template::{create_description, fallback_prompt, generate_variations, Template, TemplateError};
