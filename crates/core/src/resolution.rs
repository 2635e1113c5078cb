//! Output resolution parsing and alignment

use thiserror::Error;

/// Z-Image latents require dimensions divisible by this.
pub const ALIGNMENT: u32 = 16;

/// Used when neither a ratio nor an explicit resolution is given.
pub const DEFAULT_RATIO: &str = "1:1";

/// Preset aspect ratios and their native resolutions
pub const ASPECT_RATIOS: &[(&str, (u32, u32))] = &[
    ("1:1", (1024, 1024)),
    ("16:9", (1344, 768)),
    ("9:16", (768, 1344)),
    ("4:3", (1152, 896)),
    ("3:4", (896, 1152)),
    ("3:2", (1216, 832)),
    ("2:3", (832, 1216)),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Invalid resolution '{0}', expected WIDTHxHEIGHT (e.g. 1024x768)")]
    Malformed(String),

    #[error("Unknown aspect ratio '{0}', expected one of: {list}", list = ratio_names().join(", "))]
    UnknownRatio(String),
}

/// Names of the preset ratios, in display order
pub fn ratio_names() -> Vec<&'static str> {
    ASPECT_RATIOS.iter().map(|(name, _)| *name).collect()
}

/// Look up a preset ratio
pub fn ratio_dimensions(ratio: &str) -> Option<(u32, u32)> {
    ASPECT_RATIOS
        .iter()
        .find(|(name, _)| *name == ratio)
        .map(|(_, dims)| *dims)
}

/// Resolve the requested size. An explicit `WxH` wins over `ratio`; with
/// neither, the 1:1 preset is used.
pub fn parse_resolution(
    ratio: Option<&str>,
    resolution: Option<&str>,
) -> Result<(u32, u32), ResolutionError> {
    if let Some(resolution) = resolution.filter(|r| !r.trim().is_empty()) {
        let lower = resolution.trim().to_lowercase();
        let (w, h) = lower
            .split_once('x')
            .ok_or_else(|| ResolutionError::Malformed(resolution.to_string()))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<u32>()
                .map_err(|_| ResolutionError::Malformed(resolution.to_string()))
        };
        return Ok((parse(w)?, parse(h)?));
    }

    let ratio = ratio.unwrap_or(DEFAULT_RATIO);
    ratio_dimensions(ratio).ok_or_else(|| ResolutionError::UnknownRatio(ratio.to_string()))
}

/// Round both dimensions down to a multiple of [`ALIGNMENT`].
///
/// Inputs below 16 align to 0; callers decide whether that is an error.
pub fn align(width: u32, height: u32) -> (u32, u32) {
    (
        (width / ALIGNMENT) * ALIGNMENT,
        (height / ALIGNMENT) * ALIGNMENT,
    )
}
