//! Compute device selection
//!
//! Pure decision logic: availability is passed in so the rules can be
//! tested without hardware. Probing the host lives in the diffusion
//! runtime.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pixel count above which Metal generation is known to fail
/// (buffer addressing limit in the backend).
pub const MPS_MAX_PIXELS: u64 = 1_100_000;

/// Device requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceRequest {
    #[default]
    Auto,
    Cuda,
    Mps,
    Cpu,
}

/// Device actually used for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// NVIDIA GPU
    Cuda,
    /// Apple Silicon GPU (Metal, unified memory)
    Mps,
    Cpu,
}

/// Which accelerators the host can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Availability {
    pub cuda: bool,
    pub mps: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("CUDA is not available. Install the NVIDIA driver and CUDA runtime, or build with the `cuda` feature. Use --device cpu to run without a GPU.")]
    CudaUnavailable,

    #[error("MPS (Metal) is not available. It requires Apple Silicon and a build with the `metal` feature. Use --device cpu to run without a GPU.")]
    MpsUnavailable,

    #[error(
        "Resolution {width}x{height} ({pixels} pixels) exceeds the MPS limit of {limit} pixels. \
         Use --device cpu, a smaller resolution, or --force-mps to try anyway."
    )]
    MpsPixelLimit {
        width: u32,
        height: u32,
        pixels: u64,
        limit: u64,
    },

    #[error("Unknown device '{0}', expected one of: auto, cuda, mps, cpu")]
    Unknown(String),
}

impl DeviceKind {
    /// True for the GPU backends
    pub fn is_accelerator(self) -> bool {
        !matches!(self, DeviceKind::Cpu)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::Mps => "mps",
            DeviceKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DeviceRequest {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceRequest::Auto => "auto",
            DeviceRequest::Cuda => "cuda",
            DeviceRequest::Mps => "mps",
            DeviceRequest::Cpu => "cpu",
        }
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceRequest {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DeviceRequest::Auto),
            "cuda" => Ok(DeviceRequest::Cuda),
            "mps" | "metal" => Ok(DeviceRequest::Mps),
            "cpu" => Ok(DeviceRequest::Cpu),
            _ => Err(DeviceError::Unknown(s.to_string())),
        }
    }
}

impl From<DeviceKind> for DeviceRequest {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Cuda => DeviceRequest::Cuda,
            DeviceKind::Mps => DeviceRequest::Mps,
            DeviceKind::Cpu => DeviceRequest::Cpu,
        }
    }
}

fn pixel_count(width: u32, height: u32) -> u64 {
    width as u64 * height as u64
}

/// True if the resolution is above what MPS handles reliably
pub fn exceeds_mps_limit(width: u32, height: u32) -> bool {
    pixel_count(width, height) > MPS_MAX_PIXELS
}

/// Reject resolutions the given device cannot handle. Only MPS has a
/// ceiling, and `force` overrides it.
pub fn check_pixel_limit(
    kind: DeviceKind,
    width: u32,
    height: u32,
    force: bool,
) -> Result<(), DeviceError> {
    if kind == DeviceKind::Mps && !force && exceeds_mps_limit(width, height) {
        return Err(DeviceError::MpsPixelLimit {
            width,
            height,
            pixels: pixel_count(width, height),
            limit: MPS_MAX_PIXELS,
        });
    }
    Ok(())
}

/// Pick the device for a run.
///
/// Explicit requests fail when the device is missing (or, for MPS, when
/// the resolution is over the ceiling without `force`). `Auto` prefers
/// CUDA, then MPS, and silently falls back to CPU.
pub fn resolve_device(
    requested: DeviceRequest,
    width: u32,
    height: u32,
    force: bool,
    availability: Availability,
) -> Result<DeviceKind, DeviceError> {
    match requested {
        DeviceRequest::Cpu => Ok(DeviceKind::Cpu),
        DeviceRequest::Cuda => {
            if !availability.cuda {
                return Err(DeviceError::CudaUnavailable);
            }
            Ok(DeviceKind::Cuda)
        }
        DeviceRequest::Mps => {
            if !availability.mps {
                return Err(DeviceError::MpsUnavailable);
            }
            check_pixel_limit(DeviceKind::Mps, width, height, force)?;
            Ok(DeviceKind::Mps)
        }
        DeviceRequest::Auto => {
            if availability.cuda {
                return Ok(DeviceKind::Cuda);
            }
            if availability.mps {
                if check_pixel_limit(DeviceKind::Mps, width, height, force).is_ok() {
                    return Ok(DeviceKind::Mps);
                }
                tracing::info!(
                    "{}x{} exceeds the MPS pixel limit, falling back to CPU",
                    width,
                    height
                );
            }
            Ok(DeviceKind::Cpu)
        }
    }
}
