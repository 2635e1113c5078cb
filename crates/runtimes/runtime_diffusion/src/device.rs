//! Host probing and conversion to candle devices

use anyhow::Result;
use candle_core::{DType, Device};
use zimage_core::device::{Availability, DeviceKind};

/// Ask candle which accelerators this build and host can use
pub fn probe_availability() -> Availability {
    Availability {
        cuda: candle_core::utils::cuda_is_available(),
        mps: candle_core::utils::metal_is_available(),
    }
}

pub fn to_candle_device(kind: DeviceKind) -> Result<Device> {
    let device = match kind {
        DeviceKind::Cuda => Device::new_cuda(0)?,
        DeviceKind::Mps => Device::new_metal(0)?,
        DeviceKind::Cpu => Device::Cpu,
    };
    Ok(device)
}

/// BF16 on CUDA; Metal and CPU run in F32
pub fn dtype_for(kind: DeviceKind) -> DType {
    match kind {
        DeviceKind::Cuda => DType::BF16,
        DeviceKind::Mps | DeviceKind::Cpu => DType::F32,
    }
}

/// How the pipeline is placed on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub kind: DeviceKind,
    pub dtype: DType,
    /// Keep the text encoder on the CPU and move only its embeddings
    pub low_memory: bool,
}

impl PipelineOptions {
    /// Memory-saving mode is used on Metal, where the GPU shares system RAM
    pub fn for_device(kind: DeviceKind) -> Self {
        Self {
            kind,
            dtype: dtype_for(kind),
            low_memory: kind == DeviceKind::Mps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_per_device() {
        assert_eq!(dtype_for(DeviceKind::Cuda), DType::BF16);
        assert_eq!(dtype_for(DeviceKind::Mps), DType::F32);
        assert_eq!(dtype_for(DeviceKind::Cpu), DType::F32);
    }

    #[test]
    fn test_low_memory_only_on_metal() {
        assert!(PipelineOptions::for_device(DeviceKind::Mps).low_memory);
        assert!(!PipelineOptions::for_device(DeviceKind::Cuda).low_memory);
        assert!(!PipelineOptions::for_device(DeviceKind::Cpu).low_memory);
    }

    #[test]
    fn test_cpu_device() {
        assert!(matches!(to_candle_device(DeviceKind::Cpu).unwrap(), Device::Cpu));
    }
}
