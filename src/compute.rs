//! Compute backend selection
//!
//! The GPU check runs once at startup and the resulting `ComputeContext` is
//! passed by reference to every analyzer that cares. A missing or broken CUDA
//! setup silently resolves to the CPU path.

use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Execution path available to analyzers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeBackend {
    Cpu,
    Cuda { devices: i32 },
}

impl fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeBackend::Cpu => write!(f, "CPU"),
            ComputeBackend::Cuda { devices } => write!(f, "GPU (CUDA, {} device(s))", devices),
        }
    }
}

/// Immutable, detect-once description of the hardware path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeContext {
    backend: ComputeBackend,
}

impl ComputeContext {
    /// Probe for CUDA when `prefer_gpu` is set, falling back to CPU on any failure
    pub fn detect(prefer_gpu: bool) -> Self {
        if !prefer_gpu {
            info!("GPU disabled, using CPU path");
            return Self::cpu();
        }

        let backend = match opencv::core::get_cuda_enabled_device_count() {
            Ok(devices) if devices > 0 => ComputeBackend::Cuda { devices },
            Ok(_) => {
                debug!("No CUDA-enabled devices reported by OpenCV");
                ComputeBackend::Cpu
            }
            Err(e) => {
                debug!("CUDA probe failed: {}", e);
                ComputeBackend::Cpu
            }
        };

        info!("Processing mode: {}", backend);
        Self { backend }
    }

    pub fn cpu() -> Self {
        Self { backend: ComputeBackend::Cpu }
    }

    pub fn backend(&self) -> ComputeBackend {
        self.backend
    }

    pub fn gpu_available(&self) -> bool {
        matches!(self.backend, ComputeBackend::Cuda { .. })
    }
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self::cpu()
    }
}

/// Requested inference device for the object detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// CUDA when the compute context has it, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl Device {
    /// Resolve the request against what the context actually offers
    pub fn resolve(self, context: &ComputeContext) -> Device {
        match self {
            Device::Cpu => Device::Cpu,
            Device::Auto | Device::Cuda if context.gpu_available() => Device::Cuda,
            Device::Cuda => {
                info!("CUDA requested but unavailable, falling back to CPU");
                Device::Cpu
            }
            Device::Auto => Device::Cpu,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => write!(f, "auto"),
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other if other.starts_with("cuda:") => Ok(Device::Cuda),
            other => Err(format!("unknown device '{}', expected auto, cpu or cuda", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_disabled_is_cpu() {
        let context = ComputeContext::detect(false);
        assert_eq!(context.backend(), ComputeBackend::Cpu);
        assert!(!context.gpu_available());
    }

    #[test]
    fn test_detect_never_fails() {
        // Whatever the host has, detection resolves to a usable backend
        let context = ComputeContext::detect(true);
        match context.backend() {
            ComputeBackend::Cpu => assert!(!context.gpu_available()),
            ComputeBackend::Cuda { devices } => assert!(devices > 0),
        }
    }

    #[test]
    fn test_device_resolution_on_cpu_host() {
        let context = ComputeContext::cpu();
        assert_eq!(Device::Auto.resolve(&context), Device::Cpu);
        assert_eq!(Device::Cuda.resolve(&context), Device::Cpu);
        assert_eq!(Device::Cpu.resolve(&context), Device::Cpu);
    }

    #[test]
    fn test_device_resolution_on_gpu_host() {
        let context = ComputeContext { backend: ComputeBackend::Cuda { devices: 1 } };
        assert_eq!(Device::Auto.resolve(&context), Device::Cuda);
        assert_eq!(Device::Cuda.resolve(&context), Device::Cuda);
        assert_eq!(Device::Cpu.resolve(&context), Device::Cpu);
    }

    #[test]
    fn test_device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("cuda:0".parse::<Device>().unwrap(), Device::Cuda);
        assert_eq!("auto".parse::<Device>().unwrap(), Device::Auto);
        assert!("tpu".parse::<Device>().is_err());
    }
}
