//! # Device Selection
//!
//! Picks the compute device (CPU/GPU) Whisper models are loaded onto.
//! Detection runs once per process; every model after the first reuses the answer.

use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Cached result of automatic detection
static DETECTED_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preference from configuration (`models.device`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// CUDA, then Metal, then CPU
    #[default]
    Auto,
    Cpu,
    /// Falls back to CPU when no CUDA device is present
    Cuda,
    /// Falls back to CPU when no Metal device is present
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference to a concrete device.
pub fn select_device(preference: DevicePreference) -> Device {
    match preference {
        DevicePreference::Auto => DETECTED_DEVICE.get_or_init(detect_best_device).clone(),
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => Device::new_cuda(0).unwrap_or(Device::Cpu),
        DevicePreference::Metal => Device::new_metal(0).unwrap_or(Device::Cpu),
    }
}

fn detect_best_device() -> Device {
    info!("Detecting best available compute device...");

    match Device::new_cuda(0) {
        Ok(device) => {
            info!("Selected CUDA GPU for Whisper inference");
            return device;
        }
        Err(e) => debug!("CUDA not available: {}", e),
    }

    match Device::new_metal(0) {
        Ok(device) => {
            info!("Selected Metal GPU for Whisper inference");
            return device;
        }
        Err(e) => debug!("Metal not available: {}", e),
    }

    info!("Using CPU for Whisper inference");
    Device::Cpu
}

/// Short label for logs and the health endpoint.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_preference_is_cpu() {
        let device = select_device(DevicePreference::Cpu);
        assert_eq!(device_label(&device), "cpu");
    }
}
