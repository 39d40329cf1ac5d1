//! Compute device selection
//!
//! The device is an opaque capability from the core's point of view; the
//! cascade below mirrors the cargo features: `cuda` tries CUDA first,
//! `metal` tries Metal, both fall back to CPU.

use candle_core::Device;

#[cfg(feature = "cuda")]
/// Select the compute device. When built with the `cuda` feature, it will try
/// to use CUDA and fall back to CPU.
pub fn select_device() -> Device {
    Device::cuda_if_available(0).unwrap_or(Device::Cpu)
}

#[cfg(all(feature = "metal", not(feature = "cuda")))]
/// Select the compute device. Metal is tried first, then CPU as a fallback.
pub fn select_device() -> Device {
    Device::new_metal(0).unwrap_or(Device::Cpu)
}

#[cfg(all(not(feature = "cuda"), not(feature = "metal")))]
/// Select the compute device. CUDA/Metal support is disabled; CPU is always
/// used.
pub fn select_device() -> Device {
    Device::Cpu
}
