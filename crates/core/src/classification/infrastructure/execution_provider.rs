use ort::execution_providers::ExecutionProviderDispatch;

use crate::devices::domain::device::DeviceHandle;

/// Return the ONNX execution providers for a leased device.
///
/// GPUs get CUDA bound to the device ordinal when built with the `cuda`
/// feature, otherwise the platform's accelerator. The CPU slot uses the
/// default CPU provider.
pub fn execution_providers_for(device: &DeviceHandle) -> Vec<ExecutionProviderDispatch> {
    match device {
        DeviceHandle::Gpu(_) => gpu_execution_providers(device),
        DeviceHandle::Cpu => vec![],
    }
}

#[cfg(feature = "cuda")]
fn gpu_execution_providers(device: &DeviceHandle) -> Vec<ExecutionProviderDispatch> {
    let device_id = device.gpu_index().unwrap_or_else(|| {
        log::warn!("{device} has no numeric ordinal, binding CUDA device 0");
        0
    });
    vec![ort::execution_providers::CUDAExecutionProvider::default()
        .with_device_id(device_id)
        .build()]
}

#[cfg(not(feature = "cuda"))]
fn gpu_execution_providers(_device: &DeviceHandle) -> Vec<ExecutionProviderDispatch> {
    platform_execution_providers()
}

/// Return the preferred ONNX execution providers for the current platform.
///
/// Falls back to CPU if the platform-specific provider is unavailable.
#[cfg_attr(feature = "cuda", allow(dead_code))]
fn platform_execution_providers() -> Vec<ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}
