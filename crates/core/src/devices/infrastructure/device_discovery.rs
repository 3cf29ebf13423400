use std::path::Path;
use std::process::Command;

use thiserror::Error;

use crate::devices::domain::device::DeviceHandle;

pub const VISIBLE_DEVICES_VAR: &str = "CUDA_VISIBLE_DEVICES";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}")]
    Failed { tool: String, status: String },
}

/// Enumerates the devices jobs may lease.
///
/// Order of precedence: `cpu_only`, then `CUDA_VISIBLE_DEVICES`, then
/// `nvidia-smi`. Falls back to a single CPU slot when no GPU is found.
pub fn discover_devices(cpu_only: bool) -> Vec<DeviceHandle> {
    if cpu_only {
        log::info!("GPU discovery disabled, using CPU");
        return vec![DeviceHandle::Cpu];
    }

    if let Ok(value) = std::env::var(VISIBLE_DEVICES_VAR) {
        let devices = parse_visible_devices(&value);
        if devices.is_empty() {
            log::warn!("{VISIBLE_DEVICES_VAR} is set but lists no devices, using CPU");
            return vec![DeviceHandle::Cpu];
        }
        log::info!("using devices from {VISIBLE_DEVICES_VAR}: {}", join(&devices));
        return devices;
    }

    match query_nvidia_smi(Path::new("nvidia-smi")) {
        Ok(devices) if !devices.is_empty() => {
            log::info!("nvidia-smi reported devices: {}", join(&devices));
            devices
        }
        Ok(_) => {
            log::info!("no GPUs reported, using CPU");
            vec![DeviceHandle::Cpu]
        }
        Err(e) => {
            log::info!("GPU query unavailable ({e}), using CPU");
            vec![DeviceHandle::Cpu]
        }
    }
}

/// Parses a comma-separated device list such as `"0,1"`.
pub fn parse_visible_devices(value: &str) -> Vec<DeviceHandle> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty() && *id != "-1")
        .map(|id| DeviceHandle::Gpu(id.to_string()))
        .collect()
}

/// Parses `nvidia-smi --query-gpu=index --format=csv,noheader` output.
pub fn parse_gpu_indices(stdout: &str) -> Vec<DeviceHandle> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| DeviceHandle::Gpu(line.to_string()))
        .collect()
}

fn query_nvidia_smi(tool: &Path) -> Result<Vec<DeviceHandle>, DiscoveryError> {
    let output = Command::new(tool)
        .args(["--query-gpu=index", "--format=csv,noheader"])
        .output()
        .map_err(|source| DiscoveryError::Spawn {
            tool: tool.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(DiscoveryError::Failed {
            tool: tool.display().to_string(),
            status: output.status.to_string(),
        });
    }

    Ok(parse_gpu_indices(&String::from_utf8_lossy(&output.stdout)))
}

fn join(devices: &[DeviceHandle]) -> String {
    devices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
