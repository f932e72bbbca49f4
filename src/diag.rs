use crate::device::{visible_device_count, DeviceHandle};

/// Launcher environment worth echoing before a run. Read-only: nothing
/// in the harness branches on these beyond what the CLI already parsed.
const ENV_VARS: &[&str] = &[
    "RANK",
    "LOCAL_RANK",
    "WORLD_SIZE",
    "MASTER_ADDR",
    "MASTER_PORT",
    "FABRICBENCH_LOG",
    "CUDA_VISIBLE_DEVICES",
];

/// Log a snapshot of environment and device state for human context.
pub fn log_snapshot(device: Option<&DeviceHandle>) {
    tracing::info!("--- environment snapshot ---");
    for var in ENV_VARS {
        let value = std::env::var(var).unwrap_or_else(|_| "not set".to_string());
        tracing::info!("{var}: {value}");
    }
    tracing::info!("visible devices: {}", visible_device_count());
    match device {
        Some(device) => tracing::info!("bound device: {}", device.name()),
        None => tracing::info!("running host-only"),
    }
}
