use crate::error::HarnessError;

/// Handle to the local compute device bound to this rank, one-to-one
/// with the local ordinal on its host.
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    ordinal: usize,
}

impl DeviceHandle {
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn name(&self) -> String {
        format!("device{}", self.ordinal)
    }

    /// Drain queued device work. The measurement engine calls this at
    /// the timing boundaries; with host-resident buffers all work is
    /// already complete when the collective returns, so this is a no-op
    /// kept for the protocol points a device-backed transport needs.
    pub fn synchronize(&self) {}
}

/// Number of devices visible to this process, from the launcher's
/// `CUDA_VISIBLE_DEVICES` list. Absent or empty means host-only.
pub fn visible_device_count() -> usize {
    std::env::var("CUDA_VISIBLE_DEVICES")
        .map(|list| count_from_list(&list))
        .unwrap_or(0)
}

fn count_from_list(list: &str) -> usize {
    list.split(',').filter(|s| !s.trim().is_empty()).count()
}

/// Bind the device for a local ordinal against an explicit visible
/// count. Split out from [`bind_local_device`] so it stays testable
/// without touching the environment.
pub fn bind_device(local_ordinal: usize, visible: usize) -> Result<DeviceHandle, HarnessError> {
    if local_ordinal >= visible {
        return Err(HarnessError::DeviceUnavailable {
            ordinal: local_ordinal,
            visible,
        });
    }
    Ok(DeviceHandle {
        ordinal: local_ordinal,
    })
}

/// Map this process's local ordinal to a compute device. Failure is
/// non-fatal to the harness: the caller logs a warning and proceeds
/// without device acceleration.
pub fn bind_local_device(local_ordinal: usize) -> Result<DeviceHandle, HarnessError> {
    bind_device(local_ordinal, visible_device_count())
}
