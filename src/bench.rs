use std::time::{Duration, Instant};

use crate::device::DeviceHandle;
use crate::error::HarnessError;
use crate::fabric::Fabric;
use crate::group::Group;

pub const MIB: usize = 1024 * 1024;
pub const ELEMENT_WIDTH: usize = std::mem::size_of::<f32>();

/// Collective under measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    AllReduce,
}

impl Operation {
    /// Bytes effectively sent plus received per participant, relative to
    /// the buffer size. The factor 2 for all-reduce is a documented
    /// approximation of reporting convention, not a hardware constant;
    /// the true factor depends on the reduction algorithm.
    pub fn traffic_multiplier(self) -> f64 {
        match self {
            Operation::AllReduce => 2.0,
        }
    }

    async fn execute<F: Fabric>(
        self,
        group: &Group<F>,
        buf: &mut [f32],
    ) -> Result<(), HarnessError> {
        match self {
            Operation::AllReduce => group.all_reduce(buf).await,
        }
    }
}

/// Sweep configuration. Every rank must run the identical configuration
/// or the group deadlocks on the first size that diverges.
#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub sizes_mb: Vec<usize>,
    pub warmup_iters: u32,
    pub timed_iters: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sizes_mb: vec![1, 8, 64, 256, 1024],
            warmup_iters: 5,
            timed_iters: 10,
        }
    }
}

impl SweepConfig {
    /// Validated before the first collective call, so a malformed
    /// configuration fails locally instead of deadlocking a partially
    /// started group.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.timed_iters == 0 {
            return Err(HarnessError::InvalidIterationCount);
        }
        for &size_mb in &self.sizes_mb {
            if size_mb == 0 {
                return Err(HarnessError::InvalidSize { size_mb });
            }
        }
        Ok(())
    }
}

/// One sweep point. Immutable once computed.
#[derive(Clone, Debug)]
pub struct Measurement {
    pub size_bytes: usize,
    pub mean_duration: Duration,
    pub bandwidth_gb_s: f64,
}

impl Measurement {
    pub fn size_mb(&self) -> usize {
        self.size_bytes / MIB
    }

    pub fn duration_ms(&self) -> f64 {
        self.mean_duration.as_secs_f64() * 1e3
    }
}

/// Effective bandwidth in GB/s for one participant.
pub fn bandwidth_gb_s(size_bytes: usize, traffic_multiplier: f64, mean: Duration) -> f64 {
    size_bytes as f64 * traffic_multiplier / mean.as_secs_f64() / 1e9
}

/// Run `op` on `buf`: `warmup_iters` untimed executions, a sync point,
/// then exactly `timed_iters` back-to-back executions with no
/// intervening synchronization, a final sync, and the mean duration.
/// Per-call synchronization would serialize the pipeline and undercount
/// achievable overlap; syncing only at the boundaries measures sustained
/// throughput.
pub async fn measure<F: Fabric>(
    group: &Group<F>,
    device: Option<&DeviceHandle>,
    op: Operation,
    buf: &mut [f32],
    warmup_iters: u32,
    timed_iters: u32,
) -> Result<Duration, HarnessError> {
    if timed_iters == 0 {
        return Err(HarnessError::InvalidIterationCount);
    }

    for _ in 0..warmup_iters {
        op.execute(group, buf).await?;
    }

    if let Some(device) = device {
        device.synchronize();
    }
    let start = Instant::now();
    for _ in 0..timed_iters {
        op.execute(group, buf).await?;
    }
    if let Some(device) = device {
        device.synchronize();
    }
    Ok(start.elapsed() / timed_iters)
}

/// Drive the measurement engine across the configured sizes, strictly in
/// order. Each size gets a freshly allocated ones-filled buffer, owned
/// exclusively for the duration of its measurement.
pub async fn run_sweep<F: Fabric>(
    group: &Group<F>,
    device: Option<&DeviceHandle>,
    config: &SweepConfig,
) -> Result<Vec<Measurement>, HarnessError> {
    config.validate()?;

    let mut results = Vec::with_capacity(config.sizes_mb.len());
    for &size_mb in &config.sizes_mb {
        let size_bytes = size_mb * MIB;
        let mut buf = vec![1.0f32; size_bytes / ELEMENT_WIDTH];

        let mean = measure(
            group,
            device,
            Operation::AllReduce,
            &mut buf,
            config.warmup_iters,
            config.timed_iters,
        )
        .await?;

        let bandwidth = bandwidth_gb_s(size_bytes, Operation::AllReduce.traffic_multiplier(), mean);
        tracing::debug!(size_mb, ?mean, bandwidth, "sweep point complete");
        results.push(Measurement {
            size_bytes,
            mean_duration: mean,
            bandwidth_gb_s: bandwidth,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::local::LocalFabric;

    fn single_rank_group() -> Group<LocalFabric> {
        Group::over(LocalFabric::world(1).pop().unwrap())
    }

    #[test]
    fn bandwidth_formula_is_exact() {
        // 1 MB over 10 ms at the all-reduce factor of 2.
        let bw = bandwidth_gb_s(MIB, 2.0, Duration::from_millis(10));
        assert!((bw - 0.209_715_2).abs() < 1e-12, "got {bw}");
    }

    #[test]
    fn zero_timed_iters_is_a_config_error() {
        let config = SweepConfig {
            sizes_mb: vec![1],
            warmup_iters: 0,
            timed_iters: 0,
        };
        assert!(matches!(
            config.validate(),
            Err(HarnessError::InvalidIterationCount)
        ));
    }

    #[test]
    fn zero_size_is_a_config_error() {
        let config = SweepConfig {
            sizes_mb: vec![1, 0],
            warmup_iters: 1,
            timed_iters: 1,
        };
        assert!(matches!(
            config.validate(),
            Err(HarnessError::InvalidSize { size_mb: 0 })
        ));
    }

    #[tokio::test]
    async fn measure_rejects_zero_timed_iters() {
        let group = single_rank_group();
        let mut buf = [0.0f32; 8];
        assert!(matches!(
            measure(&group, None, Operation::AllReduce, &mut buf, 0, 0).await,
            Err(HarnessError::InvalidIterationCount)
        ));
    }

    #[tokio::test]
    async fn measure_returns_a_duration() {
        let group = single_rank_group();
        let mut buf = [0.0f32; 8];
        let mean = measure(&group, None, Operation::AllReduce, &mut buf, 2, 3)
            .await
            .unwrap();
        assert!(mean >= Duration::ZERO);
    }

    #[tokio::test]
    async fn sweep_preserves_size_order() {
        let group = single_rank_group();
        let config = SweepConfig {
            sizes_mb: vec![1, 8, 64],
            warmup_iters: 1,
            timed_iters: 1,
        };
        let results = run_sweep(&group, None, &config).await.unwrap();
        assert_eq!(results.len(), 3);
        for (result, &size_mb) in results.iter().zip(&config.sizes_mb) {
            assert_eq!(result.size_bytes, size_mb * MIB);
            assert_eq!(result.size_mb(), size_mb);
        }
    }

    #[tokio::test]
    async fn sweep_size_sequence_is_idempotent() {
        let group = single_rank_group();
        let config = SweepConfig {
            sizes_mb: vec![2, 1, 4],
            warmup_iters: 0,
            timed_iters: 2,
        };
        let first = run_sweep(&group, None, &config).await.unwrap();
        let second = run_sweep(&group, None, &config).await.unwrap();
        let sizes = |r: &[Measurement]| r.iter().map(|m| m.size_bytes).collect::<Vec<_>>();
        assert_eq!(sizes(&first), sizes(&second));
    }
}
