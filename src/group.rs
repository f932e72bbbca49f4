use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::HarnessError;
use crate::fabric::tcp::{Rendezvous, TcpFabric};
use crate::fabric::{CollectiveHeader, CollectiveKind, Fabric, HEADER_LEN};

/// One bootstrapped group per process. The guard makes a second
/// concurrent bootstrap fail instead of silently fighting the first
/// over the rendezvous endpoint.
static LIVE_GROUP: AtomicBool = AtomicBool::new(false);

const STATUS_OK: u8 = 0;
const STATUS_DIVERGED: u8 = 1;

/// Handle to a live process group.
///
/// Collective operations (`all_reduce`, `barrier`) must be issued by
/// every rank in the same relative order. Each call carries a
/// monotonically increasing sequence number that rank 0 checks against
/// its own before touching payload, so a mismatched operation stream is
/// reported as [`HarnessError::Divergence`] whenever both sides still
/// issue a call. A rank that stops calling entirely still hangs the
/// group; that is the designed deadlock-on-misuse property of the
/// transport.
pub struct Group<F: Fabric> {
    fabric: F,
    seq: AtomicU64,
    torn_down: AtomicBool,
    holds_live_guard: bool,
}

impl Group<TcpFabric> {
    /// Establish connectivity to all peers over TCP. Fails with
    /// `GroupAlreadyLive` if another bootstrapped group exists in this
    /// process, and with `Bootstrap` if rendezvous fails or times out.
    pub async fn bootstrap(rendezvous: &Rendezvous) -> Result<Self, HarnessError> {
        if LIVE_GROUP.swap(true, Ordering::SeqCst) {
            return Err(HarnessError::GroupAlreadyLive);
        }
        match TcpFabric::new(rendezvous).await {
            Ok(fabric) => Ok(Self {
                fabric,
                seq: AtomicU64::new(0),
                torn_down: AtomicBool::new(false),
                holds_live_guard: true,
            }),
            Err(err) => {
                LIVE_GROUP.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}

impl<F: Fabric> Group<F> {
    /// Wrap an already-connected fabric. Used for in-process worlds
    /// (simulation, tests), which may hold several groups at once and
    /// therefore skip the per-process live guard.
    pub fn over(fabric: F) -> Self {
        Self {
            fabric,
            seq: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
            holds_live_guard: false,
        }
    }

    pub fn rank(&self) -> usize {
        self.fabric.rank()
    }

    pub fn world_size(&self) -> usize {
        self.fabric.world_size()
    }

    fn check_live(&self) -> Result<(), HarnessError> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(HarnessError::UseAfterTeardown);
        }
        Ok(())
    }

    /// In-place sum across all ranks; every rank ends with the identical
    /// result (rank 0 folds contributions in rank order and broadcasts).
    pub async fn all_reduce(&self, buf: &mut [f32]) -> Result<(), HarnessError> {
        self.collective(CollectiveKind::AllReduce, buf).await
    }

    /// Blocks until every rank has called it.
    pub async fn barrier(&self) -> Result<(), HarnessError> {
        self.collective(CollectiveKind::Barrier, &mut []).await
    }

    /// Tag-free blocking point-to-point send, matched by rank pair.
    pub async fn send(&self, buf: &[f32], dst: usize) -> Result<(), HarnessError> {
        self.check_live()?;
        self.fabric.send(dst, bytemuck::cast_slice(buf)).await
    }

    /// Tag-free blocking point-to-point receive, matched by rank pair.
    pub async fn recv(&self, buf: &mut [f32], src: usize) -> Result<(), HarnessError> {
        self.check_live()?;
        self.fabric.recv(src, bytemuck::cast_slice_mut(buf)).await
    }

    /// Release transport resources. Any later operation returns
    /// `UseAfterTeardown`. Idempotent.
    pub async fn teardown(&self) -> Result<(), HarnessError> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.fabric.shutdown().await;
        if self.holds_live_guard {
            LIVE_GROUP.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn collective(
        &self,
        kind: CollectiveKind,
        buf: &mut [f32],
    ) -> Result<(), HarnessError> {
        self.check_live()?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let header = CollectiveHeader {
            kind,
            seq,
            len: std::mem::size_of_val(buf) as u64,
        };

        let world_size = self.fabric.world_size();
        if world_size == 1 {
            return Ok(());
        }

        if self.fabric.rank() == 0 {
            self.coordinate(kind, header, buf, world_size).await
        } else {
            self.follow(kind, header, buf).await
        }
    }

    /// Rank 0 side: validate every peer's header, fold payloads, answer
    /// each peer with a status byte and the reduced payload.
    async fn coordinate(
        &self,
        kind: CollectiveKind,
        header: CollectiveHeader,
        buf: &mut [f32],
        world_size: usize,
    ) -> Result<(), HarnessError> {
        let mut scratch = vec![0f32; buf.len()];
        for peer in 1..world_size {
            let mut raw = [0u8; HEADER_LEN];
            self.fabric.recv(peer, &mut raw).await?;
            let theirs = CollectiveHeader::decode(&raw);
            if theirs != Some(header) {
                let detail = format!(
                    "rank {peer} issued {}, coordinator expected {}",
                    theirs
                        .map(|h| h.describe())
                        .unwrap_or_else(|| "an unrecognized operation".to_string()),
                    header.describe(),
                );
                // Unblock every follower before reporting; their payloads
                // are abandoned unread.
                for other in 1..world_size {
                    let _ = self.fabric.send(other, &[STATUS_DIVERGED]).await;
                }
                return Err(HarnessError::Divergence { detail });
            }
            if kind == CollectiveKind::AllReduce {
                self.fabric
                    .recv(peer, bytemuck::cast_slice_mut(scratch.as_mut_slice()))
                    .await?;
                for (acc, contribution) in buf.iter_mut().zip(scratch.iter()) {
                    *acc += contribution;
                }
            }
        }
        for peer in 1..world_size {
            self.fabric.send(peer, &[STATUS_OK]).await?;
            if kind == CollectiveKind::AllReduce {
                self.fabric.send(peer, bytemuck::cast_slice(buf)).await?;
            }
        }
        Ok(())
    }

    /// Non-zero rank side: ship header and payload, await the verdict,
    /// then the reduced payload.
    async fn follow(
        &self,
        kind: CollectiveKind,
        header: CollectiveHeader,
        buf: &mut [f32],
    ) -> Result<(), HarnessError> {
        self.fabric.send(0, &header.encode()).await?;
        if kind == CollectiveKind::AllReduce {
            self.fabric.send(0, bytemuck::cast_slice(buf)).await?;
        }
        let mut status = [0u8; 1];
        self.fabric.recv(0, &mut status).await?;
        if status[0] != STATUS_OK {
            return Err(HarnessError::Divergence {
                detail: format!(
                    "coordinator rejected {} as out of step with the group",
                    header.describe()
                ),
            });
        }
        if kind == CollectiveKind::AllReduce {
            self.fabric.recv(0, bytemuck::cast_slice_mut(buf)).await?;
        }
        Ok(())
    }
}

impl<F: Fabric> Drop for Group<F> {
    fn drop(&mut self) {
        if self.holds_live_guard && !self.torn_down.load(Ordering::SeqCst) {
            LIVE_GROUP.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::local::LocalFabric;

    fn single_rank_group() -> Group<LocalFabric> {
        Group::over(LocalFabric::world(1).pop().unwrap())
    }

    #[tokio::test]
    async fn single_rank_collectives_complete() {
        let group = single_rank_group();
        assert_eq!(group.rank(), 0);
        assert_eq!(group.world_size(), 1);

        let mut buf = [1.0f32, 2.0];
        group.all_reduce(&mut buf).await.unwrap();
        assert_eq!(buf, [1.0, 2.0]);
        group.barrier().await.unwrap();
    }

    #[tokio::test]
    async fn teardown_poisons_the_handle() {
        let group = single_rank_group();
        group.teardown().await.unwrap();
        // Second teardown is fine, anything else is not.
        group.teardown().await.unwrap();

        let mut buf = [0.0f32; 2];
        assert!(matches!(
            group.all_reduce(&mut buf).await,
            Err(HarnessError::UseAfterTeardown)
        ));
        assert!(matches!(
            group.barrier().await,
            Err(HarnessError::UseAfterTeardown)
        ));
        assert!(matches!(
            group.send(&buf, 0).await,
            Err(HarnessError::UseAfterTeardown)
        ));
    }
}
