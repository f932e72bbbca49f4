use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use super::Fabric;
use crate::error::HarnessError;

/// In-process fabric: a world of N ranks wired together with channels.
/// Message-oriented, so every `recv` must match one `send` of the same
/// length, which mirrors the exact-length framing of the TCP mesh. Used
/// for simulation and tests; blocking semantics are identical to the
/// real transport, so a misordered call sequence hangs here too.
pub struct LocalFabric {
    rank: usize,
    world_size: usize,
    /// Outbound channels indexed by destination rank.
    senders: Vec<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    /// Inbound channels indexed by source rank.
    receivers: Vec<Option<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>>,
    closed: AtomicBool,
}

impl LocalFabric {
    /// Build a fully connected world, one fabric per rank.
    pub fn world(world_size: usize) -> Vec<LocalFabric> {
        let mut senders: Vec<Vec<Option<mpsc::UnboundedSender<Vec<u8>>>>> = (0..world_size)
            .map(|_| (0..world_size).map(|_| None).collect())
            .collect();
        let mut receivers: Vec<Vec<Option<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>>> =
            (0..world_size)
                .map(|_| (0..world_size).map(|_| None).collect())
                .collect();

        for src in 0..world_size {
            for dst in 0..world_size {
                if src == dst {
                    continue;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                senders[src][dst] = Some(tx);
                receivers[dst][src] = Some(Mutex::new(rx));
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalFabric {
                rank,
                world_size,
                senders,
                receivers,
                closed: AtomicBool::new(false),
            })
            .collect()
    }

    fn check_open(&self) -> Result<(), HarnessError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HarnessError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "local fabric is shut down",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Fabric for LocalFabric {
    async fn send(&self, peer: usize, buf: &[u8]) -> Result<(), HarnessError> {
        self.check_open()?;
        let tx = self
            .senders
            .get(peer)
            .and_then(|t| t.as_ref())
            .ok_or_else(|| HarnessError::invalid_peer(peer))?;
        tx.send(buf.to_vec()).map_err(|_| {
            HarnessError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("peer rank {peer} is gone"),
            ))
        })
    }

    async fn recv(&self, peer: usize, buf: &mut [u8]) -> Result<(), HarnessError> {
        self.check_open()?;
        let rx = self
            .receivers
            .get(peer)
            .and_then(|r| r.as_ref())
            .ok_or_else(|| HarnessError::invalid_peer(peer))?;
        let mut guard = rx.lock().await;
        let message = guard.recv().await.ok_or_else(|| {
            HarnessError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("peer rank {peer} closed its channel"),
            ))
        })?;
        if message.len() != buf.len() {
            return Err(HarnessError::Transport(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "message from rank {peer} is {} bytes, expected {}",
                    message.len(),
                    buf.len()
                ),
            )));
        }
        buf.copy_from_slice(&message);
        Ok(())
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn shutdown(&self) -> Result<(), HarnessError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn point_to_point_roundtrip() {
        let mut world = LocalFabric::world(2);
        let b = world.pop().unwrap();
        let a = world.pop().unwrap();

        a.send(1, &[1, 2, 3]).await.unwrap();
        let mut buf = [0u8; 3];
        b.recv(0, &mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn length_mismatch_is_an_error() {
        let mut world = LocalFabric::world(2);
        let b = world.pop().unwrap();
        let a = world.pop().unwrap();

        a.send(1, &[7; 4]).await.unwrap();
        let mut buf = [0u8; 8];
        assert!(b.recv(0, &mut buf).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_rejects_further_traffic() {
        let mut world = LocalFabric::world(2);
        let _b = world.pop().unwrap();
        let a = world.pop().unwrap();

        a.shutdown().await.unwrap();
        assert!(a.send(1, &[0]).await.is_err());
    }
}
